//! Vault CLI commands
//!
//! Drives the password-manager export pipeline.

use clap::Subcommand;
use chrono::Utc;

use crate::config::{Config, SnapkeepPaths};
use crate::error::{SnapkeepError, SnapkeepResult};
use crate::secrets::Passphrase;
use crate::tools::{BitwardenCli, VaultPipeline};

/// Vault subcommands
#[derive(Subcommand)]
pub enum VaultCommands {
    /// Unlock, sync, export, and prune old exports
    Run,
}

/// Handle a vault command
pub fn handle_vault_command(
    paths: &SnapkeepPaths,
    config: &Config,
    cmd: VaultCommands,
) -> SnapkeepResult<()> {
    let vault = config
        .vault
        .as_ref()
        .ok_or_else(|| SnapkeepError::Config("No vault section in the configuration".into()))?;

    match cmd {
        VaultCommands::Run => {
            let master = Passphrase::from_env_or_prompt(
                vault.passphrase_env.as_deref(),
                "Vault master password: ",
            )?;

            let cli = BitwardenCli::new(vault.program.as_str());
            let marker = paths.export_marker_file("vault");
            let pipeline = VaultPipeline::new(
                &cli,
                &vault.destination,
                &marker,
                vault.keep as usize,
                vault.encrypted_export,
            );

            let report = pipeline.run(master, Utc::now())?;

            if report.deduplicated {
                println!("Vault unchanged since last export; nothing written.");
            } else if let Some(path) = &report.written {
                println!("Vault exported to {}", path.display());
                if !report.removed.is_empty() {
                    println!("Pruned {} old export(s).", report.removed.len());
                }
            }
        }
    }

    Ok(())
}
