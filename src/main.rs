use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use snapkeep::cli::{
    handle_run_command, handle_units_command, handle_vault_command, handle_verify_command,
    RunArgs, UnitsCommands, VaultCommands,
};
use snapkeep::config::{Config, SnapkeepPaths};

#[derive(Parser)]
#[command(
    name = "snapkeep",
    author = "Kaylee Beyene",
    version,
    about = "Tiered backup orchestration",
    long_about = "snapkeep coordinates snapshotting, encryption, splitting, \
                  verification, and pruning of backups across tiered storage. \
                  It decides when a backup is worth taking, proves the result \
                  can be read back, and keeps retention within policy."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one job (or all) through the backup state machine
    Run {
        /// Job name
        job: Option<String>,

        /// Run every configured job sequentially
        #[arg(long, conflicts_with = "job")]
        all: bool,

        /// Date fed to the schedule predicates (YYYY-MM-DD, defaults to today)
        #[arg(long)]
        date: Option<String>,

        /// Bypass the schedule and change gates
        #[arg(short, long)]
        force: bool,
    },

    /// Backup unit management commands
    #[command(subcommand)]
    Units(UnitsCommands),

    /// Verify that a backup unit can be fully read back
    Verify {
        /// Job name
        job: String,

        /// Unit identifier (or 'latest', the default)
        unit: Option<String>,
    },

    /// Password-manager vault commands
    #[command(subcommand)]
    Vault(VaultCommands),

    /// Write a starter configuration
    Init,

    /// Show current configuration and paths
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let paths = SnapkeepPaths::new()?;
    let config = Config::load_or_create(&paths)?;

    match cli.command {
        Some(Commands::Run {
            job,
            all,
            date,
            force,
        }) => {
            let date = date
                .map(|d| {
                    NaiveDate::parse_from_str(&d, "%Y-%m-%d")
                        .map_err(|e| anyhow::anyhow!("invalid --date '{}': {}", d, e))
                })
                .transpose()?;
            handle_run_command(
                &paths,
                &config,
                RunArgs {
                    job,
                    all,
                    date,
                    force,
                },
            )?;
        }
        Some(Commands::Units(cmd)) => {
            handle_units_command(&config, cmd)?;
        }
        Some(Commands::Verify { job, unit }) => {
            handle_verify_command(&config, &job, unit.as_deref())?;
        }
        Some(Commands::Vault(cmd)) => {
            handle_vault_command(&paths, &config, cmd)?;
        }
        Some(Commands::Init) => {
            if paths.is_initialized() {
                println!(
                    "Configuration already exists at {}",
                    paths.settings_file().display()
                );
                println!("Edit it directly, or remove it and re-run 'snapkeep init'.");
            } else {
                Config::starter().save(&paths)?;
                println!("Starter configuration written to {}", paths.settings_file().display());
                println!();
                println!("Default jobs:");
                println!("  - nightly  (keep 2, every run)");
                println!("  - biweekly (keep 5, on the 1st and 15th)");
                println!("  - monthly  (keep 1, on the 1st)");
                println!("plus a vault export pipeline (keep 10).");
                println!();
                println!("Adjust sources and destinations before the first run.");
            }
        }
        Some(Commands::Config) => {
            println!("snapkeep Configuration");
            println!("======================");
            println!("Config file:    {}", paths.settings_file().display());
            println!("References dir: {}", paths.references_dir().display());
            println!("Locks dir:      {}", paths.locks_dir().display());
            println!();
            if config.jobs.is_empty() {
                println!("No jobs configured.");
            } else {
                println!("Jobs:");
                for job in &config.jobs {
                    println!(
                        "  {} -> {} (keep {}, {})",
                        job.source.display(),
                        job.destination.display(),
                        job.keep,
                        job.name,
                    );
                }
            }
            if let Some(vault) = &config.vault {
                println!(
                    "Vault: {} -> {} (keep {})",
                    vault.program,
                    vault.destination.display(),
                    vault.keep,
                );
            }
        }
        None => {
            println!("snapkeep - Tiered backup orchestration");
            println!();
            println!("Run 'snapkeep --help' for usage information.");
            println!("Run 'snapkeep init' to write a starter configuration.");
        }
    }

    Ok(())
}
