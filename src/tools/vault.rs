//! Password-manager vault exports
//!
//! Unlocks the vault CLI, syncs remote state, exports the vault, and
//! writes the export to the vault destination only when its contents
//! differ from the previous export (tracked by a SHA-256 marker file).
//! The master password and the session token are zeroized as soon as the
//! step that needs them returns.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::detect::sha256_hex;
use crate::error::{SnapkeepError, SnapkeepResult};
use crate::retention::UNIT_STAMP_FORMAT;
use crate::secrets::{Passphrase, SessionToken};

/// Environment variable the CLI reads the master password from
const MASTER_ENV: &str = "SNAPKEEP_VAULT_MASTER";

/// Environment variable bitwarden-style CLIs read the session from
const SESSION_ENV: &str = "BW_SESSION";

/// Seam for the vault CLI
pub trait VaultCli {
    /// Unlock the vault; consumes the master password
    fn unlock(&self, master: Passphrase) -> SnapkeepResult<SessionToken>;

    /// Pull remote vault state
    fn sync(&self, session: &SessionToken) -> SnapkeepResult<()>;

    /// Export the vault, plaintext JSON or the CLI's encrypted format
    fn export(&self, session: &SessionToken, encrypted: bool) -> SnapkeepResult<Vec<u8>>;
}

/// bitwarden-compatible CLI
pub struct BitwardenCli {
    program: String,
}

impl BitwardenCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl VaultCli for BitwardenCli {
    fn unlock(&self, master: Passphrase) -> SnapkeepResult<SessionToken> {
        let output = Command::new(&self.program)
            .args(["unlock", "--raw", "--passwordenv", MASTER_ENV])
            .env(MASTER_ENV, master.expose())
            .output()
            .map_err(|e| SnapkeepError::Auth(format!("vault CLI failed to start: {}", e)))?;
        drop(master);

        if !output.status.success() {
            return Err(SnapkeepError::Auth(format!(
                "vault unlock rejected: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(SnapkeepError::Auth("vault unlock returned no session".into()));
        }
        Ok(SessionToken::new(token))
    }

    fn sync(&self, session: &SessionToken) -> SnapkeepResult<()> {
        let output = Command::new(&self.program)
            .arg("sync")
            .env(SESSION_ENV, session.expose())
            .output()
            .map_err(|e| SnapkeepError::Tool(format!("vault sync failed to start: {}", e)))?;
        if !output.status.success() {
            return Err(SnapkeepError::Tool(format!(
                "vault sync: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    fn export(&self, session: &SessionToken, encrypted: bool) -> SnapkeepResult<Vec<u8>> {
        let format = if encrypted { "encrypted_json" } else { "json" };
        let output = Command::new(&self.program)
            .args(["export", "--raw", "--format", format])
            .env(SESSION_ENV, session.expose())
            .output()
            .map_err(|e| SnapkeepError::Tool(format!("vault export failed to start: {}", e)))?;
        if !output.status.success() {
            return Err(SnapkeepError::Tool(format!(
                "vault export: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

/// Outcome of one vault backup pass
#[derive(Debug)]
pub struct VaultReport {
    /// Export file written this pass, if any
    pub written: Option<PathBuf>,
    /// True when the export matched the marker and nothing was written
    pub deduplicated: bool,
    /// Old exports removed by the retention pass
    pub removed: Vec<PathBuf>,
}

/// The unlock → sync → export → dedup → prune pipeline
pub struct VaultPipeline<'a> {
    cli: &'a dyn VaultCli,
    destination: &'a Path,
    marker: &'a Path,
    keep: usize,
    encrypted: bool,
}

impl<'a> VaultPipeline<'a> {
    pub fn new(
        cli: &'a dyn VaultCli,
        destination: &'a Path,
        marker: &'a Path,
        keep: usize,
        encrypted: bool,
    ) -> Self {
        Self {
            cli,
            destination,
            marker,
            keep,
            encrypted,
        }
    }

    pub fn run(&self, master: Passphrase, now: DateTime<Utc>) -> SnapkeepResult<VaultReport> {
        let session = self.cli.unlock(master)?;
        self.cli.sync(&session)?;
        let payload = self.cli.export(&session, self.encrypted)?;
        // Scrub the session before any file I/O happens on the payload.
        drop(session);

        let digest = sha256_hex(&payload);
        if self.last_export_digest().as_deref() == Some(digest.as_str()) {
            info!("vault export unchanged since last backup, skipping");
            return Ok(VaultReport {
                written: None,
                deduplicated: true,
                removed: Vec::new(),
            });
        }

        fs::create_dir_all(self.destination).map_err(|e| {
            SnapkeepError::Io(format!("Failed to create vault destination: {}", e))
        })?;

        let ext = if self.encrypted { "enc" } else { "json" };
        let name = format!("vault-{}.{}", now.format(UNIT_STAMP_FORMAT), ext);
        let path = self.destination.join(&name);
        fs::write(&path, &payload)
            .map_err(|e| SnapkeepError::Io(format!("Failed to write {}: {}", path.display(), e)))?;

        self.write_marker(&digest)?;
        let removed = prune_exports(self.destination, self.keep)?;

        info!(export = %name, removed = removed.len(), "vault backup written");
        Ok(VaultReport {
            written: Some(path),
            deduplicated: false,
            removed,
        })
    }

    fn last_export_digest(&self) -> Option<String> {
        fs::read_to_string(self.marker)
            .ok()
            .map(|s| s.trim().to_string())
    }

    /// Write the marker via temp-and-rename so a crash never leaves a
    /// half-written digest
    fn write_marker(&self, digest: &str) -> SnapkeepResult<()> {
        if let Some(parent) = self.marker.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SnapkeepError::Io(format!("Failed to create marker dir: {}", e)))?;
        }
        let tmp = self.marker.with_extension("tmp");
        fs::write(&tmp, digest)
            .map_err(|e| SnapkeepError::Io(format!("Failed to write marker: {}", e)))?;
        fs::rename(&tmp, self.marker)
            .map_err(|e| SnapkeepError::Io(format!("Failed to commit marker: {}", e)))?;
        Ok(())
    }
}

/// Remove the oldest vault exports beyond `keep`
///
/// Export names embed the zero-padded timestamp, so the lexicographic sort
/// is an age sort, same as backup units.
pub fn prune_exports(dir: &Path, keep: usize) -> SnapkeepResult<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut exports = Vec::new();
    for entry in fs::read_dir(dir)
        .map_err(|e| SnapkeepError::Io(format!("Failed to read {}: {}", dir.display(), e)))?
    {
        let entry =
            entry.map_err(|e| SnapkeepError::Io(format!("Failed to read directory entry: {}", e)))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if entry.path().is_file() && name.starts_with("vault-") {
            exports.push((name, entry.path()));
        }
    }
    exports.sort();

    let excess = exports.len().saturating_sub(keep);
    let mut removed = Vec::new();
    for (name, path) in exports.into_iter().take(excess) {
        fs::remove_file(&path)
            .map_err(|e| SnapkeepError::Io(format!("Failed to delete {}: {}", name, e)))?;
        removed.push(path);
    }

    Ok(removed)
}
