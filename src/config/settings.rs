//! Job configuration for snapkeep
//!
//! Manages the backup job definitions: sources, destinations, retention
//! keep-counts, calendar schedules, and the external cipher/vault commands.
//! All of it is explicit, structured, and validated at startup.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::paths::SnapkeepPaths;
use crate::error::SnapkeepError;
use crate::run::schedule::Schedule;

/// What counts as a change when comparing a source against its reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChangePolicy {
    /// Compare file contents (streaming SHA-256 per file)
    #[default]
    Content,
    /// Compare file length and modification time only
    Metadata,
}

/// An external streaming cipher invocation (stdin -> stdout)
///
/// The passphrase never appears in the argument list; when `passphrase_env`
/// is set, the secret is injected into the child's environment under that
/// name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CipherCommand {
    /// Program to execute (e.g. "gpg")
    pub program: String,
    /// Arguments passed verbatim
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variable the child reads the passphrase from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase_env: Option<String>,
}

/// Encryption settings for a job's archive pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionConfig {
    /// Command the archive stream is piped through when producing
    pub encrypt: CipherCommand,
    /// Command the part stream is piped through when verifying
    pub decrypt: CipherCommand,
}

/// One backup job: a source tree archived into a retained destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Job name, also the retention category (e.g. "nightly")
    pub name: String,
    /// Source tree to back up
    pub source: PathBuf,
    /// Directory that holds this job's backup units
    pub destination: PathBuf,
    /// Number of backup units to retain after a successful run
    pub keep: u32,
    /// Calendar predicate deciding whether a run is due
    #[serde(default)]
    pub schedule: Schedule,
    /// Change comparison policy
    #[serde(default)]
    pub change_policy: ChangePolicy,
    /// Split the archive into parts of this many bytes (None = single part)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_size: Option<u64>,
    /// Pipe the archive through an external cipher
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption: Option<EncryptionConfig>,
    /// Stop running containers for the duration of the backup and restart
    /// exactly that set afterward
    #[serde(default)]
    pub quiesce_containers: bool,
}

/// Password-manager vault export settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultConfig {
    /// Vault CLI program (e.g. "bw")
    pub program: String,
    /// Directory that receives vault export files
    pub destination: PathBuf,
    /// Number of exports to retain
    pub keep: u32,
    /// Ask the CLI for its encrypted export format instead of plaintext JSON
    #[serde(default)]
    pub encrypted_export: bool,
    /// Environment variable holding the master password (prompted when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase_env: Option<String>,
}

/// Top-level snapkeep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Backup jobs, one per retention category
    #[serde(default)]
    pub jobs: Vec<JobConfig>,

    /// Optional password-manager vault pipeline
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault: Option<VaultConfig>,
}

fn default_schema_version() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            jobs: Vec::new(),
            vault: None,
        }
    }
}

impl Config {
    /// Load configuration from disk, or return an empty one if absent
    pub fn load_or_create(paths: &SnapkeepPaths) -> Result<Self, SnapkeepError> {
        let settings_path = paths.settings_file();

        if settings_path.exists() {
            let contents = std::fs::read_to_string(&settings_path)
                .map_err(|e| SnapkeepError::Io(format!("Failed to read config file: {}", e)))?;

            let config: Config = serde_json::from_str(&contents)
                .map_err(|e| SnapkeepError::Config(format!("Failed to parse config file: {}", e)))?;

            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to disk
    pub fn save(&self, paths: &SnapkeepPaths) -> Result<(), SnapkeepError> {
        paths.ensure_directories()?;

        let settings_path = paths.settings_file();
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| SnapkeepError::Config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&settings_path, contents)
            .map_err(|e| SnapkeepError::Io(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    /// Find a job by name
    pub fn job(&self, name: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|j| j.name == name)
    }

    /// Validate structural invariants of the configuration
    ///
    /// Checked once at startup so every later component can rely on a
    /// well-formed job list.
    pub fn validate(&self) -> Result<(), SnapkeepError> {
        let mut seen = std::collections::HashSet::new();

        for job in &self.jobs {
            if job.name.is_empty() {
                return Err(SnapkeepError::Config("Job name must not be empty".into()));
            }
            if job.name.contains(['/', '\\']) || job.name.starts_with('.') {
                return Err(SnapkeepError::Config(format!(
                    "Job name '{}' is not filesystem-safe",
                    job.name
                )));
            }
            if !seen.insert(job.name.as_str()) {
                return Err(SnapkeepError::Config(format!(
                    "Duplicate job name: '{}'",
                    job.name
                )));
            }
            if job.source == job.destination {
                return Err(SnapkeepError::Config(format!(
                    "Job '{}': source and destination must differ",
                    job.name
                )));
            }
            if let Some(size) = job.split_size {
                if size == 0 {
                    return Err(SnapkeepError::Config(format!(
                        "Job '{}': split_size must be positive",
                        job.name
                    )));
                }
            }
            job.schedule.validate().map_err(|e| {
                SnapkeepError::Config(format!("Job '{}': invalid schedule: {}", job.name, e))
            })?;
        }

        if let Some(vault) = &self.vault {
            if vault.program.is_empty() {
                return Err(SnapkeepError::Config(
                    "Vault program must not be empty".into(),
                ));
            }
        }

        Ok(())
    }

    /// A starter configuration with the conventional retention categories
    ///
    /// Keep-counts follow the original deployment: 2 nightly, 5 biweekly,
    /// 1 monthly, 1 snapshot, 10 vault exports.
    pub fn starter() -> Self {
        Self {
            schema_version: default_schema_version(),
            jobs: vec![
                JobConfig {
                    name: "nightly".into(),
                    source: PathBuf::from("/data"),
                    destination: PathBuf::from("/backups/nightly"),
                    keep: 2,
                    schedule: Schedule::Always,
                    change_policy: ChangePolicy::Content,
                    split_size: None,
                    encryption: None,
                    quiesce_containers: false,
                },
                JobConfig {
                    name: "biweekly".into(),
                    source: PathBuf::from("/data"),
                    destination: PathBuf::from("/backups/biweekly"),
                    keep: 5,
                    schedule: Schedule::DayOfMonth { days: vec![1, 15] },
                    change_policy: ChangePolicy::Content,
                    split_size: Some(2 * 1024 * 1024 * 1024),
                    encryption: None,
                    quiesce_containers: true,
                },
                JobConfig {
                    name: "monthly".into(),
                    source: PathBuf::from("/storage"),
                    destination: PathBuf::from("/backups/monthly"),
                    keep: 1,
                    schedule: Schedule::DayOfMonth { days: vec![1] },
                    change_policy: ChangePolicy::Metadata,
                    split_size: Some(2 * 1024 * 1024 * 1024),
                    encryption: None,
                    quiesce_containers: false,
                },
            ],
            vault: Some(VaultConfig {
                program: "bw".into(),
                destination: PathBuf::from("/backups/vault"),
                keep: 10,
                encrypted_export: false,
                passphrase_env: Some("SNAPKEEP_VAULT_PASSWORD".into()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn job(name: &str) -> JobConfig {
        JobConfig {
            name: name.into(),
            source: PathBuf::from("/src"),
            destination: PathBuf::from("/dst"),
            keep: 3,
            schedule: Schedule::Always,
            change_policy: ChangePolicy::Content,
            split_size: None,
            encryption: None,
            quiesce_containers: false,
        }
    }

    #[test]
    fn test_default_config_is_empty() {
        let config = Config::default();
        assert_eq!(config.schema_version, 1);
        assert!(config.jobs.is_empty());
        assert!(config.vault.is_none());
    }

    #[test]
    fn test_starter_keep_counts() {
        let config = Config::starter();
        assert_eq!(config.job("nightly").unwrap().keep, 2);
        assert_eq!(config.job("biweekly").unwrap().keep, 5);
        assert_eq!(config.job("monthly").unwrap().keep, 1);
        assert_eq!(config.vault.as_ref().unwrap().keep, 10);
        config.validate().unwrap();
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let paths = SnapkeepPaths::with_base_dir(temp_dir.path().to_path_buf());

        let mut config = Config::default();
        config.jobs.push(job("nightly"));
        config.save(&paths).unwrap();

        let loaded = Config::load_or_create(&paths).unwrap();
        assert_eq!(loaded.jobs.len(), 1);
        assert_eq!(loaded.jobs[0].name, "nightly");
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut config = Config::default();
        config.jobs.push(job("nightly"));
        config.jobs.push(job("nightly"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unsafe_names() {
        let mut config = Config::default();
        config.jobs.push(job("../escape"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_same_source_and_destination() {
        let mut config = Config::default();
        let mut j = job("nightly");
        j.destination = j.source.clone();
        config.jobs.push(j);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_split() {
        let mut config = Config::default();
        let mut j = job("nightly");
        j.split_size = Some(0);
        config.jobs.push(j);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_round_trip() {
        let config = Config::starter();
        let json = serde_json::to_string(&config).unwrap();
        let deserialized: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized.jobs.len(), config.jobs.len());
        assert_eq!(
            deserialized.job("biweekly").unwrap().split_size,
            Some(2 * 1024 * 1024 * 1024)
        );
    }
}
