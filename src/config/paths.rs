//! Path management for snapkeep
//!
//! Provides XDG-compliant path resolution for configuration and run state.
//!
//! ## Path Resolution Order
//!
//! 1. `SNAPKEEP_DATA_DIR` environment variable (if set)
//! 2. Platform config directory via `directories` (e.g. `~/.config/snapkeep`)

use std::path::PathBuf;

use directories::ProjectDirs;

use crate::error::SnapkeepError;

/// Manages all paths used by snapkeep
#[derive(Debug, Clone)]
pub struct SnapkeepPaths {
    /// Base directory for all snapkeep state
    base_dir: PathBuf,
}

impl SnapkeepPaths {
    /// Create a new SnapkeepPaths instance
    ///
    /// Path resolution:
    /// 1. `SNAPKEEP_DATA_DIR` env var (explicit override)
    /// 2. Platform config directory (e.g. `~/.config/snapkeep`)
    ///
    /// # Errors
    ///
    /// Returns an error if no home directory can be determined.
    pub fn new() -> Result<Self, SnapkeepError> {
        let base_dir = if let Ok(custom) = std::env::var("SNAPKEEP_DATA_DIR") {
            PathBuf::from(custom)
        } else {
            let dirs = ProjectDirs::from("", "", "snapkeep").ok_or_else(|| {
                SnapkeepError::Config("Could not determine a config directory".into())
            })?;
            dirs.config_dir().to_path_buf()
        };

        Ok(Self { base_dir })
    }

    /// Create SnapkeepPaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.config/snapkeep/ or equivalent)
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Get the path to the settings file
    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Get the directory holding reference snapshots
    pub fn references_dir(&self) -> PathBuf {
        self.base_dir.join("references")
    }

    /// Get the reference snapshot directory for one job
    pub fn reference_dir(&self, job: &str) -> PathBuf {
        self.references_dir().join(job)
    }

    /// Staging name used while a replacement reference is built
    pub fn reference_next_dir(&self, job: &str) -> PathBuf {
        self.references_dir().join(format!("{}.next", job))
    }

    /// Get the directory holding advisory lock files
    pub fn locks_dir(&self) -> PathBuf {
        self.base_dir.join("locks")
    }

    /// Get the lock file path for one job
    pub fn lock_file(&self, job: &str) -> PathBuf {
        self.locks_dir().join(format!("{}.lock", job))
    }

    /// Get the directory holding dedup marker files
    pub fn markers_dir(&self) -> PathBuf {
        self.base_dir.join("markers")
    }

    /// Get the last-export marker file for one job
    pub fn export_marker_file(&self, job: &str) -> PathBuf {
        self.markers_dir().join(format!("{}.last-export", job))
    }

    /// Ensure all required directories exist
    ///
    /// Creates:
    /// - Base directory (~/.config/snapkeep/)
    /// - References directory (~/.config/snapkeep/references/)
    /// - Locks directory (~/.config/snapkeep/locks/)
    /// - Markers directory (~/.config/snapkeep/markers/)
    pub fn ensure_directories(&self) -> Result<(), SnapkeepError> {
        std::fs::create_dir_all(&self.base_dir)
            .map_err(|e| SnapkeepError::Io(format!("Failed to create base directory: {}", e)))?;

        std::fs::create_dir_all(self.references_dir()).map_err(|e| {
            SnapkeepError::Io(format!("Failed to create references directory: {}", e))
        })?;

        std::fs::create_dir_all(self.locks_dir())
            .map_err(|e| SnapkeepError::Io(format!("Failed to create locks directory: {}", e)))?;

        std::fs::create_dir_all(self.markers_dir())
            .map_err(|e| SnapkeepError::Io(format!("Failed to create markers directory: {}", e)))?;

        Ok(())
    }

    /// Check if snapkeep has been initialized (config file exists)
    pub fn is_initialized(&self) -> bool {
        self.settings_file().exists()
    }
}
