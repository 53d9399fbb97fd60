//! Backup units and retention pruning
//!
//! A backup unit is one timestamped directory under a job's destination,
//! holding the archive parts plus a `unit.json` manifest. Unit identifiers
//! embed a zero-padded UTC timestamp, so lexicographic order equals age
//! order and the retention pass never has to stat anything.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{SnapkeepError, SnapkeepResult};

/// Manifest file name inside every unit directory
pub const UNIT_MANIFEST: &str = "unit.json";

/// Timestamp layout embedded in unit identifiers
pub const UNIT_STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// One archive part as recorded in the manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartInfo {
    /// Part file name relative to the unit directory
    pub name: String,
    /// Part length in bytes
    pub bytes: u64,
    /// Lowercase hex SHA-256 of the part
    pub sha256: String,
}

/// Metadata written alongside the parts of a backup unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitManifest {
    /// Manifest format version
    pub schema_version: u32,
    /// Unit identifier, equal to the directory name
    pub id: String,
    /// Owning job / retention category
    pub job: String,
    /// When the unit was produced
    pub created_at: DateTime<Utc>,
    /// Whether the parts were piped through the external cipher
    pub encrypted: bool,
    /// Archive parts in order
    pub parts: Vec<PartInfo>,
}

impl UnitManifest {
    pub fn total_bytes(&self) -> u64 {
        self.parts.iter().map(|p| p.bytes).sum()
    }

    /// Load a manifest from a unit directory
    pub fn load(unit_dir: &Path) -> SnapkeepResult<Self> {
        let path = unit_dir.join(UNIT_MANIFEST);
        let contents = fs::read_to_string(&path)
            .map_err(|e| SnapkeepError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&contents)
            .map_err(|e| SnapkeepError::Json(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Write the manifest into a unit (or staging) directory
    pub fn save(&self, unit_dir: &Path) -> SnapkeepResult<()> {
        let path = unit_dir.join(UNIT_MANIFEST);
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| SnapkeepError::Json(format!("Failed to serialize manifest: {}", e)))?;
        fs::write(&path, contents)
            .map_err(|e| SnapkeepError::Io(format!("Failed to write {}: {}", path.display(), e)))?;
        Ok(())
    }
}

/// One retained backup result
#[derive(Debug, Clone)]
pub struct BackupUnit {
    /// Identifier; `<job>-<YYYYMMDD-HHMMSS>`, equal to the directory name
    pub id: String,
    /// Full path of the unit directory
    pub path: PathBuf,
    /// Creation time parsed from the identifier
    pub created_at: Option<DateTime<Utc>>,
    /// Total size of the parts in bytes
    pub size_bytes: u64,
    /// Whether the parts are encrypted
    pub encrypted: bool,
    /// Number of archive parts
    pub part_count: usize,
}

/// Build a unit identifier for a job at a point in time
pub fn unit_id(job: &str, at: DateTime<Utc>) -> String {
    format!("{}-{}", job, at.format(UNIT_STAMP_FORMAT))
}

/// Parse the timestamp out of a unit identifier
pub fn parse_unit_stamp(job: &str, id: &str) -> Option<DateTime<Utc>> {
    let stamp = id.strip_prefix(job)?.strip_prefix('-')?;
    let naive = NaiveDateTime::parse_from_str(stamp, UNIT_STAMP_FORMAT).ok()?;
    Some(DateTime::from_naive_utc_and_offset(naive, Utc))
}

/// List a job's backup units, oldest first
///
/// Only directories named `<job>-...` count; dot-prefixed entries (staging
/// directories) and foreign names are ignored. Identifiers are zero-padded
/// timestamps, so the lexicographic sort is an age sort.
pub fn scan_units(dir: &Path, job: &str) -> SnapkeepResult<Vec<BackupUnit>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut units = Vec::new();
    let prefix = format!("{}-", job);

    for entry in fs::read_dir(dir)
        .map_err(|e| SnapkeepError::Io(format!("Failed to read {}: {}", dir.display(), e)))?
    {
        let entry =
            entry.map_err(|e| SnapkeepError::Io(format!("Failed to read directory entry: {}", e)))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();

        if !path.is_dir() || name.starts_with('.') || !name.starts_with(&prefix) {
            continue;
        }

        units.push(read_unit(&path, job, &name));
    }

    units.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(units)
}

fn read_unit(path: &Path, job: &str, name: &str) -> BackupUnit {
    match UnitManifest::load(path) {
        Ok(manifest) => BackupUnit {
            id: name.to_string(),
            path: path.to_path_buf(),
            created_at: Some(manifest.created_at),
            size_bytes: manifest.total_bytes(),
            encrypted: manifest.encrypted,
            part_count: manifest.parts.len(),
        },
        // A unit without a readable manifest still counts for retention;
        // size and part count fall back to the directory listing.
        Err(_) => {
            let mut size_bytes = 0;
            let mut part_count = 0;
            if let Ok(entries) = fs::read_dir(path) {
                for entry in entries.flatten() {
                    let entry_name = entry.file_name().to_string_lossy().to_string();
                    if entry_name == UNIT_MANIFEST {
                        continue;
                    }
                    if let Ok(metadata) = entry.metadata() {
                        if metadata.is_file() {
                            size_bytes += metadata.len();
                            part_count += 1;
                        }
                    }
                }
            }
            BackupUnit {
                id: name.to_string(),
                path: path.to_path_buf(),
                created_at: parse_unit_stamp(job, name),
                size_bytes,
                encrypted: false,
                part_count,
            }
        }
    }
}

/// The units a pruning pass would remove: the oldest `len - keep`
///
/// Pure selection; returns an empty slice when `len <= keep`. The input
/// must be sorted oldest first, as `scan_units` produces it.
pub fn select_expired(units: &[BackupUnit], keep: usize) -> &[BackupUnit] {
    let excess = units.len().saturating_sub(keep);
    &units[..excess]
}

/// Delete expired units and return the removed set
///
/// Removes exactly `len - keep` oldest units (none when `len <= keep`),
/// deleting their storage. Idempotent: a second pass with the same keep
/// removes nothing further. With `keep >= 1` the most recent unit always
/// survives.
pub fn prune(units: &[BackupUnit], keep: usize) -> SnapkeepResult<Vec<BackupUnit>> {
    let mut removed = Vec::new();

    for unit in select_expired(units, keep) {
        fs::remove_dir_all(&unit.path).map_err(|e| {
            SnapkeepError::Io(format!("Failed to delete unit {}: {}", unit.id, e))
        })?;
        info!(unit = %unit.id, "pruned expired backup unit");
        removed.push(unit.clone());
    }

    Ok(removed)
}
