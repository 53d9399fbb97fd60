//! Tree digests for change comparison
//!
//! Captures a deterministic signature of every regular file under a root:
//! relative path, length, and (per policy) modification time or a streaming
//! SHA-256 of the contents. Two captures compare equal exactly when the
//! trees are identical under the chosen policy.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::time::UNIX_EPOCH;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::config::ChangePolicy;
use crate::error::{SnapkeepError, SnapkeepResult};

/// Signature of one regular file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSignature {
    /// File length in bytes
    pub len: u64,
    /// Modification time in whole seconds since the epoch (metadata policy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime: Option<i64>,
    /// Lowercase hex SHA-256 of the contents (content policy)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Deterministic signature of a whole tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeDigest {
    /// Signatures keyed by `/`-separated relative path, sorted
    pub files: BTreeMap<String, FileSignature>,
}

impl TreeDigest {
    /// Walk `root` and capture a signature for every regular file
    ///
    /// Symlinks are not followed. Directory entries themselves carry no
    /// signature; an empty directory does not affect the digest.
    pub fn capture(root: &Path, policy: ChangePolicy) -> SnapkeepResult<Self> {
        let mut files = BTreeMap::new();

        for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
            let entry = entry
                .map_err(|e| SnapkeepError::Io(format!("Failed to walk {}: {}", root.display(), e)))?;

            if !entry.file_type().is_file() {
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| SnapkeepError::Io(format!("Path outside root: {}", e)))?
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            let metadata = entry
                .metadata()
                .map_err(|e| SnapkeepError::Io(format!("Failed to stat {}: {}", rel, e)))?;

            let signature = match policy {
                ChangePolicy::Content => FileSignature {
                    len: metadata.len(),
                    mtime: None,
                    sha256: Some(hash_file_hex(entry.path())?),
                },
                ChangePolicy::Metadata => FileSignature {
                    len: metadata.len(),
                    mtime: Some(mtime_seconds(&metadata)),
                    sha256: None,
                },
            };

            files.insert(rel, signature);
        }

        Ok(Self { files })
    }

    /// Number of files captured
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Combined hex digest over all entries, stable across captures
    pub fn digest_hex(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, sig) in &self.files {
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update(sig.len.to_le_bytes());
            if let Some(mtime) = sig.mtime {
                hasher.update(mtime.to_le_bytes());
            }
            if let Some(sha) = &sig.sha256 {
                hasher.update(sha.as_bytes());
            }
            hasher.update([0xffu8]);
        }
        format!("{:x}", hasher.finalize())
    }
}

/// Streaming SHA-256 of a file, as lowercase hex
pub fn hash_file_hex(path: &Path) -> SnapkeepResult<String> {
    let file = File::open(path)
        .map_err(|e| SnapkeepError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = reader
            .read(&mut buf)
            .map_err(|e| SnapkeepError::Io(format!("Failed to read {}: {}", path.display(), e)))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// SHA-256 of an in-memory buffer, as lowercase hex
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn mtime_seconds(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
