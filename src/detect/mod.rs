//! Change detection against a reference snapshot
//!
//! Decides whether a source tree has changed since the last successful
//! backup by comparing it against the job's reference snapshot. The
//! comparison mutates neither side and is safe to repeat.

pub mod digest;

use std::fmt;
use std::path::Path;

use crate::config::ChangePolicy;

pub use digest::{hash_file_hex, sha256_hex, FileSignature, TreeDigest};

/// Counts of differing files between source and reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChangeSummary {
    /// Files present in the source but not the reference
    pub added: usize,
    /// Files present in the reference but not the source
    pub removed: usize,
    /// Files present in both with differing signatures
    pub modified: usize,
}

impl ChangeSummary {
    pub fn total(&self) -> usize {
        self.added + self.removed + self.modified
    }
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} added, {} removed, {} modified",
            self.added, self.removed, self.modified
        )
    }
}

/// Outcome of a change comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeStatus {
    /// At least one file was added, removed, or modified
    Changed(ChangeSummary),
    /// Source and reference are identical under the policy
    Unchanged,
    /// The comparison itself failed; the caller decides how to proceed
    Unknown(String),
}

impl ChangeStatus {
    /// Whether the orchestrator should run the backup
    ///
    /// `Unknown` counts as yes: when the comparison cannot be trusted, the
    /// safe direction is to take the backup rather than silently skip it.
    pub fn should_back_up(&self) -> bool {
        !matches!(self, ChangeStatus::Unchanged)
    }
}

/// Compare a source tree against its reference snapshot
///
/// A missing reference always reports `Changed` (the first run must back
/// up). An I/O failure while walking either tree reports `Unknown`.
pub fn compare(source: &Path, reference: &Path, policy: ChangePolicy) -> ChangeStatus {
    let source_digest = match TreeDigest::capture(source, policy) {
        Ok(digest) => digest,
        Err(e) => return ChangeStatus::Unknown(format!("source walk failed: {}", e)),
    };

    if !reference.exists() {
        return ChangeStatus::Changed(ChangeSummary {
            added: source_digest.len(),
            ..ChangeSummary::default()
        });
    }

    let reference_digest = match TreeDigest::capture(reference, policy) {
        Ok(digest) => digest,
        Err(e) => return ChangeStatus::Unknown(format!("reference walk failed: {}", e)),
    };

    let summary = diff(&source_digest, &reference_digest);
    if summary.total() == 0 {
        ChangeStatus::Unchanged
    } else {
        ChangeStatus::Changed(summary)
    }
}

fn diff(source: &TreeDigest, reference: &TreeDigest) -> ChangeSummary {
    let mut summary = ChangeSummary::default();

    for (path, sig) in &source.files {
        match reference.files.get(path) {
            None => summary.added += 1,
            Some(ref_sig) if ref_sig != sig => summary.modified += 1,
            Some(_) => {}
        }
    }

    for path in reference.files.keys() {
        if !source.files.contains_key(path) {
            summary.removed += 1;
        }
    }

    summary
}
