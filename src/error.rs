//! Custom error types for snapkeep
//!
//! This module defines the error hierarchy for the application using thiserror
//! for ergonomic error definitions.

use thiserror::Error;

/// Stage of archive verification that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStage {
    /// A part file is missing or the part sequence has a gap
    Parts,
    /// The external decryptor rejected the stream
    Decrypt,
    /// The decrypted/concatenated stream is not a structurally valid archive
    Structure,
}

impl std::fmt::Display for VerifyStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerifyStage::Parts => write!(f, "parts"),
            VerifyStage::Decrypt => write!(f, "decrypt"),
            VerifyStage::Structure => write!(f, "structure"),
        }
    }
}

/// A verification failure, tagged with the stage that failed
///
/// Callers must treat any value of this type as fatal for the run: a unit
/// that fails verification is never promoted and never triggers pruning of
/// older units.
#[derive(Error, Debug)]
#[error("Verification failed at {stage} stage: {detail}")]
pub struct VerifyFailure {
    /// Which stage of verification failed
    pub stage: VerifyStage,
    /// Human-readable description of the failure
    pub detail: String,
}

impl VerifyFailure {
    pub fn parts(detail: impl Into<String>) -> Self {
        Self {
            stage: VerifyStage::Parts,
            detail: detail.into(),
        }
    }

    pub fn decrypt(detail: impl Into<String>) -> Self {
        Self {
            stage: VerifyStage::Decrypt,
            detail: detail.into(),
        }
    }

    pub fn structure(detail: impl Into<String>) -> Self {
        Self {
            stage: VerifyStage::Structure,
            detail: detail.into(),
        }
    }
}

/// The main error type for snapkeep operations
#[derive(Error, Debug)]
pub enum SnapkeepError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Another run holds the lock for the same job
    #[error("Job is locked: {0}")]
    Lock(String),

    /// The external archive producer failed
    #[error("Archive producer failed: {0}")]
    Producer(String),

    /// Archive verification failed
    #[error(transparent)]
    Verify(#[from] VerifyFailure),

    /// Vault unlock was rejected
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// An external collaborator command failed
    #[error("External tool failed: {0}")]
    Tool(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },
}

impl SnapkeepError {
    /// Create a "not found" error for jobs
    pub fn job_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Job",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for backup units
    pub fn unit_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Backup unit",
            identifier: identifier.into(),
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Check if this error must suppress pruning of existing units
    ///
    /// Producer and verification failures abort the run before the retention
    /// pass so the last-known-good units stay on disk.
    pub fn suppresses_prune(&self) -> bool {
        matches!(self, Self::Producer(_) | Self::Verify(_))
    }
}

// Implement From traits for common error types

impl From<std::io::Error> for SnapkeepError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for SnapkeepError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Result type alias for snapkeep operations
pub type SnapkeepResult<T> = Result<T, SnapkeepError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SnapkeepError::Config("test error".into());
        assert_eq!(err.to_string(), "Configuration error: test error");
    }

    #[test]
    fn test_not_found_error() {
        let err = SnapkeepError::job_not_found("nightly");
        assert_eq!(err.to_string(), "Job not found: nightly");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_verify_failure_stages() {
        let err = VerifyFailure::decrypt("bad passphrase");
        assert_eq!(err.stage, VerifyStage::Decrypt);
        assert_eq!(
            err.to_string(),
            "Verification failed at decrypt stage: bad passphrase"
        );

        let err = VerifyFailure::parts("payload.part-0002 missing");
        assert_eq!(err.stage, VerifyStage::Parts);
    }

    #[test]
    fn test_prune_suppression() {
        assert!(SnapkeepError::Producer("tar exited 2".into()).suppresses_prune());
        assert!(SnapkeepError::Verify(VerifyFailure::structure("truncated")).suppresses_prune());
        assert!(!SnapkeepError::Config("bad".into()).suppresses_prune());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SnapkeepError = io_err.into();
        assert!(matches!(err, SnapkeepError::Io(_)));
    }
}
