//! Configuration module for snapkeep
//!
//! This module provides configuration management including:
//! - XDG-compliant path resolution
//! - Structured job definitions with startup validation

pub mod paths;
pub mod settings;

pub use paths::SnapkeepPaths;
pub use settings::{ChangePolicy, CipherCommand, Config, EncryptionConfig, JobConfig, VaultConfig};
