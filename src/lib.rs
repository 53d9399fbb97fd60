//! snapkeep - Tiered backup orchestration
//!
//! This library provides the core functionality for the snapkeep backup
//! orchestrator. The heavy lifting (archiving, copying, encryption,
//! container lifecycle, vault export) is delegated to external commands;
//! snapkeep owns the recurring logic around them: change detection before
//! expensive work, calendar-gated retention, and streaming verification of
//! encrypted, split archives.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Configuration and path management
//! - `error`: Custom error types
//! - `detect`: Change detection against reference snapshots
//! - `retention`: Backup units and pruning
//! - `verify`: Streaming archive verification
//! - `run`: The per-job run orchestrator, locking, and scheduling
//! - `tools`: Seams for the external collaborators
//! - `secrets`: Zeroized holders for passphrases and session tokens
//! - `cli`: Command handlers
//!
//! # Example
//!
//! ```rust,ignore
//! use snapkeep::config::{Config, SnapkeepPaths};
//!
//! let paths = SnapkeepPaths::new()?;
//! let config = Config::load_or_create(&paths)?;
//! ```

pub mod cli;
pub mod config;
pub mod detect;
pub mod error;
pub mod retention;
pub mod run;
pub mod secrets;
pub mod tools;
pub mod verify;

pub use error::SnapkeepError;
