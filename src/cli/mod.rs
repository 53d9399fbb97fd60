//! CLI command handlers
//!
//! This module contains the implementation of CLI commands,
//! bridging the clap argument parsing with the orchestration layer.

pub mod run;
pub mod units;
pub mod vault;
pub mod verify;

pub use run::{handle_run_command, RunArgs};
pub use units::{handle_units_command, UnitsCommands};
pub use vault::{handle_vault_command, VaultCommands};
pub use verify::handle_verify_command;
