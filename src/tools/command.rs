//! Helpers for running external commands
//!
//! Success means exit status zero; anything else surfaces stderr in the
//! error. Stdout is treated as the command's result.

use std::process::{Command, Output};

use crate::error::{SnapkeepError, SnapkeepResult};

/// Run a command to completion and return its stdout as a string
pub fn run_capture(command: &mut Command, what: &str) -> SnapkeepResult<String> {
    let output = run(command, what)?;
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Run a command to completion, discarding stdout
pub fn run_checked(command: &mut Command, what: &str) -> SnapkeepResult<()> {
    run(command, what).map(|_| ())
}

fn run(command: &mut Command, what: &str) -> SnapkeepResult<Output> {
    let output = command
        .output()
        .map_err(|e| SnapkeepError::Tool(format!("{}: failed to start: {}", what, e)))?;

    if output.status.success() {
        Ok(output)
    } else {
        Err(SnapkeepError::Tool(format!(
            "{}: {} ({})",
            what,
            String::from_utf8_lossy(&output.stderr).trim(),
            output.status
        )))
    }
}
