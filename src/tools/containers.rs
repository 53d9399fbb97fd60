//! Container lifecycle control around a backup
//!
//! The set of workloads running at quiesce time is captured as an explicit
//! value and threaded back into the restart, so exactly the containers
//! that were stopped come back, never an indiscriminate start-all.

use std::process::Command;

use tracing::info;

use crate::error::SnapkeepResult;
use crate::tools::command::{run_capture, run_checked};

/// The workloads that were running when the quiesce began
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunningSet(pub Vec<String>);

impl RunningSet {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn names(&self) -> &[String] {
        &self.0
    }
}

/// Seam for the container runtime
pub trait ContainerRuntime {
    /// Enumerate currently running workloads
    fn running(&self) -> SnapkeepResult<RunningSet>;

    /// Stop the given set
    fn stop(&self, set: &RunningSet) -> SnapkeepResult<()>;

    /// Start the given set
    fn start(&self, set: &RunningSet) -> SnapkeepResult<()>;

    /// Capture the running set and stop it, returning the set for the
    /// matching restart
    fn stop_running(&self) -> SnapkeepResult<RunningSet> {
        let set = self.running()?;
        if !set.is_empty() {
            info!(count = set.0.len(), "quiescing running containers");
            self.stop(&set)?;
        }
        Ok(set)
    }
}

/// docker-compatible runtime
pub struct DockerRuntime {
    program: String,
}

impl DockerRuntime {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl ContainerRuntime for DockerRuntime {
    fn running(&self) -> SnapkeepResult<RunningSet> {
        let mut command = Command::new(&self.program);
        command.args(["ps", "--format", "{{.Names}}"]);
        let stdout = run_capture(&mut command, "docker ps")?;
        Ok(RunningSet(parse_names(&stdout)))
    }

    fn stop(&self, set: &RunningSet) -> SnapkeepResult<()> {
        if set.is_empty() {
            return Ok(());
        }
        let mut command = Command::new(&self.program);
        command.arg("stop").args(set.names());
        run_checked(&mut command, "docker stop")
    }

    fn start(&self, set: &RunningSet) -> SnapkeepResult<()> {
        if set.is_empty() {
            return Ok(());
        }
        let mut command = Command::new(&self.program);
        command.arg("start").args(set.names());
        run_checked(&mut command, "docker start")
    }
}

/// Parse one workload name per line, ignoring blanks
pub(crate) fn parse_names(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
