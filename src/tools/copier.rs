//! The external snapshot copier
//!
//! Two rsync idioms: a plain mirror that deletes extraneous files, and a
//! snapshot that hard-links unchanged files against a previous version so
//! only deltas cost space.

use std::path::Path;
use std::process::Command;

use crate::error::SnapkeepResult;
use crate::tools::command::run_checked;

/// Seam for the snapshot/mirror copier
pub trait SnapshotCopier {
    /// Make `dest` an exact mirror of `source`, deleting extraneous files
    fn mirror(&self, source: &Path, dest: &Path) -> SnapkeepResult<()>;

    /// Copy `source` into `dest`, hard-linking unchanged files found in
    /// `link_dest` when given
    fn snapshot(&self, source: &Path, dest: &Path, link_dest: Option<&Path>) -> SnapkeepResult<()>;
}

/// rsync-backed copier
pub struct RsyncCopier {
    program: String,
}

impl RsyncCopier {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for RsyncCopier {
    fn default() -> Self {
        Self::new("rsync")
    }
}

impl SnapshotCopier for RsyncCopier {
    fn mirror(&self, source: &Path, dest: &Path) -> SnapkeepResult<()> {
        let mut command = Command::new(&self.program);
        command
            .arg("-a")
            .arg("--delete")
            .arg(with_trailing_slash(source))
            .arg(dest);
        run_checked(&mut command, "rsync mirror")
    }

    fn snapshot(&self, source: &Path, dest: &Path, link_dest: Option<&Path>) -> SnapkeepResult<()> {
        let mut command = Command::new(&self.program);
        command.arg("-a");
        if let Some(link) = link_dest {
            command.arg(format!("--link-dest={}", link.display()));
        }
        command.arg(with_trailing_slash(source)).arg(dest);
        run_checked(&mut command, "rsync snapshot")
    }
}

/// rsync treats `dir` and `dir/` differently; the slash means "contents of"
fn with_trailing_slash(path: &Path) -> String {
    format!("{}/", path.display())
}
