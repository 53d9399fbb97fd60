//! Per-job advisory locking
//!
//! Two concurrent runs against the same job could corrupt the reference
//! snapshot or double-prune, so each run takes a lock file for its job.
//! The file holds the owner's PID; a lock left behind by a dead process is
//! taken over.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{SnapkeepError, SnapkeepResult};

/// Held for the duration of one run; releases on drop
#[derive(Debug)]
pub struct JobLock {
    path: PathBuf,
}

impl JobLock {
    /// Acquire the lock, taking over a stale one if its holder is gone
    pub fn acquire(path: &Path) -> SnapkeepResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SnapkeepError::Io(format!("Failed to create lock directory: {}", e)))?;
        }

        for attempt in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut file) => {
                    let _ = write!(file, "{}", std::process::id());
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let holder = fs::read_to_string(path)
                        .ok()
                        .and_then(|s| s.trim().parse::<i32>().ok());

                    if attempt == 0 && holder.map_or(true, |pid| !process_alive(pid)) {
                        warn!(lock = %path.display(), "removing stale lock file");
                        let _ = fs::remove_file(path);
                        continue;
                    }

                    return Err(SnapkeepError::Lock(format!(
                        "{} is held by pid {}",
                        path.display(),
                        holder.map_or_else(|| "unknown".to_string(), |p| p.to_string())
                    )));
                }
                Err(e) => {
                    return Err(SnapkeepError::Io(format!(
                        "Failed to create lock {}: {}",
                        path.display(),
                        e
                    )))
                }
            }
        }

        Err(SnapkeepError::Lock(format!(
            "{} could not be acquired",
            path.display()
        )))
    }
}

impl Drop for JobLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(unix)]
fn process_alive(pid: i32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // Signal 0 probes existence; EPERM still means the process exists.
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: i32) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_acquire_and_release() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("job.lock");

        {
            let _lock = JobLock::acquire(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn test_second_acquire_fails_while_held() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("job.lock");

        let _lock = JobLock::acquire(&path).unwrap();
        let err = JobLock::acquire(&path).unwrap_err();
        assert!(matches!(err, SnapkeepError::Lock(_)));
    }

    #[test]
    fn test_stale_lock_is_taken_over() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("job.lock");

        // A lock owned by a PID that cannot be running.
        fs::write(&path, "999999999").unwrap();

        let _lock = JobLock::acquire(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_garbage_lock_contents_are_treated_as_stale() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("job.lock");
        fs::write(&path, "not-a-pid").unwrap();

        let _lock = JobLock::acquire(&path).unwrap();
    }

    #[test]
    fn test_creates_parent_directory() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("locks").join("job.lock");
        let _lock = JobLock::acquire(&path).unwrap();
        assert!(path.exists());
    }
}
