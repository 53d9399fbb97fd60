//! The backup run orchestrator
//!
//! Drives one job through the run state machine:
//!
//! ```text
//! IDLE -> CHECK_SPACE -> CHECK_CHANGE -> { SKIPPED
//!                                        | BACKUP -> VERIFY
//!                                          -> PROMOTE_REFERENCE -> PRUNE -> DONE }
//! ```
//!
//! Skips (not scheduled, insufficient space, no change) are clean exits.
//! Producer and verification failures are fatal and suppress the retention
//! pass so the last-known-good units survive. Archive parts are written to
//! a staging directory and renamed into place only after verification, so
//! an aborted run never leaves a half-promoted unit.

pub mod lock;
pub mod schedule;

use std::fmt;
use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{JobConfig, SnapkeepPaths};
use crate::detect::{self, ChangeStatus};
use crate::error::{SnapkeepError, SnapkeepResult};
use crate::retention::{self, BackupUnit, UnitManifest};
use crate::tools::archiver::Archiver;
use crate::tools::containers::{ContainerRuntime, RunningSet};
use crate::tools::copier::SnapshotCopier;
use crate::verify::{self, Decryptor, VerifySummary};

use self::lock::JobLock;

/// States of one orchestrated run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    CheckSpace,
    CheckChange,
    Backup,
    Verify,
    PromoteReference,
    Prune,
    Done,
    Skipped,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::CheckSpace => "check_space",
            RunState::CheckChange => "check_change",
            RunState::Backup => "backup",
            RunState::Verify => "verify",
            RunState::PromoteReference => "promote_reference",
            RunState::Prune => "prune",
            RunState::Done => "done",
            RunState::Skipped => "skipped",
            RunState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Why a run exited without producing a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The calendar predicate said the job is not due today
    NotScheduled,
    /// Destination free space is below the source size estimate
    InsufficientSpace { needed: u64, available: u64 },
    /// The source matches the reference snapshot
    NoChange,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotScheduled => write!(f, "not scheduled today"),
            SkipReason::InsufficientSpace { needed, available } => write!(
                f,
                "insufficient space: need {} bytes, {} available",
                needed, available
            ),
            SkipReason::NoChange => write!(f, "no change since last backup"),
        }
    }
}

/// What a completed run produced
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub unit_id: String,
    pub parts: usize,
    pub archive_bytes: u64,
    pub verified_entries: usize,
    pub removed: Vec<BackupUnit>,
}

/// Terminal result of a run that did not fail
#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunReport),
    Skipped(SkipReason),
}

/// Ties the detector, producer, verifier, and retention engine together
/// for one job
pub struct Orchestrator<'a> {
    job: &'a JobConfig,
    paths: &'a SnapkeepPaths,
    archiver: &'a dyn Archiver,
    copier: &'a dyn SnapshotCopier,
    decryptor: Option<&'a dyn Decryptor>,
    containers: Option<&'a dyn ContainerRuntime>,
    force: bool,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        job: &'a JobConfig,
        paths: &'a SnapkeepPaths,
        archiver: &'a dyn Archiver,
        copier: &'a dyn SnapshotCopier,
    ) -> Self {
        Self {
            job,
            paths,
            archiver,
            copier,
            decryptor: None,
            containers: None,
            force: false,
        }
    }

    /// Configure the decryptor used during verification
    pub fn with_decryptor(mut self, decryptor: &'a dyn Decryptor) -> Self {
        self.decryptor = Some(decryptor);
        self
    }

    /// Configure the container runtime used for quiescing
    pub fn with_containers(mut self, containers: &'a dyn ContainerRuntime) -> Self {
        self.containers = Some(containers);
        self
    }

    /// Bypass the schedule and change gates
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Execute one run
    ///
    /// `today` feeds the calendar predicate; `now` stamps the unit
    /// identifier. Both are passed in so runs are reproducible in tests.
    pub fn execute(&self, today: NaiveDate, now: DateTime<Utc>) -> SnapkeepResult<RunOutcome> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("run", job = %self.job.name, run = %run_id);
        let _guard = span.enter();

        let mut state = RunState::Idle;
        let result = self.drive(&mut state, run_id, today, now);
        match &result {
            Ok(RunOutcome::Completed(report)) => {
                info!(unit = %report.unit_id, pruned = report.removed.len(), "run completed");
            }
            Ok(RunOutcome::Skipped(reason)) => {
                advance(&mut state, RunState::Skipped);
                info!(%reason, "run skipped");
            }
            Err(e) => {
                advance(&mut state, RunState::Failed);
                warn!(error = %e, "run failed");
            }
        }
        result
    }

    fn drive(
        &self,
        state: &mut RunState,
        run_id: Uuid,
        today: NaiveDate,
        now: DateTime<Utc>,
    ) -> SnapkeepResult<RunOutcome> {
        if !self.force && !self.job.schedule.is_due(today) {
            return Ok(RunOutcome::Skipped(SkipReason::NotScheduled));
        }

        let _lock = JobLock::acquire(&self.paths.lock_file(&self.job.name))?;

        fs::create_dir_all(&self.job.destination)
            .map_err(|e| SnapkeepError::Io(format!("Failed to create destination: {}", e)))?;

        advance(state, RunState::CheckSpace);
        let needed = estimate_tree_size(&self.job.source);
        let available = available_space(&self.job.destination);
        if let Some(reason) = space_shortfall(needed, available) {
            return Ok(RunOutcome::Skipped(reason));
        }

        advance(state, RunState::CheckChange);
        let reference = self.paths.reference_dir(&self.job.name);
        if !self.force {
            match detect::compare(&self.job.source, &reference, self.job.change_policy) {
                ChangeStatus::Unchanged => {
                    return Ok(RunOutcome::Skipped(SkipReason::NoChange));
                }
                ChangeStatus::Unknown(reason) => {
                    warn!(%reason, "change detection inconclusive, proceeding with backup");
                }
                ChangeStatus::Changed(summary) => {
                    info!(%summary, "source changed since reference");
                }
            }
        }

        let quiesced: Option<RunningSet> = match (self.job.quiesce_containers, self.containers) {
            (true, Some(runtime)) => Some(runtime.stop_running()?),
            (true, None) => {
                warn!("quiesce requested but no container runtime configured");
                None
            }
            _ => None,
        };

        let produced = self.backup_and_verify(state, now);

        // Restart exactly the set that was stopped, on every path.
        if let (Some(set), Some(runtime)) = (&quiesced, self.containers) {
            if let Err(e) = runtime.start(set) {
                warn!(error = %e, "failed to restart quiesced containers");
                if produced.is_ok() {
                    return Err(e);
                }
            }
        }
        let (unit_id, archive_bytes, summary) = produced?;

        advance(state, RunState::PromoteReference);
        self.promote_reference(&reference)?;

        advance(state, RunState::Prune);
        let units = retention::scan_units(&self.job.destination, &self.job.name)?;
        let removed = retention::prune(&units, self.job.keep as usize)?;

        advance(state, RunState::Done);
        Ok(RunOutcome::Completed(RunReport {
            run_id,
            unit_id,
            parts: summary.parts,
            archive_bytes,
            verified_entries: summary.entries,
            removed,
        }))
    }

    /// Produce parts into staging, verify them, and commit the unit
    fn backup_and_verify(
        &self,
        state: &mut RunState,
        now: DateTime<Utc>,
    ) -> SnapkeepResult<(String, u64, VerifySummary)> {
        advance(state, RunState::Backup);

        let unit_id = retention::unit_id(&self.job.name, now);
        let staging = self.job.destination.join(format!(".staging-{}", unit_id));
        if staging.exists() {
            // Left behind by an aborted run; it was never promoted.
            fs::remove_dir_all(&staging)
                .map_err(|e| SnapkeepError::Io(format!("Failed to clear stale staging: {}", e)))?;
        }
        fs::create_dir_all(&staging)
            .map_err(|e| SnapkeepError::Io(format!("Failed to create staging: {}", e)))?;

        let result = self.fill_staging(state, &staging, &unit_id, now);
        if result.is_err() {
            let _ = fs::remove_dir_all(&staging);
            return result;
        }

        let final_dir = self.job.destination.join(&unit_id);
        if let Err(e) = fs::rename(&staging, &final_dir) {
            let _ = fs::remove_dir_all(&staging);
            return Err(SnapkeepError::Io(format!(
                "Failed to promote unit {}: {}",
                unit_id, e
            )));
        }

        result
    }

    fn fill_staging(
        &self,
        state: &mut RunState,
        staging: &Path,
        unit_id: &str,
        now: DateTime<Utc>,
    ) -> SnapkeepResult<(String, u64, VerifySummary)> {
        let produced = self.archiver.produce(&self.job.source, staging)?;
        let archive_bytes: u64 = produced.parts.iter().map(|p| p.bytes).sum();

        let manifest = UnitManifest {
            schema_version: 1,
            id: unit_id.to_string(),
            job: self.job.name.clone(),
            created_at: now,
            encrypted: produced.encrypted,
            parts: produced.parts,
        };
        manifest.save(staging)?;

        advance(state, RunState::Verify);
        let summary = verify::verify_unit(staging, self.decryptor)?;
        debug!(
            entries = summary.entries,
            bytes = summary.bytes,
            "staged unit verified"
        );

        Ok((unit_id.to_string(), archive_bytes, summary))
    }

    /// Replace the reference snapshot with the just-backed-up source state
    ///
    /// The new reference is built aside (hard-linking unchanged files
    /// against the old one) and swapped in with renames, so a crash leaves
    /// either the old or the new reference, never a torn one.
    fn promote_reference(&self, reference: &Path) -> SnapkeepResult<()> {
        let next = self.paths.reference_next_dir(&self.job.name);
        if next.exists() {
            fs::remove_dir_all(&next)
                .map_err(|e| SnapkeepError::Io(format!("Failed to clear stale reference: {}", e)))?;
        }
        if let Some(parent) = next.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| SnapkeepError::Io(format!("Failed to create references dir: {}", e)))?;
        }

        let link_dest = reference.exists().then_some(reference);
        self.copier.snapshot(&self.job.source, &next, link_dest)?;

        let old = reference.with_file_name(format!("{}.old", self.job.name));
        if old.exists() {
            fs::remove_dir_all(&old)
                .map_err(|e| SnapkeepError::Io(format!("Failed to clear old reference: {}", e)))?;
        }
        if reference.exists() {
            fs::rename(reference, &old)
                .map_err(|e| SnapkeepError::Io(format!("Failed to retire reference: {}", e)))?;
        }
        fs::rename(&next, reference)
            .map_err(|e| SnapkeepError::Io(format!("Failed to install reference: {}", e)))?;
        if old.exists() {
            fs::remove_dir_all(&old)
                .map_err(|e| SnapkeepError::Io(format!("Failed to remove old reference: {}", e)))?;
        }
        Ok(())
    }
}

fn advance(state: &mut RunState, next: RunState) {
    debug!(from = %state, to = %next, "state transition");
    *state = next;
}

/// Decide whether the space check blocks the run
///
/// Inconclusive probes (either side `None`) do not block: the safe
/// direction is to attempt the backup rather than silently skip it.
fn space_shortfall(needed: Option<u64>, available: Option<u64>) -> Option<SkipReason> {
    match (needed, available) {
        (Some(needed), Some(available)) if available < needed => {
            Some(SkipReason::InsufficientSpace { needed, available })
        }
        (None, _) | (_, None) => {
            warn!("space probe inconclusive, proceeding");
            None
        }
        _ => None,
    }
}

/// Total size of regular files under a root; `None` when the walk fails
pub fn estimate_tree_size(root: &Path) -> Option<u64> {
    let mut total = 0u64;
    for entry in walkdir::WalkDir::new(root).follow_links(false) {
        let entry = entry.ok()?;
        if entry.file_type().is_file() {
            total += entry.metadata().ok()?.len();
        }
    }
    Some(total)
}

/// Free bytes on the filesystem holding `path`; `None` when unknown
#[cfg(unix)]
pub fn available_space(path: &Path) -> Option<u64> {
    nix::sys::statvfs::statvfs(path)
        .ok()
        .map(|stat| stat.blocks_available() as u64 * stat.fragment_size() as u64)
}

#[cfg(not(unix))]
pub fn available_space(_path: &Path) -> Option<u64> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChangePolicy, JobConfig};
    use crate::detect::sha256_hex;
    use crate::error::VerifyStage;
    use crate::retention::PartInfo;
    use crate::tools::archiver::ArchiveOutcome;
    use chrono::TimeZone;
    use std::cell::RefCell;
    use std::path::PathBuf;
    use tempfile::TempDir;

    /// In-process producer: a real tar stream split into small parts
    struct FakeArchiver {
        part_size: usize,
        corrupt: bool,
    }

    impl FakeArchiver {
        fn good() -> Self {
            Self {
                part_size: 1000,
                corrupt: false,
            }
        }

        fn corrupt() -> Self {
            Self {
                part_size: 1000,
                corrupt: true,
            }
        }
    }

    impl Archiver for FakeArchiver {
        fn produce(&self, source: &Path, staging: &Path) -> SnapkeepResult<ArchiveOutcome> {
            let mut builder = tar::Builder::new(Vec::new());
            builder.append_dir_all(".", source).map_err(|e| {
                SnapkeepError::Producer(format!("tar build failed: {}", e))
            })?;
            let payload = builder
                .into_inner()
                .map_err(|e| SnapkeepError::Producer(e.to_string()))?;

            let mut parts = Vec::new();
            for (i, chunk) in payload.chunks(self.part_size).enumerate() {
                let name = format!("payload.part-{:04}", i);
                fs::write(staging.join(&name), chunk)
                    .map_err(|e| SnapkeepError::Io(e.to_string()))?;
                parts.push(PartInfo {
                    name,
                    bytes: chunk.len() as u64,
                    sha256: sha256_hex(chunk),
                });
            }

            if self.corrupt {
                // Damage one byte after checksumming, as on-disk rot would.
                let victim = staging.join(&parts[0].name);
                let mut bytes = fs::read(&victim).map_err(|e| SnapkeepError::Io(e.to_string()))?;
                bytes[10] ^= 0xff;
                fs::write(&victim, bytes).map_err(|e| SnapkeepError::Io(e.to_string()))?;
            }

            Ok(ArchiveOutcome {
                parts,
                encrypted: false,
            })
        }
    }

    struct FailingArchiver;

    impl Archiver for FailingArchiver {
        fn produce(&self, _source: &Path, _staging: &Path) -> SnapkeepResult<ArchiveOutcome> {
            Err(SnapkeepError::Producer("tar exited with status 2".into()))
        }
    }

    /// Pure-fs copier standing in for rsync
    struct FakeCopier;

    fn copy_tree(source: &Path, dest: &Path) -> std::io::Result<()> {
        fs::create_dir_all(dest)?;
        for entry in walkdir::WalkDir::new(source) {
            let entry = entry.map_err(std::io::Error::other)?;
            let rel = entry
                .path()
                .strip_prefix(source)
                .map_err(std::io::Error::other)?;
            if rel.as_os_str().is_empty() {
                continue;
            }
            let target = dest.join(rel);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target)?;
            } else {
                fs::copy(entry.path(), &target)?;
            }
        }
        Ok(())
    }

    impl SnapshotCopier for FakeCopier {
        fn mirror(&self, source: &Path, dest: &Path) -> SnapkeepResult<()> {
            if dest.exists() {
                fs::remove_dir_all(dest).map_err(|e| SnapkeepError::Io(e.to_string()))?;
            }
            copy_tree(source, dest).map_err(|e| SnapkeepError::Io(e.to_string()))
        }

        fn snapshot(
            &self,
            source: &Path,
            dest: &Path,
            _link_dest: Option<&Path>,
        ) -> SnapkeepResult<()> {
            copy_tree(source, dest).map_err(|e| SnapkeepError::Io(e.to_string()))
        }
    }

    struct FakeRuntime {
        running: Vec<String>,
        stopped: RefCell<Vec<String>>,
        started: RefCell<Vec<String>>,
    }

    impl FakeRuntime {
        fn new(names: &[&str]) -> Self {
            Self {
                running: names.iter().map(|s| s.to_string()).collect(),
                stopped: RefCell::new(Vec::new()),
                started: RefCell::new(Vec::new()),
            }
        }
    }

    impl ContainerRuntime for FakeRuntime {
        fn running(&self) -> SnapkeepResult<RunningSet> {
            Ok(RunningSet(self.running.clone()))
        }

        fn stop(&self, set: &RunningSet) -> SnapkeepResult<()> {
            self.stopped.borrow_mut().extend(set.0.iter().cloned());
            Ok(())
        }

        fn start(&self, set: &RunningSet) -> SnapkeepResult<()> {
            self.started.borrow_mut().extend(set.0.iter().cloned());
            Ok(())
        }
    }

    struct Fixture {
        _root: TempDir,
        job: JobConfig,
        paths: SnapkeepPaths,
    }

    fn fixture(keep: u32) -> Fixture {
        let root = TempDir::new().unwrap();
        let source = root.path().join("source");
        fs::create_dir_all(&source).unwrap();
        fs::write(source.join("a.txt"), b"alpha").unwrap();
        fs::create_dir_all(source.join("sub")).unwrap();
        fs::write(source.join("sub/b.txt"), b"beta").unwrap();

        let paths = SnapkeepPaths::with_base_dir(root.path().join("state"));
        paths.ensure_directories().unwrap();

        let job = JobConfig {
            name: "nightly".into(),
            source,
            destination: root.path().join("backups"),
            keep,
            schedule: schedule::Schedule::Always,
            change_policy: ChangePolicy::Content,
            split_size: None,
            encryption: None,
            quiesce_containers: false,
        };

        Fixture {
            _root: root,
            job,
            paths,
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, d).unwrap()
    }

    fn at(d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, d, h, 0, 0).unwrap()
    }

    fn unit_dirs(dest: &Path) -> Vec<String> {
        retention::scan_units(dest, "nightly")
            .unwrap()
            .into_iter()
            .map(|u| u.id)
            .collect()
    }

    #[test]
    fn test_first_run_completes_and_promotes() {
        let fx = fixture(3);
        let archiver = FakeArchiver::good();
        let orchestrator = Orchestrator::new(&fx.job, &fx.paths, &archiver, &FakeCopier);

        let outcome = orchestrator.execute(day(5), at(5, 3)).unwrap();
        let report = match outcome {
            RunOutcome::Completed(report) => report,
            other => panic!("expected Completed, got {:?}", other),
        };

        assert_eq!(report.unit_id, "nightly-20260105-030000");
        assert!(report.verified_entries > 0);
        assert!(report.removed.is_empty());

        let unit_dir = fx.job.destination.join(&report.unit_id);
        assert!(unit_dir.join("unit.json").exists());
        assert!(unit_dir.join("payload.part-0000").exists());

        // Reference snapshot now mirrors the source.
        let reference = fx.paths.reference_dir("nightly");
        assert!(reference.join("a.txt").exists());
        assert!(reference.join("sub/b.txt").exists());

        // No staging left behind.
        assert!(!fx.job.destination.join(".staging-nightly-20260105-030000").exists());
    }

    #[test]
    fn test_unchanged_source_skips() {
        let fx = fixture(3);
        let archiver = FakeArchiver::good();
        let orchestrator = Orchestrator::new(&fx.job, &fx.paths, &archiver, &FakeCopier);

        orchestrator.execute(day(5), at(5, 3)).unwrap();
        let outcome = orchestrator.execute(day(6), at(6, 3)).unwrap();

        assert!(matches!(
            outcome,
            RunOutcome::Skipped(SkipReason::NoChange)
        ));
        assert_eq!(unit_dirs(&fx.job.destination).len(), 1);
    }

    #[test]
    fn test_changed_source_backs_up_again_and_prunes() {
        let fx = fixture(1);
        let archiver = FakeArchiver::good();
        let orchestrator = Orchestrator::new(&fx.job, &fx.paths, &archiver, &FakeCopier);

        orchestrator.execute(day(5), at(5, 3)).unwrap();
        fs::write(fx.job.source.join("a.txt"), b"ALPHA CHANGED").unwrap();
        let outcome = orchestrator.execute(day(6), at(6, 3)).unwrap();

        let report = match outcome {
            RunOutcome::Completed(report) => report,
            other => panic!("expected Completed, got {:?}", other),
        };
        assert_eq!(report.removed.len(), 1);
        assert_eq!(report.removed[0].id, "nightly-20260105-030000");
        assert_eq!(
            unit_dirs(&fx.job.destination),
            vec!["nightly-20260106-030000"]
        );
    }

    #[test]
    fn test_not_scheduled_skips_before_anything_else() {
        let mut fx = fixture(3);
        fx.job.schedule = schedule::Schedule::DayOfMonth { days: vec![1] };
        let archiver = FakeArchiver::good();
        let orchestrator = Orchestrator::new(&fx.job, &fx.paths, &archiver, &FakeCopier);

        let outcome = orchestrator.execute(day(2), at(2, 3)).unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::Skipped(SkipReason::NotScheduled)
        ));
        assert!(unit_dirs(&fx.job.destination).is_empty());
    }

    #[test]
    fn test_force_bypasses_schedule_and_change_gates() {
        let mut fx = fixture(3);
        fx.job.schedule = schedule::Schedule::DayOfMonth { days: vec![1] };
        let archiver = FakeArchiver::good();
        let orchestrator =
            Orchestrator::new(&fx.job, &fx.paths, &archiver, &FakeCopier).with_force(true);

        orchestrator.execute(day(2), at(2, 3)).unwrap();
        let outcome = orchestrator.execute(day(2), at(2, 4)).unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(_)));
        assert_eq!(unit_dirs(&fx.job.destination).len(), 2);
    }

    #[test]
    fn test_producer_failure_cleans_staging_and_preserves_units() {
        let fx = fixture(3);
        let good = FakeArchiver::good();
        Orchestrator::new(&fx.job, &fx.paths, &good, &FakeCopier)
            .execute(day(5), at(5, 3))
            .unwrap();

        fs::write(fx.job.source.join("a.txt"), b"changed").unwrap();
        let err = Orchestrator::new(&fx.job, &fx.paths, &FailingArchiver, &FakeCopier)
            .execute(day(6), at(6, 3))
            .unwrap_err();

        assert!(matches!(err, SnapkeepError::Producer(_)));
        assert!(err.suppresses_prune());
        assert_eq!(
            unit_dirs(&fx.job.destination),
            vec!["nightly-20260105-030000"]
        );
        assert!(!fx
            .job
            .destination
            .join(".staging-nightly-20260106-030000")
            .exists());
    }

    #[test]
    fn test_verify_failure_preserves_existing_units() {
        let fx = fixture(3);
        let good = FakeArchiver::good();
        Orchestrator::new(&fx.job, &fx.paths, &good, &FakeCopier)
            .execute(day(5), at(5, 3))
            .unwrap();

        fs::write(fx.job.source.join("a.txt"), b"changed").unwrap();
        let corrupt = FakeArchiver::corrupt();
        let err = Orchestrator::new(&fx.job, &fx.paths, &corrupt, &FakeCopier)
            .execute(day(6), at(6, 3))
            .unwrap_err();

        match err {
            SnapkeepError::Verify(failure) => assert_eq!(failure.stage, VerifyStage::Structure),
            other => panic!("expected Verify, got {:?}", other),
        }

        // Last-known-good unit intact, no staging, no new unit.
        assert_eq!(
            unit_dirs(&fx.job.destination),
            vec!["nightly-20260105-030000"]
        );
        assert!(!fx
            .job
            .destination
            .join(".staging-nightly-20260106-030000")
            .exists());
    }

    #[test]
    fn test_verify_failure_leaves_reference_untouched() {
        let fx = fixture(3);
        let good = FakeArchiver::good();
        Orchestrator::new(&fx.job, &fx.paths, &good, &FakeCopier)
            .execute(day(5), at(5, 3))
            .unwrap();

        fs::write(fx.job.source.join("a.txt"), b"changed").unwrap();
        let corrupt = FakeArchiver::corrupt();
        let _ = Orchestrator::new(&fx.job, &fx.paths, &corrupt, &FakeCopier)
            .execute(day(6), at(6, 3));

        // Reference still holds the old content, so the next good run
        // sees the change again.
        let reference = fx.paths.reference_dir("nightly");
        assert_eq!(fs::read(reference.join("a.txt")).unwrap(), b"alpha");
    }

    #[test]
    fn test_quiesced_containers_restart_on_success() {
        let mut fx = fixture(3);
        fx.job.quiesce_containers = true;
        let archiver = FakeArchiver::good();
        let runtime = FakeRuntime::new(&["web", "db"]);
        let orchestrator = Orchestrator::new(&fx.job, &fx.paths, &archiver, &FakeCopier)
            .with_containers(&runtime);

        orchestrator.execute(day(5), at(5, 3)).unwrap();

        assert_eq!(*runtime.stopped.borrow(), vec!["web", "db"]);
        assert_eq!(*runtime.started.borrow(), vec!["web", "db"]);
    }

    #[test]
    fn test_quiesced_containers_restart_on_failure() {
        let mut fx = fixture(3);
        fx.job.quiesce_containers = true;
        let runtime = FakeRuntime::new(&["web"]);
        let orchestrator = Orchestrator::new(&fx.job, &fx.paths, &FailingArchiver, &FakeCopier)
            .with_containers(&runtime);

        let _ = orchestrator.execute(day(5), at(5, 3)).unwrap_err();

        assert_eq!(*runtime.stopped.borrow(), vec!["web"]);
        assert_eq!(*runtime.started.borrow(), vec!["web"]);
    }

    #[test]
    fn test_space_shortfall_logic() {
        assert!(space_shortfall(Some(100), Some(50)).is_some());
        assert!(space_shortfall(Some(100), Some(100)).is_none());
        assert!(space_shortfall(Some(100), Some(1000)).is_none());
        // Inconclusive probes never block the run.
        assert!(space_shortfall(None, Some(10)).is_none());
        assert!(space_shortfall(Some(10), None).is_none());
    }

    #[test]
    fn test_estimate_tree_size() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a"), vec![0u8; 100]).unwrap();
        fs::create_dir(temp.path().join("d")).unwrap();
        fs::write(temp.path().join("d/b"), vec![0u8; 50]).unwrap();

        assert_eq!(estimate_tree_size(temp.path()), Some(150));
        assert!(estimate_tree_size(&PathBuf::from("/no/such/tree")).is_none());
    }

    #[test]
    fn test_concurrent_run_is_rejected() {
        let fx = fixture(3);
        let archiver = FakeArchiver::good();
        let orchestrator = Orchestrator::new(&fx.job, &fx.paths, &archiver, &FakeCopier);

        let _held = JobLock::acquire(&fx.paths.lock_file("nightly")).unwrap();
        let err = orchestrator.execute(day(5), at(5, 3)).unwrap_err();
        assert!(matches!(err, SnapkeepError::Lock(_)));
    }
}
