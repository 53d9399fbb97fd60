//! Run CLI command
//!
//! Wires the configured jobs into orchestrated runs against the real
//! external collaborators (tar, rsync, docker, the configured cipher).

use chrono::{DateTime, Local, NaiveDate, Utc};

use crate::config::{Config, JobConfig, SnapkeepPaths};
use crate::error::{SnapkeepError, SnapkeepResult};
use crate::run::{Orchestrator, RunOutcome};
use crate::tools::{CommandCipher, DockerRuntime, RsyncCopier, TarArchiver};

use super::units::format_size;

/// Arguments for `snapkeep run`
pub struct RunArgs {
    /// Job to run; `None` together with `all` runs every job
    pub job: Option<String>,
    /// Run every configured job sequentially
    pub all: bool,
    /// Calendar date fed to the schedule predicates (defaults to today)
    pub date: Option<NaiveDate>,
    /// Bypass the schedule and change gates
    pub force: bool,
}

/// Handle a run command
pub fn handle_run_command(
    paths: &SnapkeepPaths,
    config: &Config,
    args: RunArgs,
) -> SnapkeepResult<()> {
    let today = args.date.unwrap_or_else(|| Local::now().date_naive());
    let now = Utc::now();

    let jobs: Vec<&JobConfig> = if args.all {
        config.jobs.iter().collect()
    } else {
        let name = args
            .job
            .as_deref()
            .ok_or_else(|| SnapkeepError::Config("Specify a job name or --all".into()))?;
        vec![config
            .job(name)
            .ok_or_else(|| SnapkeepError::job_not_found(name))?]
    };

    if jobs.is_empty() {
        println!("No jobs configured.");
        println!("Run 'snapkeep init' to write a starter configuration.");
        return Ok(());
    }

    for job in jobs {
        run_one(paths, job, today, now, args.force)?;
    }

    Ok(())
}

fn run_one(
    paths: &SnapkeepPaths,
    job: &JobConfig,
    today: NaiveDate,
    now: DateTime<Utc>,
    force: bool,
) -> SnapkeepResult<()> {
    let archiver = TarArchiver::from_job(job);
    let copier = RsyncCopier::default();
    let decryptor = job
        .encryption
        .as_ref()
        .map(|enc| CommandCipher::new(enc.decrypt.clone()));
    let runtime = DockerRuntime::default();

    let mut orchestrator = Orchestrator::new(job, paths, &archiver, &copier).with_force(force);
    if let Some(decryptor) = &decryptor {
        orchestrator = orchestrator.with_decryptor(decryptor);
    }
    if job.quiesce_containers {
        orchestrator = orchestrator.with_containers(&runtime);
    }

    match orchestrator.execute(today, now)? {
        RunOutcome::Completed(report) => {
            println!(
                "{}: backed up as {} ({} in {} part(s), {} entries verified)",
                job.name,
                report.unit_id,
                format_size(report.archive_bytes),
                report.parts,
                report.verified_entries,
            );
            if !report.removed.is_empty() {
                println!(
                    "{}: pruned {} old unit(s): {}",
                    job.name,
                    report.removed.len(),
                    report
                        .removed
                        .iter()
                        .map(|u| u.id.as_str())
                        .collect::<Vec<_>>()
                        .join(", "),
                );
            }
        }
        RunOutcome::Skipped(reason) => {
            println!("{}: skipped ({})", job.name, reason);
        }
    }

    Ok(())
}
