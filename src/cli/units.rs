//! Backup unit CLI commands
//!
//! Listing and pruning of retained backup units.

use clap::Subcommand;

use crate::config::{Config, JobConfig};
use crate::error::{SnapkeepError, SnapkeepResult};
use crate::retention::{prune, scan_units, select_expired, BackupUnit};

/// Unit subcommands
#[derive(Subcommand)]
pub enum UnitsCommands {
    /// List retained backup units
    List {
        /// Restrict to one job
        job: Option<String>,

        /// Show detailed information
        #[arg(short, long)]
        verbose: bool,
    },

    /// Delete old units according to the job's keep-count
    Prune {
        /// Job whose units should be pruned
        job: String,

        /// Skip the dry-run and actually delete
        #[arg(short, long)]
        force: bool,
    },
}

/// Handle a units command
pub fn handle_units_command(config: &Config, cmd: UnitsCommands) -> SnapkeepResult<()> {
    match cmd {
        UnitsCommands::List { job, verbose } => {
            let jobs: Vec<&JobConfig> = match &job {
                Some(name) => vec![config
                    .job(name)
                    .ok_or_else(|| SnapkeepError::job_not_found(name.clone()))?],
                None => config.jobs.iter().collect(),
            };

            let mut total = 0usize;
            for job in jobs {
                let units = scan_units(&job.destination, &job.name)?;
                if units.is_empty() {
                    continue;
                }
                println!("{} ({} of keep {})", job.name, units.len(), job.keep);
                for unit in &units {
                    print_unit(unit, verbose);
                }
                println!();
                total += units.len();
            }

            if total == 0 {
                println!("No backup units found.");
                println!("Create one with: snapkeep run <job>");
            } else {
                println!("Total: {} unit(s)", total);
            }
        }

        UnitsCommands::Prune { job, force } => {
            let job = config
                .job(&job)
                .ok_or_else(|| SnapkeepError::job_not_found(job))?;

            let units = scan_units(&job.destination, &job.name)?;
            let expired = select_expired(&units, job.keep as usize);

            if expired.is_empty() {
                println!("Nothing to prune for '{}'.", job.name);
                println!(
                    "Retention keeps {} unit(s); {} present.",
                    job.keep,
                    units.len()
                );
                return Ok(());
            }

            println!("Prune Summary");
            println!("=============");
            println!("Job: {} (keep {})", job.name, job.keep);
            println!("Units present: {}", units.len());
            println!("To be deleted: {}", expired.len());
            for unit in expired {
                println!("  {} ({})", unit.id, format_size(unit.size_bytes));
            }
            println!();

            if !force {
                println!("To delete these units, run again with --force:");
                println!("  snapkeep units prune {} --force", job.name);
                return Ok(());
            }

            let removed = prune(&units, job.keep as usize)?;
            println!("Deleted {} unit(s).", removed.len());
        }
    }

    Ok(())
}

fn print_unit(unit: &BackupUnit, verbose: bool) {
    let encrypted_marker = if unit.encrypted { " [encrypted]" } else { "" };
    if verbose {
        let created = unit
            .created_at
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_else(|| "unknown".to_string());
        println!(
            "  {}{}\n    Created: {}\n    Size: {}\n    Parts: {}",
            unit.id,
            encrypted_marker,
            created,
            format_size(unit.size_bytes),
            unit.part_count,
        );
    } else {
        println!(
            "  {} ({}, {} part(s)){}",
            unit.id,
            format_size(unit.size_bytes),
            unit.part_count,
            encrypted_marker,
        );
    }
}

/// Format a file size in human-readable form
pub(crate) fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
