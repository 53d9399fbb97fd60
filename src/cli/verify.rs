//! Verify CLI command
//!
//! Manual end-to-end verification of a retained backup unit.

use crate::config::Config;
use crate::error::{SnapkeepError, SnapkeepResult};
use crate::retention::scan_units;
use crate::tools::CommandCipher;
use crate::verify::{verify_unit, Decryptor};

use super::units::format_size;

/// Handle a verify command
///
/// `unit` selects a unit by identifier; `None` or `"latest"` picks the
/// most recent one.
pub fn handle_verify_command(
    config: &Config,
    job: &str,
    unit: Option<&str>,
) -> SnapkeepResult<()> {
    let job = config
        .job(job)
        .ok_or_else(|| SnapkeepError::job_not_found(job))?;

    let units = scan_units(&job.destination, &job.name)?;
    let target = match unit {
        None => units.last(),
        Some(id) if id.eq_ignore_ascii_case("latest") => units.last(),
        Some(id) => units.iter().find(|u| u.id == id),
    }
    .ok_or_else(|| SnapkeepError::unit_not_found(unit.unwrap_or("latest")))?;

    let decryptor = job
        .encryption
        .as_ref()
        .map(|enc| CommandCipher::new(enc.decrypt.clone()));

    println!("Verifying {} ...", target.id);
    let summary = verify_unit(
        &target.path,
        decryptor.as_ref().map(|d| d as &dyn Decryptor),
    )?;

    println!("OK: {}", target.id);
    println!("  Parts:   {}", summary.parts);
    println!("  Entries: {}", summary.entries);
    println!("  Payload: {}", format_size(summary.bytes));

    Ok(())
}
