//! The external archive producer
//!
//! Drives `tar` (or a compatible program) over the source tree, optionally
//! pipes the stream through the configured cipher, and chunks the result
//! into fixed-size parts with zero-padded, sortable names. The stream
//! never touches disk between the producer and the part files.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::process::{Child, Command, Stdio};

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::JobConfig;
use crate::error::{SnapkeepError, SnapkeepResult};
use crate::retention::PartInfo;
use crate::tools::cipher::CommandCipher;
use crate::verify::PART_PREFIX;

/// What the producer wrote into the staging directory
#[derive(Debug)]
pub struct ArchiveOutcome {
    /// Parts in order, with sizes and checksums for the manifest
    pub parts: Vec<PartInfo>,
    /// Whether the parts went through the cipher
    pub encrypted: bool,
}

/// Seam for the archive-producing pipeline
pub trait Archiver {
    /// Archive `source` into part files under `staging`
    fn produce(&self, source: &Path, staging: &Path) -> SnapkeepResult<ArchiveOutcome>;
}

/// tar-based producer with optional cipher stage and part splitting
pub struct TarArchiver {
    program: String,
    split_size: Option<u64>,
    cipher: Option<CommandCipher>,
}

impl TarArchiver {
    pub fn new(program: impl Into<String>, split_size: Option<u64>, cipher: Option<CommandCipher>) -> Self {
        Self {
            program: program.into(),
            split_size,
            cipher,
        }
    }

    /// Build the producer a job's configuration asks for
    pub fn from_job(job: &JobConfig) -> Self {
        let cipher = job
            .encryption
            .as_ref()
            .map(|enc| CommandCipher::new(enc.encrypt.clone()));
        Self::new("tar", job.split_size, cipher)
    }
}

impl Archiver for TarArchiver {
    fn produce(&self, source: &Path, staging: &Path) -> SnapkeepResult<ArchiveOutcome> {
        let mut producer = Command::new(&self.program)
            .args(["-cf", "-", "-C"])
            .arg(source)
            .arg(".")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SnapkeepError::Producer(format!("{}: failed to start: {}", self.program, e)))?;

        let producer_stdout = producer
            .stdout
            .take()
            .ok_or_else(|| SnapkeepError::Producer("producer stdout unavailable".into()))?;

        let encrypted = self.cipher.is_some();
        let (mut stream, mut cipher_child): (Box<dyn Read>, Option<Child>) = match &self.cipher {
            Some(cipher) => {
                let mut child = cipher
                    .spawn_filter(Stdio::from(producer_stdout))
                    .map_err(|e| SnapkeepError::Producer(e.to_string()))?;
                let stdout = child
                    .stdout
                    .take()
                    .ok_or_else(|| SnapkeepError::Producer("cipher stdout unavailable".into()))?;
                (Box::new(stdout), Some(child))
            }
            None => (Box::new(producer_stdout), None),
        };

        let ext = if encrypted { ".enc" } else { "" };
        let parts = write_parts(&mut stream, staging, self.split_size, ext)?;
        drop(stream);

        wait_pipeline_stage(producer, &self.program)?;
        if let Some(child) = cipher_child.take() {
            wait_pipeline_stage(child, "cipher")?;
        }

        if parts.is_empty() {
            return Err(SnapkeepError::Producer("producer wrote no data".into()));
        }

        debug!(parts = parts.len(), encrypted, "archive pipeline finished");
        Ok(ArchiveOutcome { parts, encrypted })
    }
}

fn wait_pipeline_stage(mut child: Child, what: &str) -> SnapkeepResult<()> {
    let mut stderr_text = String::new();
    if let Some(mut stderr) = child.stderr.take() {
        let _ = stderr.read_to_string(&mut stderr_text);
    }
    let status = child
        .wait()
        .map_err(|e| SnapkeepError::Producer(format!("{}: wait failed: {}", what, e)))?;
    if !status.success() {
        return Err(SnapkeepError::Producer(format!(
            "{} exited with {}: {}",
            what,
            status,
            stderr_text.trim()
        )));
    }
    Ok(())
}

/// Chunk a stream into part files, hashing each part as it is written
fn write_parts(
    stream: &mut dyn Read,
    dir: &Path,
    split_size: Option<u64>,
    ext: &str,
) -> SnapkeepResult<Vec<PartInfo>> {
    let limit = split_size.unwrap_or(u64::MAX);
    let mut parts: Vec<PartInfo> = Vec::new();
    let mut current: Option<(BufWriter<File>, Sha256, u64, String)> = None;
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = stream
            .read(&mut buf)
            .map_err(|e| SnapkeepError::Producer(format!("reading producer stream: {}", e)))?;
        if n == 0 {
            break;
        }

        let mut offset = 0usize;
        while offset < n {
            if current.is_none() {
                let name = format!("{}{:04}{}", PART_PREFIX, parts.len(), ext);
                let file = File::create(dir.join(&name))
                    .map_err(|e| SnapkeepError::Io(format!("Failed to create part {}: {}", name, e)))?;
                current = Some((BufWriter::new(file), Sha256::new(), 0, name));
            }

            let mut part_full = false;
            if let Some((writer, hasher, written, name)) = current.as_mut() {
                let room = ((limit - *written).min((n - offset) as u64)) as usize;
                writer
                    .write_all(&buf[offset..offset + room])
                    .map_err(|e| SnapkeepError::Io(format!("Failed to write part {}: {}", name, e)))?;
                hasher.update(&buf[offset..offset + room]);
                *written += room as u64;
                offset += room;
                part_full = *written == limit;
            }

            if part_full {
                parts.push(close_part(current.take())?);
            }
        }
    }

    if current.is_some() {
        parts.push(close_part(current.take())?);
    }

    Ok(parts)
}

fn close_part(state: Option<(BufWriter<File>, Sha256, u64, String)>) -> SnapkeepResult<PartInfo> {
    let (mut writer, hasher, written, name) = match state {
        Some(state) => state,
        None => return Err(SnapkeepError::Io("no open part to close".into())),
    };
    writer
        .flush()
        .map_err(|e| SnapkeepError::Io(format!("Failed to flush part {}: {}", name, e)))?;
    Ok(PartInfo {
        name,
        bytes: written,
        sha256: format!("{:x}", hasher.finalize()),
    })
}
