//! Streaming verification of produced archives
//!
//! Confirms that a backup unit can be fully reconstructed: all parts
//! present in order, per-part checksums matching the manifest, and the
//! concatenated (optionally decrypted) stream parsing as a structurally
//! valid tar archive end-to-end. Nothing is extracted to disk; every entry
//! is read to EOF through an in-memory sink.
//!
//! Failures are tagged with the stage that failed (`Parts`, `Decrypt`,
//! `Structure`) and are always fatal for the surrounding run.

use std::error::Error as StdError;
use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::{VerifyFailure, VerifyStage};
use crate::retention::UnitManifest;

/// Prefix shared by all archive part files inside a unit directory
pub const PART_PREFIX: &str = "payload.part-";

/// What a successful verification read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifySummary {
    /// Number of archive entries read
    pub entries: usize,
    /// Total uncompressed entry bytes streamed
    pub bytes: u64,
    /// Number of parts consumed
    pub parts: usize,
}

/// Seam for the external streaming decryptor
///
/// Implementations wrap the input in a reader producing the decrypted
/// stream. A decryptor that fails mid-stream surfaces the failure as a
/// read error carrying [`DecryptStreamError`], which verification maps to
/// the `Decrypt` stage.
pub trait Decryptor {
    fn decrypt(&self, input: Box<dyn Read + Send>) -> Result<Box<dyn Read + Send>, VerifyFailure>;
}

/// Marker error for failures originating in the decrypt layer
#[derive(Debug)]
pub struct DecryptStreamError(pub String);

impl fmt::Display for DecryptStreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl StdError for DecryptStreamError {}

/// Marker error for a part whose bytes do not match the manifest checksum
#[derive(Debug)]
struct PartIntegrityError {
    name: String,
}

impl fmt::Display for PartIntegrityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "part {} checksum mismatch", self.name)
    }
}

impl StdError for PartIntegrityError {}

/// Collect a unit's part files in lexicographic (= concatenation) order
///
/// Part names carry a zero-padded index; a gap in the sequence means a
/// missing part and fails with the `Parts` stage.
pub fn collect_parts(unit_dir: &Path) -> Result<Vec<PathBuf>, VerifyFailure> {
    let entries = std::fs::read_dir(unit_dir)
        .map_err(|e| VerifyFailure::parts(format!("cannot read {}: {}", unit_dir.display(), e)))?;

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|e| VerifyFailure::parts(format!("cannot read directory entry: {}", e)))?;
        let name = entry.file_name().to_string_lossy().to_string();
        if name.starts_with(PART_PREFIX) {
            names.push(name);
        }
    }
    names.sort();

    if names.is_empty() {
        return Err(VerifyFailure::parts("no archive parts found"));
    }

    for (expected, name) in names.iter().enumerate() {
        let index = part_index(name)
            .ok_or_else(|| VerifyFailure::parts(format!("unparseable part name {}", name)))?;
        if index != expected {
            return Err(VerifyFailure::parts(format!(
                "part sequence has a gap: expected index {:04}, found {}",
                expected, name
            )));
        }
    }

    Ok(names.into_iter().map(|n| unit_dir.join(n)).collect())
}

/// Parse the numeric index out of a part file name
fn part_index(name: &str) -> Option<usize> {
    let suffix = name.strip_prefix(PART_PREFIX)?;
    let digits = suffix.split('.').next()?;
    if digits.len() != 4 {
        return None;
    }
    digits.parse().ok()
}

/// Expected checksum and length for one part, taken from the manifest
#[derive(Debug, Clone)]
struct ExpectedPart {
    path: PathBuf,
    sha256: Option<String>,
}

/// Streaming reader over the ordered parts of a unit
///
/// Hashes each part while it is consumed and raises [`PartIntegrityError`]
/// at the part boundary when the bytes disagree with the manifest.
struct PartsReader {
    parts: Vec<ExpectedPart>,
    next: usize,
    current: Option<(BufReader<File>, Sha256)>,
}

impl PartsReader {
    fn new(parts: Vec<ExpectedPart>) -> Self {
        Self {
            parts,
            next: 0,
            current: None,
        }
    }

    fn open_next(&mut self) -> io::Result<bool> {
        if self.next >= self.parts.len() {
            return Ok(false);
        }
        let file = File::open(&self.parts[self.next].path)?;
        self.current = Some((BufReader::new(file), Sha256::new()));
        Ok(true)
    }

    fn finish_current(&mut self) -> io::Result<()> {
        if let Some((_, hasher)) = self.current.take() {
            let expected = &self.parts[self.next];
            if let Some(want) = &expected.sha256 {
                let got = format!("{:x}", hasher.finalize());
                if &got != want {
                    let name = expected
                        .path
                        .file_name()
                        .map(|n| n.to_string_lossy().to_string())
                        .unwrap_or_default();
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        PartIntegrityError { name },
                    ));
                }
            }
            self.next += 1;
        }
        Ok(())
    }
}

impl Read for PartsReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.current.is_none() && !self.open_next()? {
                return Ok(0);
            }

            let (reader, hasher) = self.current.as_mut().ok_or_else(|| {
                io::Error::new(io::ErrorKind::Other, "part reader state lost")
            })?;
            let n = reader.read(buf)?;
            if n > 0 {
                hasher.update(&buf[..n]);
                return Ok(n);
            }
            self.finish_current()?;
        }
    }
}

/// Verify a unit directory end-to-end
///
/// Reads the manifest when present, checks the part sequence against it,
/// then streams the concatenated parts (through `decryptor` when the unit
/// is encrypted) into a tar reader and walks every entry to EOF.
pub fn verify_unit(
    unit_dir: &Path,
    decryptor: Option<&dyn Decryptor>,
) -> Result<VerifySummary, VerifyFailure> {
    let manifest = UnitManifest::load(unit_dir).ok();
    let part_paths = collect_parts(unit_dir)?;

    let mut expected: Vec<ExpectedPart> = part_paths
        .iter()
        .map(|p| ExpectedPart {
            path: p.clone(),
            sha256: None,
        })
        .collect();

    let mut encrypted = false;
    if let Some(manifest) = &manifest {
        encrypted = manifest.encrypted;
        if manifest.parts.len() != part_paths.len() {
            return Err(VerifyFailure::parts(format!(
                "manifest lists {} parts, directory has {}",
                manifest.parts.len(),
                part_paths.len()
            )));
        }
        for (exp, info) in expected.iter_mut().zip(&manifest.parts) {
            let on_disk = exp
                .path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if on_disk != info.name {
                return Err(VerifyFailure::parts(format!(
                    "manifest part {} does not match {} on disk",
                    info.name, on_disk
                )));
            }
            exp.sha256 = Some(info.sha256.clone());
        }
    }

    let part_count = expected.len();
    let concatenated: Box<dyn Read + Send> = Box::new(PartsReader::new(expected));

    let stream: Box<dyn Read + Send> = if encrypted {
        let decryptor = decryptor.ok_or_else(|| {
            VerifyFailure::decrypt("unit is encrypted but no decryptor is configured")
        })?;
        decryptor.decrypt(concatenated)?
    } else {
        concatenated
    };

    let mut archive = tar::Archive::new(stream);
    let mut entries = 0usize;
    let mut bytes = 0u64;

    let iter = archive.entries().map_err(classify)?;
    for entry in iter {
        let mut entry = entry.map_err(classify)?;
        bytes += io::copy(&mut entry, &mut io::sink()).map_err(classify)?;
        entries += 1;
    }

    if entries == 0 {
        return Err(VerifyFailure::structure("archive contains no entries"));
    }

    Ok(VerifySummary {
        entries,
        bytes,
        parts: part_count,
    })
}

/// Map a read error to the verification stage it belongs to
fn classify(err: io::Error) -> VerifyFailure {
    let is_decrypt = err
        .get_ref()
        .map(|inner| inner.is::<DecryptStreamError>())
        .unwrap_or(false);
    if is_decrypt {
        VerifyFailure {
            stage: VerifyStage::Decrypt,
            detail: err.to_string(),
        }
    } else {
        VerifyFailure::structure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::sha256_hex;
    use crate::retention::{PartInfo, UnitManifest};
    use chrono::Utc;
    use std::fs;
    use tempfile::TempDir;

    /// Build a real tar stream in memory
    fn tar_bytes() -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        let data = b"hello archive".to_vec();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "files/hello.txt", data.as_slice())
            .unwrap();
        let mut header = tar::Header::new_gnu();
        let data = vec![0x42u8; 4096];
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "files/blob.bin", data.as_slice())
            .unwrap();
        builder.into_inner().unwrap()
    }

    /// Split a payload into part files and write a matching manifest
    fn write_unit(dir: &Path, payload: &[u8], part_size: usize, encrypted: bool) {
        let mut parts = Vec::new();
        for (i, chunk) in payload.chunks(part_size).enumerate() {
            let name = format!("{}{:04}", PART_PREFIX, i);
            fs::write(dir.join(&name), chunk).unwrap();
            parts.push(PartInfo {
                name,
                bytes: chunk.len() as u64,
                sha256: sha256_hex(chunk),
            });
        }
        let manifest = UnitManifest {
            schema_version: 1,
            id: "test-20260101-000000".into(),
            job: "test".into(),
            created_at: Utc::now(),
            encrypted,
            parts,
        };
        manifest.save(dir).unwrap();
    }

    struct IdentityDecryptor;

    impl Decryptor for IdentityDecryptor {
        fn decrypt(
            &self,
            input: Box<dyn Read + Send>,
        ) -> Result<Box<dyn Read + Send>, VerifyFailure> {
            Ok(input)
        }
    }

    struct FailingDecryptor;

    impl Decryptor for FailingDecryptor {
        fn decrypt(
            &self,
            _input: Box<dyn Read + Send>,
        ) -> Result<Box<dyn Read + Send>, VerifyFailure> {
            struct Fail;
            impl Read for Fail {
                fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                    Err(io::Error::new(
                        io::ErrorKind::Other,
                        DecryptStreamError("decryptor exited with status 2".into()),
                    ))
                }
            }
            Ok(Box::new(Fail))
        }
    }

    #[test]
    fn test_verify_intact_unit() {
        let temp = TempDir::new().unwrap();
        write_unit(temp.path(), &tar_bytes(), 1500, false);

        let summary = verify_unit(temp.path(), None).unwrap();
        assert_eq!(summary.entries, 2);
        assert_eq!(summary.bytes, 13 + 4096);
        assert!(summary.parts >= 3);
    }

    #[test]
    fn test_single_part_unit() {
        let temp = TempDir::new().unwrap();
        let payload = tar_bytes();
        write_unit(temp.path(), &payload, payload.len(), false);

        let summary = verify_unit(temp.path(), None).unwrap();
        assert_eq!(summary.parts, 1);
    }

    #[test]
    fn test_corrupted_byte_fails_structurally() {
        let temp = TempDir::new().unwrap();
        write_unit(temp.path(), &tar_bytes(), 1500, false);

        // Flip one byte in the middle of the second part.
        let part = temp.path().join(format!("{}0001", PART_PREFIX));
        let mut bytes = fs::read(&part).unwrap();
        bytes[700] ^= 0xff;
        fs::write(&part, bytes).unwrap();

        let err = verify_unit(temp.path(), None).unwrap_err();
        assert_eq!(err.stage, VerifyStage::Structure);
    }

    #[test]
    fn test_missing_middle_part() {
        let temp = TempDir::new().unwrap();
        write_unit(temp.path(), &tar_bytes(), 1500, false);
        fs::remove_file(temp.path().join(format!("{}0001", PART_PREFIX))).unwrap();

        let err = verify_unit(temp.path(), None).unwrap_err();
        assert_eq!(err.stage, VerifyStage::Parts);
    }

    #[test]
    fn test_truncated_stream_fails_structurally() {
        let temp = TempDir::new().unwrap();
        let payload = tar_bytes();
        // Drop the last part entirely and rebuild the manifest to match,
        // so the damage is only visible to the tar reader.
        write_unit(temp.path(), &payload[..3000], 1500, false);

        let err = verify_unit(temp.path(), None).unwrap_err();
        assert_eq!(err.stage, VerifyStage::Structure);
    }

    #[test]
    fn test_encrypted_unit_without_decryptor() {
        let temp = TempDir::new().unwrap();
        write_unit(temp.path(), &tar_bytes(), 1500, true);

        let err = verify_unit(temp.path(), None).unwrap_err();
        assert_eq!(err.stage, VerifyStage::Decrypt);
    }

    #[test]
    fn test_encrypted_unit_with_identity_decryptor() {
        let temp = TempDir::new().unwrap();
        write_unit(temp.path(), &tar_bytes(), 1500, true);

        let summary = verify_unit(temp.path(), Some(&IdentityDecryptor)).unwrap();
        assert_eq!(summary.entries, 2);
    }

    #[test]
    fn test_decrypt_failure_reported_distinctly() {
        let temp = TempDir::new().unwrap();
        write_unit(temp.path(), &tar_bytes(), 1500, true);

        let err = verify_unit(temp.path(), Some(&FailingDecryptor)).unwrap_err();
        assert_eq!(err.stage, VerifyStage::Decrypt);
    }

    #[test]
    fn test_empty_unit_dir() {
        let temp = TempDir::new().unwrap();
        let err = verify_unit(temp.path(), None).unwrap_err();
        assert_eq!(err.stage, VerifyStage::Parts);
    }

    #[test]
    fn test_part_index_parsing() {
        assert_eq!(part_index("payload.part-0000"), Some(0));
        assert_eq!(part_index("payload.part-0042.enc"), Some(42));
        assert_eq!(part_index("payload.part-12"), None);
        assert_eq!(part_index("other-0000"), None);
    }

    #[test]
    fn test_manifest_count_mismatch() {
        let temp = TempDir::new().unwrap();
        write_unit(temp.path(), &tar_bytes(), 1500, false);
        // Add a stray extra part the manifest does not know about.
        fs::write(temp.path().join(format!("{}0009", PART_PREFIX)), b"junk").unwrap();

        let err = verify_unit(temp.path(), None).unwrap_err();
        assert_eq!(err.stage, VerifyStage::Parts);
    }
}
