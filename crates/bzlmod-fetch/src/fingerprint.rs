//! Fingerprint files gate reuse of fetched directories.
//!
//! A directory is "ready" iff it contains a `bzlmod.fingerprint` file whose
//! content is exactly the expected fingerprint. The file is written as the
//! very last step of a fetch, so any partial failure leaves the directory
//! unready and a later fetch redoes the work.

use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

pub const FINGERPRINT_FILE: &str = "bzlmod.fingerprint";

pub fn verify_fingerprint_file(dir: &Path, fingerprint: &str) -> bool {
    match fs::read_to_string(dir.join(FINGERPRINT_FILE)) {
        Ok(actual) => actual == fingerprint,
        Err(_) => false,
    }
}

/// Atomically writes the fingerprint file into `dir`, creating the
/// directory if needed.
pub fn write_fingerprint_file(dir: &Path, fingerprint: &str) -> Result<(), std::io::Error> {
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(fingerprint.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dir.join(FINGERPRINT_FILE)).map_err(|e| e.error)?;
    Ok(())
}
