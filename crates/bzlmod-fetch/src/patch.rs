//! Patch application via the system `patch` tool.

use crate::{download, CacheDir, FetchError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// A patch to apply to a fetched repo: a patch file (a local path or a URL)
/// and the `-p` strip count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub file: String,
    pub strip: u32,
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:p{}", self.file, self.strip)
    }
}

impl Patch {
    /// Applies the patch inside `dir`. URL patch files are pulled through
    /// the engine's download cache first. Any failure is fatal to the
    /// enclosing fetch.
    pub fn apply(&self, dir: &Path, cache: &CacheDir) -> Result<(), FetchError> {
        let patch_path = self.materialize(cache)?;
        let file = std::fs::File::open(&patch_path)?;
        let output = Command::new("patch")
            .arg(format!("-p{}", self.strip))
            .arg("-d")
            .arg(dir)
            .stdin(Stdio::from(file))
            .stderr(Stdio::piped())
            .stdout(Stdio::piped())
            .output()
            .map_err(|e| FetchError::PatchFailed {
                file: self.file.clone(),
                detail: format!("couldn't run patch: {e}"),
            })?;
        if !output.status.success() {
            return Err(FetchError::PatchFailed {
                file: self.file.clone(),
                detail: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }

    fn materialize(&self, cache: &CacheDir) -> Result<PathBuf, FetchError> {
        if self.file.starts_with("http://")
            || self.file.starts_with("https://")
            || self.file.starts_with("file://")
        {
            let result = download(&[self.file.clone()], "", cache)?;
            Ok(result.path)
        } else {
            Ok(PathBuf::from(&self.file))
        }
    }
}

/// Renders patches for inclusion in a fingerprint tuple.
pub fn fingerprint_parts(patches: &[Patch]) -> Vec<String> {
    patches.iter().map(|p| p.to_string()).collect()
}
