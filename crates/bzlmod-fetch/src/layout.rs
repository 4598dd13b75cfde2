//! Directory layout of the process-wide bzlmod cache.
//!
//! All fetched state lives under one root: `shared_repos/<fingerprint>` for
//! extracted module trees, `http_cache/<hash(url)>` for raw downloads, and
//! `ws/<hash(workspace_dir)>/<repo>` for per-workspace generated repos. The
//! root defaults to the user cache directory and is overridden in tests.

use crate::FetchError;
use bzlmod_common::hash;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct CacheDir {
    root: PathBuf,
}

impl CacheDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        CacheDir { root: root.into() }
    }

    /// The per-user default, e.g. `~/.cache/bzlmod` on Linux. The
    /// `BZLMOD_CACHE_DIR` environment variable overrides it (mainly for
    /// tests).
    pub fn default_location() -> Result<CacheDir, FetchError> {
        if let Ok(root) = std::env::var("BZLMOD_CACHE_DIR") {
            if !root.is_empty() {
                return Ok(CacheDir { root: root.into() });
            }
        }
        let base = dirs::cache_dir().ok_or(FetchError::NoCacheDir)?;
        Ok(CacheDir {
            root: base.join("bzlmod"),
        })
    }

    #[inline]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The shared repo directory for the given fingerprint.
    #[inline]
    pub fn shared_repo_dir(&self, fingerprint: &str) -> PathBuf {
        self.root.join("shared_repos").join(fingerprint)
    }

    /// The cache file for a URL's raw downloaded bytes. The key is the hash
    /// of the exact URL string.
    #[inline]
    pub fn http_cache_file(&self, url: &str) -> PathBuf {
        self.root.join("http_cache").join(hash(&[url.into()]))
    }

    /// The per-workspace directory where generated repos are placed.
    #[inline]
    pub fn workspace_dir(&self, ws_dir: &Path) -> PathBuf {
        self.root
            .join("ws")
            .join(hash(&[ws_dir.to_string_lossy().as_ref().into()]))
    }
}
