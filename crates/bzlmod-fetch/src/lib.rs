//! The fetch engine: materialising module source trees on local disk.
//!
//! A [`Fetcher`] describes how to obtain a repo's contents (archive
//! download, git checkout, or a local path) and [`Fetcher::fetch`] makes
//! those contents available in a directory, reusing the process-wide
//! shared-repo cache and the workspace's vendor directory where possible.
//! Readiness of a fetched directory is gated solely by its fingerprint
//! file, which is always written last.

pub mod archive;
pub mod download;
pub mod extract;
pub mod fingerprint;
pub mod git;
pub mod layout;
pub mod patch;

pub use archive::Archive;
pub use download::{download, DownloadResult};
pub use fingerprint::{verify_fingerprint_file, write_fingerprint_file, FINGERPRINT_FILE};
pub use git::Git;
pub use layout::CacheDir;
pub use patch::Patch;

use bzlmod_common::paths::normalize_path;
use bzlmod_common::{integrity::IntegrityError, LabelResolver};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("fetch I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
    #[error("{path}: failed integrity check")]
    IntegrityMismatch { path: PathBuf },
    #[error("error downloading archive: no usable URL in {urls:?}")]
    AllUrlsFailed { urls: Vec<String> },
    #[error("HTTP error for {url}: {detail}")]
    Http { url: String, detail: String },
    #[error("unsupported archive extension: {0}")]
    UnsupportedArchive(String),
    #[error("archive entry escapes the extraction root: {0}")]
    UnsafeArchivePath(String),
    #[error("error reading archive: {0}")]
    BadArchive(String),
    #[error("error applying patch {file}: {detail}")]
    PatchFailed { file: String, detail: String },
    #[error("git error for {repo}: {detail}")]
    GitFailed { repo: String, detail: String },
    #[error("can't determine the user cache directory")]
    NoCacheDir,
}

/// Everything a fetch needs from its surroundings. The label resolver is
/// only consulted by generated-repo fetchers, which live a layer above this
/// crate.
pub struct FetchEnv<'a> {
    pub cache: &'a CacheDir,
    pub vendor_dir: Option<&'a Path>,
    pub ws_dir: &'a Path,
    pub resolver: Option<&'a dyn LabelResolver>,
}

impl<'a> FetchEnv<'a> {
    /// An environment for early fetches during discovery: no vendoring, no
    /// label resolution.
    pub fn bare(cache: &'a CacheDir, ws_dir: &'a Path) -> FetchEnv<'a> {
        FetchEnv {
            cache,
            vendor_dir: None,
            ws_dir,
            resolver: None,
        }
    }
}

/// A locally available unpacked directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalPath {
    pub path: String,
}

impl LocalPath {
    pub fn fetch(&self, env: &FetchEnv<'_>) -> Result<PathBuf, FetchError> {
        // Local paths are used in place even in vendoring mode.
        Ok(normalize_path(env.ws_dir, &self.path))
    }

    pub fn fingerprint(&self) -> String {
        // A local path never needs to be re-fetched.
        String::new()
    }
}

/// How to materialise a module's source tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Fetcher {
    Archive(Archive),
    Git(Git),
    LocalPath(LocalPath),
}

impl Fetcher {
    pub fn fetch(&self, repo_name: &str, env: &FetchEnv<'_>) -> Result<PathBuf, FetchError> {
        match self {
            Fetcher::Archive(a) => a.fetch(repo_name, env),
            Fetcher::Git(g) => g.fetch(repo_name, env),
            Fetcher::LocalPath(lp) => lp.fetch(env),
        }
    }

    pub fn fingerprint(&self) -> String {
        match self {
            Fetcher::Archive(a) => a.fingerprint.clone(),
            Fetcher::Git(g) => g.fingerprint(),
            Fetcher::LocalPath(lp) => lp.fingerprint(),
        }
    }

    /// Appends override patches. Local paths are used as-is and cannot be
    /// patched.
    pub fn append_patches(&mut self, patches: &[Patch]) -> Result<(), FetchError> {
        match self {
            Fetcher::Archive(a) => {
                a.patches.extend_from_slice(patches);
                Ok(())
            }
            Fetcher::Git(g) => {
                g.patches.extend_from_slice(patches);
                Ok(())
            }
            Fetcher::LocalPath(_) => Err(FetchError::PatchFailed {
                file: patches.first().map(|p| p.file.clone()).unwrap_or_default(),
                detail: "local path repos cannot be patched".to_owned(),
            }),
        }
    }
}

/// The shared vendor/shared-dir discipline of archive-like fetchers.
///
/// `produce` populates a clean target directory from scratch; everything
/// around it (fingerprint gating, vendor copies, fingerprint-last writes)
/// is common to archive and git fetches.
pub(crate) fn fetch_with_cache(
    fingerprint: &str,
    repo_name: &str,
    env: &FetchEnv<'_>,
    produce: impl Fn(&Path) -> Result<(), FetchError>,
) -> Result<PathBuf, FetchError> {
    let vendor_repo = match env.vendor_dir {
        Some(vendor) if !repo_name.is_empty() => Some(vendor.join(repo_name)),
        _ => None,
    };

    // In vendoring mode, a ready vendor dir wins outright.
    if let Some(vendor_repo) = &vendor_repo {
        if verify_fingerprint_file(vendor_repo, fingerprint) {
            return Ok(vendor_repo.clone());
        }
    }

    // The directory name is itself the fingerprint, but the fingerprint
    // file is only present if a previous download, extraction and patching
    // ran to completion.
    let shared = env.cache.shared_repo_dir(fingerprint);
    let shared_ready = verify_fingerprint_file(&shared, fingerprint);

    let Some(vendor_repo) = vendor_repo else {
        if !shared_ready {
            produce(&shared)?;
            write_fingerprint_file(&shared, fingerprint)?;
        }
        return Ok(shared);
    };

    if shared_ready {
        copy_dir_without_fingerprint(&shared, &vendor_repo)?;
    } else {
        produce(&vendor_repo)?;
    }
    write_fingerprint_file(&vendor_repo, fingerprint)?;
    Ok(vendor_repo)
}

/// Copies a ready shared repo into a vendor dir. The fingerprint file is
/// deliberately left out so the destination only becomes ready once the
/// caller writes it after a complete copy.
fn copy_dir_without_fingerprint(from: &Path, to: &Path) -> Result<(), FetchError> {
    if to.exists() {
        fs::remove_dir_all(to)?;
    }
    copy_tree(from, to, from)?;
    Ok(())
}

fn copy_tree(dir: &Path, to_root: &Path, from_root: &Path) -> Result<(), FetchError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let rel = path.strip_prefix(from_root).expect("walked under from_root");
        if rel == Path::new(FINGERPRINT_FILE) {
            continue;
        }
        let dest = to_root.join(rel);
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
            copy_tree(&path, to_root, from_root)?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(&path)?;
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            #[cfg(unix)]
            std::os::unix::fs::symlink(&target, &dest)?;
            #[cfg(not(unix))]
            fs::copy(&path, &dest).map(|_| ())?;
        } else {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&path, &dest)?;
        }
    }
    Ok(())
}
