//! The download cascade: try each URL in order, cache http(s) downloads by
//! URL hash, and verify everything against the integrity metadata while
//! keeping a side SHA-256 of the winning file.

use crate::{CacheDir, FetchError};
use bzlmod_common::integrity::Checker;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::warn;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    /// Path to the downloaded file, most likely inside the http cache.
    pub path: PathBuf,
    /// The URL from the list that was actually used.
    pub url: String,
    /// SHA-256 of the downloaded file.
    pub sha256: Vec<u8>,
}

impl DownloadResult {
    /// The file name implied by the winning URL, without its query part.
    /// Cache files are named by URL hash, so this is what archive format
    /// detection has to go on.
    pub fn url_file_name(&self) -> String {
        let path = match Url::parse(&self.url) {
            Ok(url) => url.path().to_owned(),
            Err(_) => self.url.clone(),
        };
        path.rsplit('/').next().unwrap_or("").to_owned()
    }
}

/// Tries each URL in declared order; the first one whose contents pass the
/// integrity check wins. `http(s)` URLs go through the http cache, `file`
/// URLs are verified in place, anything else is skipped with a warning.
pub fn download(
    urls: &[String],
    integrity: &str,
    cache: &CacheDir,
) -> Result<DownloadResult, FetchError> {
    let mut checker = Checker::parse(integrity)?;
    let agent = ureq::Agent::new_with_defaults();

    for raw_url in urls {
        let url = match Url::parse(raw_url) {
            Ok(u) => u,
            Err(e) => {
                warn!("failed to parse URL {raw_url}: {e}");
                continue;
            }
        };
        let attempt = match url.scheme() {
            "http" | "https" => cached_http_download(&agent, raw_url, &mut checker, cache),
            "file" => {
                let path = match url.to_file_path() {
                    Ok(p) => p,
                    Err(()) => {
                        warn!("bad file URL: {raw_url}");
                        continue;
                    }
                };
                verify_file(&path, &mut checker).map(|sha256| (path, sha256))
            }
            other => {
                warn!("unrecognized scheme: {other}");
                continue;
            }
        };
        match attempt {
            Ok((path, sha256)) => {
                return Ok(DownloadResult {
                    path,
                    url: raw_url.clone(),
                    sha256,
                })
            }
            Err(e) => warn!("error fetching from {raw_url}: {e}"),
        }
    }

    Err(FetchError::AllUrlsFailed {
        urls: urls.to_vec(),
    })
}

/// Downloads a URL into the http cache, reusing the cached file when it
/// already passes the integrity check. Returns the cache path and the side
/// SHA-256.
fn cached_http_download(
    agent: &ureq::Agent,
    url: &str,
    checker: &mut Checker,
    cache: &CacheDir,
) -> Result<(PathBuf, Vec<u8>), FetchError> {
    let cache_file = cache.http_cache_file(url);
    if let Ok(sha256) = verify_file(&cache_file, checker) {
        return Ok((cache_file, sha256));
    }

    if let Some(parent) = cache_file.parent() {
        fs::create_dir_all(parent)?;
    }
    let response = agent.get(url).call().map_err(|e| FetchError::Http {
        url: url.to_owned(),
        detail: e.to_string(),
    })?;
    let status = response.status().as_u16();
    if status >= 300 {
        return Err(FetchError::Http {
            url: url.to_owned(),
            detail: format!("got status: {status}"),
        });
    }

    checker.reset();
    let mut side = Sha256::new();
    let mut file = fs::File::create(&cache_file)?;
    let mut reader = response.into_body().into_reader();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(|e| FetchError::Http {
            url: url.to_owned(),
            detail: e.to_string(),
        })?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        checker.update(&buf[..n]);
        side.update(&buf[..n]);
    }
    file.sync_all()?;

    if !checker.check() {
        return Err(FetchError::IntegrityMismatch { path: cache_file });
    }
    Ok((cache_file, side.finalize().to_vec()))
}

/// Streams a local file through the integrity checker and the side hash.
fn verify_file(path: &Path, checker: &mut Checker) -> Result<Vec<u8>, FetchError> {
    let mut file = fs::File::open(path)?;
    checker.reset();
    let mut side = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        checker.update(&buf[..n]);
        side.update(&buf[..n]);
    }
    if !checker.check() {
        return Err(FetchError::IntegrityMismatch {
            path: path.to_owned(),
        });
    }
    Ok(side.finalize().to_vec())
}
