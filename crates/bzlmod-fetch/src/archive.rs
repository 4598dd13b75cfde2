//! The archive fetcher: an archive available at one of several equivalent
//! URLs, extracted and patched into a fingerprint-gated directory.

use crate::{download, extract, fetch_with_cache, FetchEnv, FetchError, Patch};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Archive {
    pub urls: Vec<String>,
    #[serde(default)]
    pub integrity: String,
    #[serde(default)]
    pub strip_prefix: String,
    #[serde(default)]
    pub patches: Vec<Patch>,
    /// Distinguishes this archive fetch from all others; used as the name
    /// of the shared repo directory. Not necessarily derived from the bytes
    /// of the fetched contents.
    pub fingerprint: String,
}

impl Archive {
    /// Fetches without vendoring and without a repo name. Used during
    /// discovery, where the module may not end up selected and its repo
    /// name is not known yet.
    pub fn early_fetch(&self, env: &FetchEnv<'_>) -> Result<PathBuf, FetchError> {
        let bare = FetchEnv::bare(env.cache, env.ws_dir);
        self.fetch("", &bare)
    }

    pub fn fetch(&self, repo_name: &str, env: &FetchEnv<'_>) -> Result<PathBuf, FetchError> {
        fetch_with_cache(&self.fingerprint, repo_name, env, |dest| {
            let result = download(&self.urls, &self.integrity, env.cache)?;
            extract::extract_as(&result.path, &result.url_file_name(), dest, &self.strip_prefix)?;
            for patch in &self.patches {
                patch.apply(dest, env.cache)?;
            }
            Ok(())
        })
    }
}
