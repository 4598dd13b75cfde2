//! The one-of fetcher wrapper used by the lock file.

use bzlmod_extlang::Generated;
use bzlmod_fetch::{Archive, Fetcher, Git, LocalPath};
use serde::{Deserialize, Serialize};

/// Wraps all known fetcher kinds for JSON (de)serialisation; exactly one
/// member is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FetcherWrapper {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<Archive>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<Git>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<LocalPath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<Generated>,
}

impl FetcherWrapper {
    pub fn wrap(fetcher: Fetcher) -> FetcherWrapper {
        match fetcher {
            Fetcher::Archive(archive) => FetcherWrapper {
                archive: Some(archive),
                ..Default::default()
            },
            Fetcher::Git(git) => FetcherWrapper {
                git: Some(git),
                ..Default::default()
            },
            Fetcher::LocalPath(local_path) => FetcherWrapper {
                local_path: Some(local_path),
                ..Default::default()
            },
        }
    }

    pub fn wrap_generated(generated: Generated) -> FetcherWrapper {
        FetcherWrapper {
            generated: Some(generated),
            ..Default::default()
        }
    }

    pub fn fingerprint(&self) -> String {
        if let Some(archive) = &self.archive {
            archive.fingerprint.clone()
        } else if let Some(git) = &self.git {
            git.fingerprint()
        } else if let Some(generated) = &self.generated {
            generated.fingerprint.clone()
        } else {
            String::new()
        }
    }
}
