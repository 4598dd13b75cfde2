//! Module registries: where module descriptors and source archives come
//! from.
//!
//! A registry serves two things per module version: the raw `MODULE.bazel`
//! descriptor bytes and a [`Fetcher`] describing how to obtain the source
//! archive. The [`Index`] implementation speaks the on-disk/HTTP index
//! layout; [`fake::Fake`] is an in-memory variant for tests, reachable
//! through `fake:` URLs.

pub mod fake;
pub mod index;

pub use fake::Fake;
pub use index::Index;

use bzlmod_common::ModuleKey;
use bzlmod_fetch::Fetcher;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("module not found: {0}")]
    NotFound(ModuleKey),
    #[error("module not found: {key} in registries {registries:?}")]
    NotFoundAnywhere {
        key: ModuleKey,
        registries: Vec<String>,
    },
    #[error("error creating registry from {url:?}: {reason}")]
    BadUrl { url: String, reason: String },
    #[error("unrecognized registry scheme {0:?}")]
    UnrecognizedScheme(String),
    #[error("registry I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error for {url}: {detail}")]
    Http { url: String, detail: String },
    #[error("malformed registry metadata at {url}: {detail}")]
    Metadata { url: String, detail: String },
}

/// A Bazel module registry.
pub trait Registry {
    /// The URL uniquely identifying this registry.
    fn url(&self) -> String;

    /// The raw `MODULE.bazel` contents for the given module, or
    /// [`RegistryError::NotFound`].
    fn get_module_bazel(&self, key: &ModuleKey) -> Result<Vec<u8>, RegistryError>;

    /// A fetcher for the module's source archive, or
    /// [`RegistryError::NotFound`].
    fn get_fetcher(&self, key: &ModuleKey) -> Result<Fetcher, RegistryError>;
}

impl std::fmt::Debug for dyn Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Registry").field(&self.url()).finish()
    }
}

/// Creates a registry from its URL; the scheme picks the implementation.
pub fn open(raw_url: &str) -> Result<Arc<dyn Registry>, RegistryError> {
    let scheme = match raw_url.split_once(':') {
        Some((scheme, _)) => scheme,
        None => {
            return Err(RegistryError::BadUrl {
                url: raw_url.to_owned(),
                reason: "missing scheme".to_owned(),
            })
        }
    };
    match scheme {
        "http" | "https" | "file" => Ok(Arc::new(Index::new(raw_url)?)),
        "fake" => fake::open(raw_url),
        other => Err(RegistryError::UnrecognizedScheme(other.to_owned())),
    }
}

/// Gets the `MODULE.bazel` contents for `key`. If `reg_override` is
/// non-empty it is consulted exclusively; otherwise the registries are
/// tried in declared order, skipping not-found, and the first hit wins.
/// Also returns the registry that had the module.
pub fn get_module_bazel_from_registries(
    key: &ModuleKey,
    registries: &[String],
    reg_override: &str,
) -> Result<(Vec<u8>, Arc<dyn Registry>), RegistryError> {
    if !reg_override.is_empty() {
        let reg = open(reg_override)?;
        let module_bazel = reg.get_module_bazel(key)?;
        return Ok((module_bazel, reg));
    }

    for url in registries {
        let reg = open(url)?;
        match reg.get_module_bazel(key) {
            Ok(module_bazel) => return Ok((module_bazel, reg)),
            Err(RegistryError::NotFound(_)) => continue,
            Err(e) => return Err(e),
        }
    }

    Err(RegistryError::NotFoundAnywhere {
        key: key.clone(),
        registries: registries.to_vec(),
    })
}
