//! Shared vocabulary for the bzlmod workspace resolver.
//!
//! This crate holds the small types every other crate speaks: `ModuleKey`,
//! the `@repo//pkg:target` label grammar and its resolver capability,
//! Subresource Integrity checking, the fingerprint hash, and the tolerant
//! version comparator used by selection.

pub mod hash;
pub mod integrity;
pub mod label;
pub mod paths;
pub mod version;

pub use hash::{hash, HashPart};
pub use label::{Label, LabelError, LabelResolver, ResolveLabelError, ResolvedLabel};
pub use version::{Version, VersionError};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a module in the dependency graph.
///
/// An empty `version` marks a module obtained through a non-registry
/// override (local path, archive or git); it sorts above every real version
/// during selection.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ModuleKey {
    pub name: String,
    pub version: String,
}

impl ModuleKey {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        ModuleKey {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for ModuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.version.is_empty() {
            write!(f, "{}@_", self.name)
        } else {
            write!(f, "{}@{}", self.name, self.version)
        }
    }
}
