//! The `@repo//package:target` label grammar and the resolver capability.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("error parsing label {raw:?}: {reason}")]
pub struct LabelError {
    pub raw: String,
    pub reason: String,
}

/// A parsed label.
///
/// `repo` is `Some("")` for labels like `@//pkg:target` (an explicit but
/// empty repo part, meaning the root repo), and `None` when the `@repo`
/// part is missing entirely. The same distinction applies to `package`:
/// `//:target` has `Some("")`, `:target` has `None`. A present repo part
/// implies a present package part.
///
/// `target` is never empty; `//my/package` is shorthand for
/// `//my/package:package`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub repo: Option<String>,
    pub package: Option<String>,
    pub target: String,
}

impl Label {
    pub fn parse(raw: &str) -> Result<Label, LabelError> {
        let err = |reason: &str| LabelError {
            raw: raw.to_owned(),
            reason: reason.to_owned(),
        };

        if raw.is_empty() {
            return Err(err("empty label"));
        }
        if raw == "//" {
            return Err(err("malformed label"));
        }
        if raw.contains('\\') {
            return Err(err("malformed label"));
        }

        // Split into the optional "@repo//package" part and the optional
        // ":target" part.
        let (repo_pkg, target) = match raw.find(':') {
            Some(idx) => {
                let t = &raw[idx + 1..];
                if t.is_empty() || t.contains(':') {
                    return Err(err("malformed label"));
                }
                (&raw[..idx], Some(t))
            }
            None => (raw, None),
        };

        let (repo, package) = if repo_pkg.is_empty() {
            (None, None)
        } else if let Some(rest) = repo_pkg.strip_prefix('@') {
            let Some(idx) = rest.find("//") else {
                return Err(err("malformed label"));
            };
            let repo = &rest[..idx];
            if repo.contains('/') {
                return Err(err("malformed label"));
            }
            (Some(repo.to_owned()), Some(rest[idx + 2..].to_owned()))
        } else if let Some(pkg) = repo_pkg.strip_prefix("//") {
            (None, Some(pkg.to_owned()))
        } else {
            return Err(err("malformed label"));
        };

        if let Some(pkg) = &package {
            if pkg.starts_with('/') {
                return Err(err("package names may not start with '/'"));
            }
            if pkg.ends_with('/') {
                return Err(err("package names may not end with '/'"));
            }
            if pkg.contains("//") {
                return Err(err("package names may not contain '//'"));
            }
            for segment in pkg.split('/') {
                if segment.trim_start_matches('.').is_empty() {
                    return Err(err("package name component contains only '.' characters"));
                }
            }
        }

        let target = match target {
            Some(t) => {
                if t.starts_with('/') {
                    return Err(err("target names may not start with '/'"));
                }
                if t.ends_with('/') {
                    return Err(err("target names may not end with '/'"));
                }
                if t.contains("//") {
                    return Err(err("target names may not contain '//'"));
                }
                for segment in t.split('/') {
                    if segment.trim_start_matches('.').is_empty() {
                        return Err(err("target name component contains only '.' characters"));
                    }
                }
                t.to_owned()
            }
            None => {
                // The ":target" part is missing; the target defaults to the
                // last segment of the package name.
                let Some(pkg) = &package else {
                    return Err(err("malformed label"));
                };
                pkg.rsplit('/').next().unwrap_or("").to_owned()
            }
        };
        if target.is_empty() {
            return Err(err("malformed label"));
        }

        Ok(Label {
            repo,
            package,
            target,
        })
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(repo) = &self.repo {
            write!(f, "@{repo}")?;
        }
        if let Some(pkg) = &self.package {
            write!(f, "//{pkg}")?;
            if pkg.ends_with(&format!("/{}", self.target)) || pkg == &self.target {
                return Ok(());
            }
        }
        write!(f, ":{}", self.target)
    }
}

/// The outcome of resolving a label against a workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLabel {
    pub repo: String,
    pub package: String,
    pub filename: PathBuf,
}

#[derive(Debug, Error)]
pub enum ResolveLabelError {
    #[error("no repo named {0:?} in the workspace")]
    UnknownRepo(String),
    #[error("repo {repo:?} has no dep named {dep:?}")]
    UnknownDep { repo: String, dep: String },
    #[error("error fetching repo {repo:?}: {message}")]
    Fetch { repo: String, message: String },
}

/// Converts a label, in the context of a current repo and package, into the
/// concrete repo, package and file path it points to. Resolution may fetch
/// the target repo on demand.
pub trait LabelResolver {
    fn resolve_label(
        &self,
        cur_repo: &str,
        cur_package: &str,
        label: &Label,
    ) -> Result<ResolvedLabel, ResolveLabelError>;
}
