//! The in-memory model of a resolved workspace and its `bzlmod.lock`
//! serialisation.
//!
//! The lock workspace owns the map of resolved repos. Fetching a repo is
//! memoised per invocation, and label resolution is demand-driven: looking
//! up `@repo//pkg:file` fetches `repo` if it isn't materialised yet. The
//! fetch environment (workspace dir, cache dir, native ruleset globals) is
//! bound after construction or deserialisation and is never serialised.

pub mod fetcher;
pub mod workspace_file;

pub use fetcher::FetcherWrapper;

use bzlmod_common::paths::normalize_path;
use bzlmod_common::{Label, LabelResolver, ResolveLabelError, ResolvedLabel};
use bzlmod_extlang::value::Value;
use bzlmod_extlang::{EvalError, RulesetLoader};
use bzlmod_fetch::{CacheDir, FetchEnv, FetchError};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const LOCKFILE_NAME: &str = "bzlmod.lock";

#[derive(Debug, Error)]
pub enum LockfileError {
    #[error("unknown repo: {0}")]
    UnknownRepo(String),
    #[error("error fetching repo {repo}: {source}")]
    Fetch {
        repo: String,
        #[source]
        source: FetchError,
    },
    #[error("error fetching repo {repo}: {source}")]
    Generated {
        repo: String,
        #[source]
        source: EvalError,
    },
    #[error("lock file I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("lock file parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("the lock workspace is not bound to a workspace directory")]
    Unbound,
}

/// A resolved repo: how to fetch it and which repos its labels can see.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Repo {
    pub fetcher: FetcherWrapper,
    /// Apparent repo name (as used in labels inside this repo) → actual
    /// repo name in the workspace.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub deps: BTreeMap<String, String>,
    #[serde(skip)]
    cached_path: RefCell<Option<PathBuf>>,
}

impl Repo {
    pub fn new(fetcher: FetcherWrapper) -> Repo {
        Repo {
            fetcher,
            deps: BTreeMap::new(),
            cached_path: RefCell::new(None),
        }
    }
}

/// Runtime-only state of a bound workspace.
#[derive(Debug)]
struct Runtime {
    ws_dir: PathBuf,
    cache: CacheDir,
    /// Native bindings injected into the exports loader of generated-repo
    /// fetches.
    globals: HashMap<String, Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Workspace {
    pub root_module_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub vendor_dir: String,
    pub repos: BTreeMap<String, Repo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub toolchains: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exec_platforms: Vec<String>,
    #[serde(skip)]
    runtime: Option<Runtime>,
}

impl Workspace {
    pub fn new(root_module_name: &str) -> Workspace {
        Workspace {
            root_module_name: root_module_name.to_owned(),
            ..Default::default()
        }
    }

    /// Binds the runtime fetch environment. Must happen before any fetch
    /// or label resolution, typically right after construction or after
    /// reading the lock file.
    pub fn bind(&mut self, ws_dir: &Path, cache: CacheDir) {
        self.runtime = Some(Runtime {
            ws_dir: ws_dir.to_owned(),
            cache,
            globals: HashMap::new(),
        });
    }

    /// Makes a native binding visible to exports files loaded during
    /// generated-repo fetches.
    pub fn insert_native_global(&mut self, name: &str, value: Value) {
        if let Some(runtime) = &mut self.runtime {
            runtime.globals.insert(name.to_owned(), value);
        }
    }

    /// The native bindings registered so far.
    pub fn native_globals(&self) -> HashMap<String, Value> {
        self.runtime
            .as_ref()
            .map(|r| r.globals.clone())
            .unwrap_or_default()
    }

    pub fn ws_dir(&self) -> Option<&Path> {
        self.runtime.as_ref().map(|r| r.ws_dir.as_path())
    }

    pub fn cache(&self) -> Option<&CacheDir> {
        self.runtime.as_ref().map(|r| &r.cache)
    }

    /// The absolute vendor directory, if vendoring is enabled.
    fn vendor_path(&self, runtime: &Runtime) -> Option<PathBuf> {
        if self.vendor_dir.is_empty() {
            None
        } else {
            Some(normalize_path(&runtime.ws_dir, &self.vendor_dir))
        }
    }

    /// Fetches a repo, memoised per invocation: the second call returns
    /// the same path without touching the network.
    pub fn fetch(&self, repo_name: &str) -> Result<PathBuf, LockfileError> {
        let repo = self
            .repos
            .get(repo_name)
            .ok_or_else(|| LockfileError::UnknownRepo(repo_name.to_owned()))?;
        if let Some(path) = repo.cached_path.borrow().as_ref() {
            return Ok(path.clone());
        }

        let runtime = self.runtime.as_ref().ok_or(LockfileError::Unbound)?;
        let vendor = self.vendor_path(runtime);
        let env = FetchEnv {
            cache: &runtime.cache,
            vendor_dir: vendor.as_deref(),
            ws_dir: &runtime.ws_dir,
            resolver: Some(self),
        };

        let fetcher = &repo.fetcher;
        let path = if let Some(generated) = &fetcher.generated {
            let mut loader = RulesetLoader::new(self);
            for (name, value) in &runtime.globals {
                loader.insert_global(name, value.clone());
            }
            generated
                .fetch(repo_name, &env, &mut loader)
                .map_err(|source| LockfileError::Generated {
                    repo: repo_name.to_owned(),
                    source,
                })?
        } else {
            let plain = if let Some(archive) = &fetcher.archive {
                bzlmod_fetch::Fetcher::Archive(archive.clone())
            } else if let Some(git) = &fetcher.git {
                bzlmod_fetch::Fetcher::Git(git.clone())
            } else if let Some(local_path) = &fetcher.local_path {
                bzlmod_fetch::Fetcher::LocalPath(local_path.clone())
            } else {
                return Err(LockfileError::UnknownRepo(format!(
                    "{repo_name} has no fetcher"
                )));
            };
            plain
                .fetch(repo_name, &env)
                .map_err(|source| LockfileError::Fetch {
                    repo: repo_name.to_owned(),
                    source,
                })?
        };

        *repo.cached_path.borrow_mut() = Some(path.clone());
        Ok(path)
    }

    pub fn write_to_file(&self, path: &Path) -> Result<(), LockfileError> {
        let content = serde_json::to_string_pretty(self)?;
        let dir = path.parent().unwrap_or(Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| LockfileError::Io(e.error))?;
        Ok(())
    }

    pub fn read_from_file(path: &Path) -> Result<Workspace, LockfileError> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl LabelResolver for Workspace {
    fn resolve_label(
        &self,
        cur_repo: &str,
        cur_package: &str,
        label: &Label,
    ) -> Result<ResolvedLabel, ResolveLabelError> {
        let repo = match &label.repo {
            // No repo part: stay in the current repo.
            None => cur_repo.to_owned(),
            // `@//...`: the root repo.
            Some(repo) if repo.is_empty() => self.root_module_name.clone(),
            Some(apparent) => {
                let cur = self
                    .repos
                    .get(cur_repo)
                    .ok_or_else(|| ResolveLabelError::UnknownRepo(cur_repo.to_owned()))?;
                cur.deps
                    .get(apparent)
                    .cloned()
                    .ok_or_else(|| ResolveLabelError::UnknownDep {
                        repo: cur_repo.to_owned(),
                        dep: apparent.clone(),
                    })?
            }
        };
        let package = match &label.package {
            Some(package) => package.clone(),
            None => cur_package.to_owned(),
        };

        let repo_path = self.fetch(&repo).map_err(|e| ResolveLabelError::Fetch {
            repo: repo.clone(),
            message: e.to_string(),
        })?;
        let mut filename = repo_path;
        if !package.is_empty() {
            filename.push(&package);
        }
        filename.push(&label.target);

        Ok(ResolvedLabel {
            repo,
            package,
            filename,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bzlmod_fetch::{Archive, Fetcher, LocalPath};
    use bzlmod_testutil::{build_zip_archive, write_file, StaticHttpServer};

    fn local_repo(path: &str) -> Repo {
        Repo::new(FetcherWrapper::wrap(Fetcher::LocalPath(LocalPath {
            path: path.to_owned(),
        })))
    }

    fn bound_workspace(ws_dir: &Path, cache_root: &Path) -> Workspace {
        let mut ws = Workspace::new("root");
        ws.bind(ws_dir, CacheDir::new(cache_root));
        ws
    }

    #[test]
    fn fetch_unknown_repo_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = bound_workspace(tmp.path(), &tmp.path().join("cache"));
        assert!(matches!(
            ws.fetch("nope"),
            Err(LockfileError::UnknownRepo(_))
        ));
    }

    #[test]
    fn fetch_is_memoised() {
        // An archive server that serves the zip exactly once: the second
        // fetch must come from the memoised path.
        let zip = build_zip_archive(&[("f", b"contents")]);
        let server = StaticHttpServer::start(vec![("/a.zip".to_owned(), zip.clone())]);
        let tmp = tempfile::tempdir().unwrap();
        let mut ws = bound_workspace(tmp.path(), &tmp.path().join("cache"));
        ws.repos.insert(
            "myrepo".to_owned(),
            Repo::new(FetcherWrapper::wrap(Fetcher::Archive(Archive {
                urls: vec![format!("{}/a.zip", server.url())],
                integrity: String::new(),
                strip_prefix: String::new(),
                patches: Vec::new(),
                fingerprint: "FP".to_owned(),
            }))),
        );

        let first = ws.fetch("myrepo").unwrap();
        drop(server);
        let second = ws.fetch("myrepo").unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read(first.join("f")).unwrap(), b"contents");
    }

    #[test]
    fn resolve_label_stays_in_current_repo() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(tmp.path().join("a/pkg/file.bzl"), "x = 1\n");
        let mut ws = bound_workspace(tmp.path(), &tmp.path().join("cache"));
        ws.repos.insert("a".to_owned(), local_repo("a"));

        let label = Label::parse(":file.bzl").unwrap();
        let resolved = ws.resolve_label("a", "pkg", &label).unwrap();
        assert_eq!(resolved.repo, "a");
        assert_eq!(resolved.package, "pkg");
        assert_eq!(resolved.filename, tmp.path().join("a/pkg/file.bzl"));

        // An explicit package replaces the current one.
        let label = Label::parse("//other:file.bzl").unwrap();
        let resolved = ws.resolve_label("a", "pkg", &label).unwrap();
        assert_eq!(resolved.filename, tmp.path().join("a/other/file.bzl"));
    }

    #[test]
    fn resolve_label_follows_deps() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ws = bound_workspace(tmp.path(), &tmp.path().join("cache"));
        let mut repo_a = local_repo("a");
        repo_a.deps.insert("dep".to_owned(), "b.2.0".to_owned());
        ws.repos.insert("a".to_owned(), repo_a);
        ws.repos.insert("b.2.0".to_owned(), local_repo("b"));

        let label = Label::parse("@dep//pkg:file").unwrap();
        let resolved = ws.resolve_label("a", "", &label).unwrap();
        assert_eq!(resolved.repo, "b.2.0");
        assert_eq!(resolved.filename, tmp.path().join("b/pkg/file"));

        let label = Label::parse("@unknown//pkg:file").unwrap();
        assert!(matches!(
            ws.resolve_label("a", "", &label),
            Err(ResolveLabelError::UnknownDep { .. })
        ));
    }

    #[test]
    fn empty_repo_part_resolves_to_root() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ws = bound_workspace(tmp.path(), &tmp.path().join("cache"));
        ws.repos.insert("root".to_owned(), local_repo(""));
        ws.repos.insert("a".to_owned(), local_repo("a"));

        let label = Label::parse("@//tools:x.bzl").unwrap();
        let resolved = ws.resolve_label("a", "", &label).unwrap();
        assert_eq!(resolved.repo, "root");
        assert_eq!(resolved.filename, tmp.path().join("tools/x.bzl"));
    }

    #[test]
    fn lock_file_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ws = Workspace::new("root");
        ws.vendor_dir = "vendor".to_owned();
        ws.toolchains.push("//toolchain:x".to_owned());
        let mut repo = local_repo("a");
        repo.deps.insert("b".to_owned(), "b".to_owned());
        ws.repos.insert("a".to_owned(), repo);

        let path = tmp.path().join(LOCKFILE_NAME);
        ws.write_to_file(&path).unwrap();
        let loaded = Workspace::read_from_file(&path).unwrap();
        assert_eq!(loaded.root_module_name, "root");
        assert_eq!(loaded.vendor_dir, "vendor");
        assert_eq!(loaded.repos, ws.repos);
        assert_eq!(loaded.toolchains, ws.toolchains);
    }

    #[test]
    fn cached_path_is_not_serialised() {
        let tmp = tempfile::tempdir().unwrap();
        let mut ws = bound_workspace(tmp.path(), &tmp.path().join("cache"));
        ws.repos.insert("a".to_owned(), local_repo("a"));
        ws.fetch("a").unwrap();

        let path = tmp.path().join(LOCKFILE_NAME);
        ws.write_to_file(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(!content.contains("cached_path"));
        assert!(!content.contains("runtime"));
    }

    #[test]
    fn unbound_workspace_cannot_fetch() {
        let mut ws = Workspace::new("root");
        ws.repos.insert("a".to_owned(), local_repo("a"));
        assert!(ws.ws_dir().is_none());
        assert!(matches!(ws.fetch("a"), Err(LockfileError::Unbound)));
    }

    #[test]
    fn bind_exposes_the_runtime_environment() {
        let tmp = tempfile::tempdir().unwrap();
        let ws = bound_workspace(tmp.path(), &tmp.path().join("cache"));
        assert_eq!(ws.ws_dir(), Some(tmp.path()));
        assert!(ws.cache().is_some());
    }
}
