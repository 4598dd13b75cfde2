//! Dependency resolution: Discovery → Selection → workspace assembly →
//! ModuleRule driver → lock workspace.

pub mod discovery;
pub mod modrule;
pub mod module;
pub mod selection;

pub use discovery::discovery;
pub use module::{DepGraph, Module, ResolveState};
pub use selection::selection;

use bzlmod_common::{ModuleKey, VersionError};
use bzlmod_extlang::value::Value;
use bzlmod_extlang::{EvalError, Override};
use bzlmod_fetch::{CacheDir, FetchError, Fetcher, LocalPath};
use bzlmod_lockfile::{FetcherWrapper, LockfileError, Repo, Workspace};
use bzlmod_registry::RegistryError;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// The registry consulted when neither flags nor workspace settings name
/// any.
pub const DEFAULT_REGISTRY: &str = "https://registry.bazel.build";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Lockfile(#[from] LockfileError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("can't parse version for module {module}: {source}")]
    BadVersion {
        module: String,
        #[source]
        source: VersionError,
    },
    #[error("invalid override found for root module")]
    RootOverride,
    #[error("the MODULE.bazel file of {expected} declares a different name ({declared})")]
    NameMismatch { expected: String, declared: String },
    #[error("the MODULE.bazel file of {key} declares a different version ({declared})")]
    VersionMismatch { key: ModuleKey, declared: String },
    #[error("no version of {name} allowed by its multiple-version override is >= {version}")]
    NoAllowedVersion { name: String, version: String },
    #[error("error fetching module {name:?} with override: {detail}")]
    OverrideFetch { name: String, detail: String },
}

/// Inputs of a resolution beyond the workspace directory.
pub struct ResolveOptions {
    /// `--vendor_dir`; wins over `workspace_settings`.
    pub vendor_dir: Option<String>,
    /// `--registries`; wins over `workspace_settings`.
    pub registries: Vec<String>,
    pub cache: CacheDir,
    /// Native bindings visible to exports files (ruleset resolve/fetch
    /// functions).
    pub native_globals: HashMap<String, Value>,
}

impl ResolveOptions {
    pub fn new(cache: CacheDir) -> ResolveOptions {
        ResolveOptions {
            vendor_dir: None,
            registries: Vec::new(),
            cache,
            native_globals: HashMap::new(),
        }
    }
}

/// Runs the whole pipeline and returns the populated lock workspace.
pub fn resolve(ws_dir: &Path, options: ResolveOptions) -> Result<Workspace, ResolveError> {
    let mut state = discovery(
        ws_dir,
        options.vendor_dir.as_deref(),
        &options.registries,
        &options.cache,
    )?;
    selection(&mut state)?;

    let mut ws = assemble_workspace(ws_dir, &mut state, options.cache)?;
    for (name, value) in &options.native_globals {
        ws.insert_native_global(name, value.clone());
    }
    modrule::run_module_rules(&state, &mut ws)?;
    Ok(ws)
}

/// Assigns repo names, obtains fetchers for registry modules, and records
/// every surviving module in the lock workspace.
fn assemble_workspace(
    ws_dir: &Path,
    state: &mut ResolveState,
    cache: CacheDir,
) -> Result<Workspace, ResolveError> {
    assign_repo_names(state);

    let mut ws = Workspace::new(&state.root_module_name);
    ws.vendor_dir = state.vendor_dir.clone();
    ws.bind(ws_dir, cache);

    let root_key = state.root_key();
    let keys: Vec<ModuleKey> = state.dep_graph.keys().cloned().collect();
    for key in keys {
        let (repo_name, fetcher, deps, toolchains, exec_platforms) = {
            let module = &state.dep_graph[&key];
            let fetcher = if key == root_key {
                Fetcher::LocalPath(LocalPath { path: String::new() })
            } else if let Some(fetcher) = &module.fetcher {
                fetcher.clone()
            } else {
                let reg = module
                    .reg
                    .as_ref()
                    .ok_or_else(|| RegistryError::NotFound(key.clone()))?;
                let mut fetcher = reg.get_fetcher(&key)?;
                // Single-version and registry overrides may carry extra
                // patches for the module.
                match state.overrides.get(&key.name) {
                    Some(Override::SingleVersion { patches, .. })
                    | Some(Override::Registry { patches, .. })
                        if !patches.is_empty() =>
                    {
                        fetcher.append_patches(patches)?;
                    }
                    _ => {}
                }
                fetcher
            };
            let deps = module
                .deps
                .iter()
                .map(|(apparent, dep_key)| {
                    (apparent.clone(), state.dep_graph[dep_key].repo_name.clone())
                })
                .collect();
            (
                module.repo_name.clone(),
                fetcher,
                deps,
                module.toolchains.clone(),
                module.exec_platforms.clone(),
            )
        };

        let mut repo = Repo::new(FetcherWrapper::wrap(fetcher));
        repo.deps = deps;
        ws.repos.insert(repo_name, repo);
        ws.toolchains.extend(toolchains);
        ws.exec_platforms.extend(exec_platforms);
    }
    Ok(ws)
}

/// A module's repo name is its module name; when a multiple-version
/// override keeps several versions alive, every version but the highest is
/// suffixed with its version.
fn assign_repo_names(state: &mut ResolveState) {
    let mut highest: HashMap<String, ModuleKey> = HashMap::new();
    for key in state.dep_graph.keys() {
        match highest.get(&key.name) {
            Some(cur) if !version_gt(&key.version, &cur.version) => {}
            _ => {
                highest.insert(key.name.clone(), key.clone());
            }
        }
    }
    for (key, module) in state.dep_graph.iter_mut() {
        module.repo_name = if highest[&key.name] == *key {
            key.name.clone()
        } else {
            format!("{}.{}", key.name, key.version)
        };
    }
}

fn version_gt(a: &str, b: &str) -> bool {
    use bzlmod_common::Version;
    match (Version::parse(a), Version::parse(b)) {
        (Ok(a), Ok(b)) => a > b,
        _ => a > b,
    }
}
