//! Discovery: downloading and evaluating the `MODULE.bazel` files of all
//! transitive dependencies.
//!
//! Keys are adjusted by overrides before lookup (a single-version override
//! pins the version; path/archive/git overrides clear it), so only one
//! version of an overridden dep is ever discovered. Graph entries are
//! inserted before recursing, which makes cyclic dependency declarations
//! terminate naturally.

use crate::module::{DepGraph, Module, ResolveState};
use crate::{ResolveError, DEFAULT_REGISTRY};
use bzlmod_common::{hash, ModuleKey};
use bzlmod_extlang::{execute_descriptor, DescriptorOutput, Override};
use bzlmod_fetch::patch::fingerprint_parts;
use bzlmod_fetch::{Archive, CacheDir, FetchEnv, Fetcher, Git, LocalPath};
use bzlmod_registry::get_module_bazel_from_registries;
use std::path::Path;
use tracing::debug;

pub const MODULE_BAZEL: &str = "MODULE.bazel";

/// Runs discovery from the root workspace directory. `vendor_flag` and
/// `registries_flag` take precedence over `workspace_settings`.
pub fn discovery(
    ws_dir: &Path,
    vendor_flag: Option<&str>,
    registries_flag: &[String],
    cache: &CacheDir,
) -> Result<ResolveState, ResolveError> {
    let root_path = ws_dir.join(MODULE_BAZEL);
    let root_source = std::fs::read_to_string(&root_path)?;
    let output = execute_descriptor(&root_path.display().to_string(), &root_source, true)?;

    let root_module = module_from_output(&output);
    let root_name = root_module.key.name.clone();

    // Flags win over workspace settings; the well-known index is the
    // fallback.
    let settings = output.ws_settings.clone().unwrap_or_default();
    let vendor_dir = match vendor_flag {
        Some(flag) => flag.to_owned(),
        None => settings.vendor_dir,
    };
    let registries = if !registries_flag.is_empty() {
        registries_flag.to_vec()
    } else if !settings.registries.is_empty() {
        settings.registries
    } else {
        vec![DEFAULT_REGISTRY.to_owned()]
    };

    let mut overrides = output.overrides.clone();
    if overrides.contains_key(&root_name) {
        return Err(ResolveError::RootOverride);
    }
    overrides.insert(
        root_name.clone(),
        Override::LocalPath {
            path: ws_dir.display().to_string(),
        },
    );

    let mut state = ResolveState {
        root_module_name: root_name.clone(),
        dep_graph: DepGraph::new(),
        overrides,
        vendor_dir,
        registries,
    };
    let root_key = ModuleKey::new(root_name, "");
    state.dep_graph.insert(root_key.clone(), root_module);

    process_module_deps(&root_key, &mut state, cache, ws_dir)?;
    Ok(state)
}

/// Builds a graph module from a descriptor's outputs.
fn module_from_output(output: &DescriptorOutput) -> Module {
    let decl = output.module.clone().unwrap_or_default();
    Module {
        key: ModuleKey::new(decl.name, decl.version),
        compatibility_level: decl.compatibility_level,
        bazel_compatibility: decl.bazel_compatibility,
        module_rule_exports: decl.module_rule_exports,
        toolchains: decl.toolchains_to_register,
        exec_platforms: decl.execution_platforms_to_register,
        deps: output.deps.clone(),
        reg: None,
        fetcher: None,
        repo_name: String::new(),
        tags: output.tags.clone(),
    }
}

/// Rewrites the dep keys of a module according to the override set, then
/// recursively discovers each dep.
fn process_module_deps(
    key: &ModuleKey,
    state: &mut ResolveState,
    cache: &CacheDir,
    ws_dir: &Path,
) -> Result<(), ResolveError> {
    let mut adjusted = Vec::new();
    {
        let module = state.dep_graph.get_mut(key).expect("module was inserted");
        for dep_key in module.deps.values_mut() {
            match state.overrides.get(&dep_key.name) {
                Some(Override::SingleVersion { version, .. }) if !version.is_empty() => {
                    dep_key.version = version.clone();
                }
                Some(Override::LocalPath { .. })
                | Some(Override::Archive { .. })
                | Some(Override::Git { .. }) => {
                    dep_key.version = String::new();
                }
                _ => {}
            }
            adjusted.push(dep_key.clone());
        }
    }
    for dep_key in adjusted {
        process_single_dep(&dep_key, state, cache, ws_dir)?;
    }
    Ok(())
}

fn process_single_dep(
    key: &ModuleKey,
    state: &mut ResolveState,
    cache: &CacheDir,
    ws_dir: &Path,
) -> Result<(), ResolveError> {
    if state.dep_graph.contains_key(key) {
        return Ok(());
    }
    // Reserve the slot before recursing so cycles terminate.
    state.dep_graph.insert(key.clone(), Module::default());

    let (module_bazel, reg, fetcher) = get_module_bazel(key, state, cache, ws_dir)?;
    debug!("discovered {key}");

    let file_name = format!("{}/{MODULE_BAZEL}", key.name);
    let source = String::from_utf8_lossy(&module_bazel).into_owned();
    let output = execute_descriptor(&file_name, &source, false)?;

    let mut module = module_from_output(&output);
    if key.name != module.key.name {
        return Err(ResolveError::NameMismatch {
            expected: key.name.clone(),
            declared: module.key.name.clone(),
        });
    }
    if !key.version.is_empty() && key.version != module.key.version {
        return Err(ResolveError::VersionMismatch {
            key: key.clone(),
            declared: module.key.version.clone(),
        });
    }
    module.reg = reg;
    module.fetcher = fetcher;
    state.dep_graph.insert(key.clone(), module);

    process_module_deps(key, state, cache, ws_dir)
}

type ModuleBazelSource = (
    Vec<u8>,
    Option<std::sync::Arc<dyn bzlmod_registry::Registry>>,
    Option<Fetcher>,
);

/// Obtains the descriptor bytes for a key, honouring overrides: path,
/// archive and git overrides get a concocted fetcher and an early fetch,
/// everything else goes through the registries.
fn get_module_bazel(
    key: &ModuleKey,
    state: &ResolveState,
    cache: &CacheDir,
    ws_dir: &Path,
) -> Result<ModuleBazelSource, ResolveError> {
    match state.overrides.get(&key.name) {
        Some(Override::LocalPath { path }) => {
            let fetcher = Fetcher::LocalPath(LocalPath { path: path.clone() });
            let module_bazel = early_fetch_module_bazel(key, &fetcher, cache, ws_dir)?;
            Ok((module_bazel, None, Some(fetcher)))
        }
        Some(Override::Archive {
            url,
            integrity,
            strip_prefix,
            patches,
        }) => {
            let fetcher = Fetcher::Archive(Archive {
                urls: vec![url.clone()],
                integrity: integrity.clone(),
                strip_prefix: strip_prefix.clone(),
                patches: patches.clone(),
                fingerprint: hash(&[
                    "urlOverride".into(),
                    url.into(),
                    (&fingerprint_parts(patches)).into(),
                ]),
            });
            let module_bazel = early_fetch_module_bazel(key, &fetcher, cache, ws_dir)?;
            Ok((module_bazel, None, Some(fetcher)))
        }
        Some(Override::Git {
            repo,
            commit,
            patches,
        }) => {
            let fetcher = Fetcher::Git(Git {
                repo: repo.clone(),
                commit: commit.clone(),
                patches: patches.clone(),
            });
            let module_bazel = early_fetch_module_bazel(key, &fetcher, cache, ws_dir)?;
            Ok((module_bazel, None, Some(fetcher)))
        }
        other => {
            let reg_override = match other {
                Some(Override::SingleVersion { registry, .. })
                | Some(Override::MultipleVersion { registry, .. })
                | Some(Override::Registry { registry, .. }) => registry.clone(),
                _ => String::new(),
            };
            let (module_bazel, reg) =
                get_module_bazel_from_registries(key, &state.registries, &reg_override)?;
            Ok((module_bazel, Some(reg), None))
        }
    }
}

/// Fetches an overridden module's contents to read its descriptor. The
/// vendor dir is deliberately not used: the module might not end up
/// selected, and its repo name isn't known yet.
fn early_fetch_module_bazel(
    key: &ModuleKey,
    fetcher: &Fetcher,
    cache: &CacheDir,
    ws_dir: &Path,
) -> Result<Vec<u8>, ResolveError> {
    let env = FetchEnv::bare(cache, ws_dir);
    let path = fetcher
        .fetch("", &env)
        .map_err(|e| ResolveError::OverrideFetch {
            name: key.name.clone(),
            detail: e.to_string(),
        })?;
    Ok(std::fs::read(path.join(MODULE_BAZEL))?)
}
