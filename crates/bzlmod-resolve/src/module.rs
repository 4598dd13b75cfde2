//! The dependency graph built by discovery and refined by selection.

use bzlmod_common::ModuleKey;
use bzlmod_extlang::{OverrideSet, Tag};
use bzlmod_fetch::Fetcher;
use bzlmod_registry::Registry;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// One module of the graph.
///
/// `key` is the declared identity from the module's own descriptor; the
/// graph key may carry a different version (empty for non-registry
/// overrides, pinned for single-version overrides).
#[derive(Default, Clone)]
pub struct Module {
    pub key: ModuleKey,
    pub compatibility_level: i64,
    pub bazel_compatibility: String,
    pub module_rule_exports: String,
    pub toolchains: Vec<String>,
    pub exec_platforms: Vec<String>,
    /// repo name → dep key.
    pub deps: BTreeMap<String, ModuleKey>,
    /// The registry the module came from; unset when an override supplied
    /// a fetcher directly.
    pub reg: Option<Arc<dyn Registry>>,
    /// Filled during discovery for overridden modules, otherwise obtained
    /// from the registry during workspace assembly.
    pub fetcher: Option<Fetcher>,
    /// Assigned after selection.
    pub repo_name: String,
    /// Captured extension calls from this module's descriptor.
    pub tags: Vec<Tag>,
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("key", &self.key)
            .field("deps", &self.deps)
            .field("reg", &self.reg.as_ref().map(|r| r.url()))
            .field("fetcher", &self.fetcher)
            .field("repo_name", &self.repo_name)
            .field("tags", &self.tags.len())
            .finish()
    }
}

impl PartialEq for Module {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.compatibility_level == other.compatibility_level
            && self.bazel_compatibility == other.bazel_compatibility
            && self.module_rule_exports == other.module_rule_exports
            && self.toolchains == other.toolchains
            && self.exec_platforms == other.exec_platforms
            && self.deps == other.deps
            && self.reg.as_ref().map(|r| r.url()) == other.reg.as_ref().map(|r| r.url())
            && self.fetcher == other.fetcher
            && self.repo_name == other.repo_name
            && self.tags == other.tags
    }
}

/// The dependency graph, keyed by (possibly override-adjusted) module key.
/// The root module is keyed by `(root_name, "")`.
pub type DepGraph = BTreeMap<ModuleKey, Module>;

/// Everything the resolution pipeline threads between its phases.
pub struct ResolveState {
    pub root_module_name: String,
    pub dep_graph: DepGraph,
    pub overrides: OverrideSet,
    pub vendor_dir: String,
    pub registries: Vec<String>,
}

impl fmt::Debug for ResolveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolveState")
            .field("root_module_name", &self.root_module_name)
            .field("dep_graph", &self.dep_graph)
            .field("overrides", &self.overrides)
            .field("vendor_dir", &self.vendor_dir)
            .field("registries", &self.registries)
            .finish()
    }
}

impl ResolveState {
    pub fn root_key(&self) -> ModuleKey {
        ModuleKey::new(self.root_module_name.clone(), "")
    }
}
