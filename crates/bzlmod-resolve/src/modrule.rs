//! The module-rule driver: runs resolve functions over the captured tags
//! and records the generated repos in the lock workspace.

use crate::module::ResolveState;
use crate::ResolveError;
use bzlmod_common::ModuleKey;
use bzlmod_extlang::context::{Context, ResolveResult};
use bzlmod_extlang::value::Value;
use bzlmod_extlang::{
    instantiate_attrs, BazelModule, BazelModuleRef, EvalError, Generated, Ruleset, RulesetLoader,
    RuleInstance, Tag,
};
use bzlmod_lockfile::{FetcherWrapper, Repo, Workspace};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

/// Groups tags deterministically, materialises each defining module's
/// exports, invokes the resolve functions, and appends the generated repos
/// (plus toolchains and platforms) to the workspace.
pub fn run_module_rules(state: &ResolveState, ws: &mut Workspace) -> Result<(), ResolveError> {
    // Tags grouped by the defining module, then by ruleset name. BTreeMaps
    // keep the whole run deterministic; within a group, tags keep the
    // source order of their descriptor files.
    let mut groups: BTreeMap<ModuleKey, BTreeMap<String, Vec<Tag>>> = BTreeMap::new();
    for module in state.dep_graph.values() {
        for tag in &module.tags {
            groups
                .entry(tag.module_key.clone())
                .or_default()
                .entry(tag.ruleset_name.clone())
                .or_default()
                .push(tag.clone());
        }
    }

    for (def_key, tags_by_ruleset) in groups {
        let def_module = &state.dep_graph[&def_key];
        let def_repo = def_module.repo_name.clone();
        let exports = def_module.module_rule_exports.clone();

        // Load the defining module's rulesets (fetching its repo on
        // demand), run every invoked resolve function, and only then
        // mutate the workspace.
        let mut outcomes: Vec<(String, Rc<Ruleset>, ResolveResult)> = Vec::new();
        {
            let ws: &Workspace = ws;
            let globals = ws.native_globals();
            let mut loader = RulesetLoader::new(ws);
            for (name, value) in &globals {
                loader.insert_global(name, value.clone());
            }
            let rulesets = loader.rulesets(&def_key, &def_repo, &exports)?;

            for ruleset_name in tags_by_ruleset.keys() {
                let ruleset =
                    rulesets
                        .get(ruleset_name)
                        .cloned()
                        .ok_or_else(|| EvalError::RulesetMissing {
                            module: def_key.clone(),
                            ruleset: ruleset_name.clone(),
                        })?;
                let top_module = build_top_module(state, &ruleset)?;
                let result = call_resolve_fn(&ruleset, top_module, &def_repo, ws)?;
                outcomes.push((ruleset_name.clone(), ruleset, result));
            }
        }

        for (ruleset_name, ruleset, result) in outcomes {
            record_resolve_result(&def_key, &def_repo, &exports, &ruleset_name, &ruleset, result, ws)?;
        }
    }
    Ok(())
}

/// Builds the `BazelModule` tree mirroring the selected graph, with rule
/// instances populated (and validated) for the given ruleset only.
fn build_top_module(
    state: &ResolveState,
    ruleset: &Ruleset,
) -> Result<BazelModuleRef, ResolveError> {
    let mut nodes: BTreeMap<ModuleKey, BazelModuleRef> = BTreeMap::new();
    for (key, module) in &state.dep_graph {
        let mut rule_instances: BTreeMap<String, Vec<RuleInstance>> = BTreeMap::new();
        for tag in &module.tags {
            if tag.module_key != ruleset.module_key || tag.ruleset_name != ruleset.name {
                continue;
            }
            let member = ruleset.member(&tag.rule_name).ok_or_else(|| {
                EvalError::schema(format!(
                    "{}: ruleset {} in module {} has no member rule named {:?}",
                    tag.pos, tag.ruleset_name, tag.module_key, tag.rule_name
                ))
            })?;
            if !tag.args.is_empty() {
                return Err(EvalError::schema(format!(
                    "{}: rule {} takes keyword arguments only",
                    tag.pos, tag.rule_name
                ))
                .into());
            }
            let attrs = instantiate_attrs(&member.attrs, &tag.kwargs)
                .map_err(|e| EvalError::schema(format!("{}: {e}", tag.pos)))?;
            rule_instances
                .entry(tag.rule_name.clone())
                .or_default()
                .push(RuleInstance {
                    rule_name: tag.rule_name.clone(),
                    attrs,
                });
        }
        nodes.insert(
            key.clone(),
            Rc::new(RefCell::new(BazelModule {
                name: module.key.name.clone(),
                version: module.key.version.clone(),
                bazel_deps: Vec::new(),
                rule_instances,
            })),
        );
    }

    // Second pass: link dep edges.
    for (key, module) in &state.dep_graph {
        let node = &nodes[key];
        for dep_key in module.deps.values() {
            let dep = Rc::clone(&nodes[dep_key]);
            node.borrow_mut().bazel_deps.push(dep);
        }
    }
    Ok(Rc::clone(&nodes[&state.root_key()]))
}

fn call_resolve_fn(
    ruleset: &Ruleset,
    top_module: BazelModuleRef,
    def_repo: &str,
    ws: &Workspace,
) -> Result<ResolveResult, ResolveError> {
    let cache = ws
        .cache()
        .ok_or(bzlmod_lockfile::LockfileError::Unbound)?
        .clone();
    let mut ctx = Context::for_resolve(top_module, def_repo, &cache, Some(ws));
    let result = ruleset.resolve_fn.call(&mut ctx)?;
    match result {
        Value::ResolveResult(result) => Ok((*result).clone()),
        other => Err(EvalError::schema(format!(
            "resolve_fn of {} did not return a resolve_result (got {})",
            ruleset.name,
            other.type_name()
        ))
        .into()),
    }
}

/// Records each generated repo with a `Generated` fetcher. A generated
/// repo sees all bazel_deps of its defining module, plus its sibling
/// generated repos.
fn record_resolve_result(
    def_key: &ModuleKey,
    def_repo: &str,
    exports: &str,
    ruleset_name: &str,
    ruleset: &Ruleset,
    result: ResolveResult,
    ws: &mut Workspace,
) -> Result<(), ResolveError> {
    let def_deps = ws
        .repos
        .get(def_repo)
        .map(|repo| repo.deps.clone())
        .unwrap_or_default();

    let environ_values: Vec<String> = ruleset
        .fetch_environ
        .iter()
        .map(|var| format!("{var}={}", std::env::var(var).unwrap_or_default()))
        .collect();

    for (repo_name, repo_info) in &result.repos {
        let repo_info_json = repo_info
            .to_json()
            .map_err(|e| EvalError::schema(format!("repo info of {repo_name}: {e}")))?;

        let mut deps = def_deps.clone();
        for sibling in result.repos.keys() {
            if sibling != repo_name {
                deps.insert(sibling.clone(), sibling.clone());
            }
        }

        let fingerprint = Generated::compute_fingerprint(
            def_key,
            ruleset_name,
            repo_name,
            &repo_info_json,
            &environ_values,
        );
        let mut repo = Repo::new(FetcherWrapper::wrap_generated(Generated {
            def_module_key: def_key.clone(),
            def_repo: def_repo.to_owned(),
            exports: exports.to_owned(),
            ruleset: ruleset_name.to_owned(),
            repo_info: repo_info_json,
            machine_specific: ruleset.machine_specific,
            fingerprint,
        }));
        repo.deps = deps;
        ws.repos.insert(repo_name.clone(), repo);
    }

    ws.toolchains.extend(result.toolchains);
    ws.exec_platforms.extend(result.exec_platforms);
    Ok(())
}
