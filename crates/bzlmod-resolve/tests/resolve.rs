//! End-to-end resolution: discovery through the module-rule driver into a
//! populated lock workspace.

use bzlmod_common::ModuleKey;
use bzlmod_extlang::context::bfs;
use bzlmod_extlang::ruleset::FuncValue;
use bzlmod_extlang::value::Value;
use bzlmod_extlang::EvalError;
use bzlmod_fetch::{CacheDir, Fetcher, LocalPath};
use bzlmod_lockfile::Workspace;
use bzlmod_registry::{Fake, Registry};
use bzlmod_resolve::{resolve, ResolveOptions};
use bzlmod_testutil::write_file;
use std::path::Path;
use std::sync::Arc;

fn options(cache_root: &Path, registries: Vec<String>) -> ResolveOptions {
    let mut options = ResolveOptions::new(CacheDir::new(cache_root));
    options.registries = registries;
    options
}

/// A local-path module servable from a fake registry.
fn add_local_module(
    reg: &Arc<Fake>,
    root: &Path,
    name: &str,
    version: &str,
    module_bazel: &str,
    extra_files: &[(&str, &str)],
) {
    let dir = root.join(format!("{name}-{version}"));
    write_file(dir.join("MODULE.bazel"), module_bazel);
    for (rel, contents) in extra_files {
        write_file(dir.join(rel), contents);
    }
    reg.add_module(
        name,
        version,
        module_bazel,
        Some(Fetcher::LocalPath(LocalPath {
            path: dir.display().to_string(),
        })),
    );
}

#[test]
fn diamond_resolves_into_lock_workspace() {
    let tmp = tempfile::tempdir().unwrap();
    let ws_dir = tmp.path().join("ws");
    write_file(
        ws_dir.join("MODULE.bazel"),
        "module(name=\"A\")\nbazel_dep(name=\"B\", version=\"1.0\")\nbazel_dep(name=\"C\", version=\"2.0\")\n",
    );
    let reg = Fake::register("resolve-diamond");
    let modules = tmp.path().join("modules");
    add_local_module(
        &reg,
        &modules,
        "B",
        "1.0",
        "module(name=\"B\", version=\"1.0\")\nbazel_dep(name=\"D\", version=\"0.1\")\n",
        &[],
    );
    add_local_module(
        &reg,
        &modules,
        "C",
        "2.0",
        "module(name=\"C\", version=\"2.0\")\nbazel_dep(name=\"D\", version=\"0.1\")\n",
        &[],
    );
    add_local_module(&reg, &modules, "D", "0.1", "module(name=\"D\", version=\"0.1\")\n", &[]);

    let ws = resolve(&ws_dir, options(&tmp.path().join("cache"), vec![reg.url()])).unwrap();

    assert_eq!(ws.root_module_name, "A");
    let names: Vec<&String> = ws.repos.keys().collect();
    assert_eq!(names, vec!["A", "B", "C", "D"]);
    assert_eq!(ws.repos["A"].deps["B"], "B");
    assert_eq!(ws.repos["A"].deps["C"], "C");
    assert_eq!(ws.repos["B"].deps["D"], "D");
    assert_eq!(ws.repos["C"].deps["D"], "D");

    // The root repo resolves to the workspace dir itself.
    assert_eq!(ws.fetch("A").unwrap(), ws_dir);
    // Dep repos materialise through their fetchers.
    let b_path = ws.fetch("B").unwrap();
    assert!(b_path.join("MODULE.bazel").exists());
}

#[test]
fn version_conflicts_select_the_highest() {
    let tmp = tempfile::tempdir().unwrap();
    let ws_dir = tmp.path().join("ws");
    write_file(
        ws_dir.join("MODULE.bazel"),
        "module(name=\"A\")\nbazel_dep(name=\"B\", version=\"1.0\")\nbazel_dep(name=\"C\", version=\"1.0\")\n",
    );
    let reg = Fake::register("resolve-mvs");
    let modules = tmp.path().join("modules");
    add_local_module(
        &reg,
        &modules,
        "B",
        "1.0",
        "module(name=\"B\", version=\"1.0\")\nbazel_dep(name=\"D\", version=\"1.0\")\n",
        &[],
    );
    add_local_module(
        &reg,
        &modules,
        "C",
        "1.0",
        "module(name=\"C\", version=\"1.0\")\nbazel_dep(name=\"D\", version=\"2.0\")\n",
        &[],
    );
    add_local_module(&reg, &modules, "D", "1.0", "module(name=\"D\", version=\"1.0\")\n", &[]);
    add_local_module(&reg, &modules, "D", "2.0", "module(name=\"D\", version=\"2.0\")\n", &[]);

    let ws = resolve(&ws_dir, options(&tmp.path().join("cache"), vec![reg.url()])).unwrap();
    // One D survives, and both B's and C's edges point at it.
    assert_eq!(ws.repos["B"].deps["D"], "D");
    assert_eq!(ws.repos["C"].deps["D"], "D");
    let d_path = ws.fetch("D").unwrap();
    assert!(d_path.display().to_string().contains("D-2.0"));
}

#[test]
fn module_rules_generate_repos() {
    let tmp = tempfile::tempdir().unwrap();
    let ws_dir = tmp.path().join("ws");
    write_file(
        ws_dir.join("MODULE.bazel"),
        r#"module(name="A")
dep = bazel_dep(name="tools", version="1.0")
dep.toolchains(version="9.1", os="linux")
"#,
    );
    let reg = Fake::register("resolve-modrules");
    let modules = tmp.path().join("modules");
    add_local_module(
        &reg,
        &modules,
        "tools",
        "1.0",
        "module(name=\"tools\", version=\"1.0\", module_rule_exports=\"rules.bzl\")\n",
        &[(
            "rules.bzl",
            "toolchains = module_rule(\n    resolve_fn = toolchains_resolve,\n    fetch_fn = toolchains_fetch,\n    attrs = {\"version\": attr.string(mandatory=True), \"os\": attr.string(values=[\"linux\", \"darwin\"])},\n)\n",
        )],
    );

    // The resolve fn walks the module tree, collects every `toolchains`
    // instance, and generates one repo per requested version.
    let resolve_fn = FuncValue::new(|ctx| {
        let top = ctx.top_module.clone().expect("resolve context has a top module");
        let mut repos = Vec::new();
        bfs::<EvalError>(&top, |module| {
            for instance in module.rule_instances.get("toolchains").into_iter().flatten() {
                let Some(Value::Str(version)) = instance.attrs.get("version") else {
                    return Err(EvalError::context("missing version attr"));
                };
                repos.push((
                    format!("toolchain_{}", version.replace('.', "_")),
                    Value::Dict(vec![(
                        Value::Str("version".into()),
                        Value::Str(version.clone()),
                    )]),
                ));
            }
            Ok(())
        })?;
        Ok(Value::ResolveResult(std::rc::Rc::new(
            bzlmod_extlang::context::ResolveResult {
                repos: repos.into_iter().collect(),
                toolchains: vec!["//:tc".to_owned()],
                exec_platforms: Vec::new(),
            },
        )))
    });
    let fetch_fn = FuncValue::new(|ctx| {
        let Value::Dict(pairs) = &ctx.repo_info else {
            return Err(EvalError::context("expected dict repo info"));
        };
        let Value::Str(version) = &pairs[0].1 else {
            return Err(EvalError::context("expected string version"));
        };
        ctx.file(&Value::Str("VERSION".into()), version, false)?;
        Ok(Value::None)
    });

    let mut options = options(&tmp.path().join("cache"), vec![reg.url()]);
    options.native_globals.insert(
        "toolchains_resolve".to_owned(),
        Value::Function(resolve_fn),
    );
    options
        .native_globals
        .insert("toolchains_fetch".to_owned(), Value::Function(fetch_fn));

    let ws = resolve(&ws_dir, options).unwrap();

    // The generated repo is recorded with a generated fetcher that
    // carries the serialised repo info and the defining module.
    let generated = ws.repos["toolchain_9_1"]
        .fetcher
        .generated
        .as_ref()
        .expect("generated fetcher");
    assert_eq!(generated.def_module_key, ModuleKey::new("tools", "1.0"));
    assert_eq!(generated.ruleset, "toolchains");
    assert_eq!(generated.repo_info, serde_json::json!({"version": "9.1"}));
    assert_eq!(ws.toolchains, vec!["//:tc"]);
    // Generated repos inherit the defining module's deps.
    assert_eq!(ws.repos["toolchain_9_1"].deps, ws.repos["tools"].deps);

    // Fetching the generated repo runs the fetch fn.
    let path = ws.fetch("toolchain_9_1").unwrap();
    assert_eq!(std::fs::read_to_string(path.join("VERSION")).unwrap(), "9.1");
}

#[test]
fn attr_validation_failures_stop_the_driver() {
    let tmp = tempfile::tempdir().unwrap();
    let ws_dir = tmp.path().join("ws");
    write_file(
        ws_dir.join("MODULE.bazel"),
        "dep = bazel_dep(name=\"tools\", version=\"1.0\")\ndep.toolchains(os=\"windows\")\nmodule(name=\"A\")\n",
    );
    let reg = Fake::register("resolve-bad-attr");
    let modules = tmp.path().join("modules");
    add_local_module(
        &reg,
        &modules,
        "tools",
        "1.0",
        "module(name=\"tools\", version=\"1.0\", module_rule_exports=\"rules.bzl\")\n",
        &[(
            "rules.bzl",
            "toolchains = module_rule(\n    resolve_fn = toolchains_resolve,\n    fetch_fn = toolchains_fetch,\n    attrs = {\"os\": attr.string(values=[\"linux\", \"darwin\"])},\n)\n",
        )],
    );

    let mut options = options(&tmp.path().join("cache"), vec![reg.url()]);
    options.native_globals.insert(
        "toolchains_resolve".to_owned(),
        Value::Function(FuncValue::new(|_| Ok(Value::None))),
    );
    options.native_globals.insert(
        "toolchains_fetch".to_owned(),
        Value::Function(FuncValue::new(|_| Ok(Value::None))),
    );
    // "windows" is outside the enumerated values.
    assert!(resolve(&ws_dir, options).is_err());
}

#[test]
fn undefined_ruleset_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let ws_dir = tmp.path().join("ws");
    write_file(
        ws_dir.join("MODULE.bazel"),
        "dep = bazel_dep(name=\"tools\", version=\"1.0\")\ndep.no_such_ruleset()\nmodule(name=\"A\")\n",
    );
    let reg = Fake::register("resolve-undefined-ruleset");
    let modules = tmp.path().join("modules");
    add_local_module(
        &reg,
        &modules,
        "tools",
        "1.0",
        "module(name=\"tools\", version=\"1.0\", module_rule_exports=\"rules.bzl\")\n",
        &[("rules.bzl", "x = 1\n")],
    );

    let err = resolve(
        &ws_dir,
        options(&tmp.path().join("cache"), vec![reg.url()]),
    )
    .unwrap_err();
    assert!(err.to_string().contains("no_such_ruleset"), "{err}");
}

#[test]
fn lock_file_round_trips_through_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let ws_dir = tmp.path().join("ws");
    write_file(
        ws_dir.join("MODULE.bazel"),
        "module(name=\"A\")\nbazel_dep(name=\"B\", version=\"1.0\")\n",
    );
    let reg = Fake::register("resolve-lock-roundtrip");
    let modules = tmp.path().join("modules");
    add_local_module(&reg, &modules, "B", "1.0", "module(name=\"B\", version=\"1.0\")\n", &[]);

    let ws = resolve(&ws_dir, options(&tmp.path().join("cache"), vec![reg.url()])).unwrap();
    let lock_path = ws_dir.join(bzlmod_lockfile::LOCKFILE_NAME);
    ws.write_to_file(&lock_path).unwrap();

    let mut loaded = Workspace::read_from_file(&lock_path).unwrap();
    loaded.bind(&ws_dir, CacheDir::new(tmp.path().join("cache")));
    assert_eq!(loaded.repos, ws.repos);
    let path = loaded.fetch("B").unwrap();
    assert!(path.join("MODULE.bazel").exists());
}
