//! The fetcher for generated repos: repos produced by a ruleset's resolve
//! function and materialised by its fetch function.

use crate::context::Context;
use crate::loader::RulesetLoader;
use crate::value::Value;
use crate::EvalError;
use bzlmod_common::{hash, HashPart, ModuleKey};
use bzlmod_fetch::{verify_fingerprint_file, write_fingerprint_file, FetchEnv};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A repo to be fetched by running the fetch function of a ruleset. All
/// fields except the fingerprint describe where the ruleset lives; the
/// `repo_info` is whatever the resolve function returned for this repo,
/// carried as canonical JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generated {
    pub def_module_key: ModuleKey,
    pub def_repo: String,
    /// The defining module's `module_rule_exports` path.
    pub exports: String,
    pub ruleset: String,
    pub repo_info: serde_json::Value,
    /// Machine-specific repos are never placed in the vendor dir.
    pub machine_specific: bool,
    pub fingerprint: String,
}

impl Generated {
    /// Computes the fingerprint for a generated repo. The values of the
    /// ruleset's `fetch_environ` variables participate, so environment
    /// changes invalidate machine-specific repos.
    pub fn compute_fingerprint(
        def_module_key: &ModuleKey,
        ruleset: &str,
        repo_name: &str,
        repo_info: &serde_json::Value,
        environ_values: &[String],
    ) -> String {
        let info = repo_info.to_string();
        hash(&[
            "modRule".into(),
            (&def_module_key.name).into(),
            (&def_module_key.version).into(),
            ruleset.into(),
            repo_name.into(),
            HashPart::Str(&info),
            environ_values.into(),
        ])
    }

    /// Materialises the repo by running the ruleset's fetch function in a
    /// fingerprint-gated directory. Generated repos live under the
    /// per-workspace cache dir, or under the vendor dir when vendoring
    /// (unless machine-specific).
    pub fn fetch(
        &self,
        repo_name: &str,
        env: &FetchEnv<'_>,
        loader: &mut RulesetLoader<'_>,
    ) -> Result<PathBuf, EvalError> {
        let repo_path = match env.vendor_dir {
            Some(vendor) if !self.machine_specific => vendor.join(repo_name),
            _ => env.cache.workspace_dir(env.ws_dir).join(repo_name),
        };

        if verify_fingerprint_file(&repo_path, &self.fingerprint) {
            return Ok(repo_path);
        }

        let rulesets = loader.rulesets(&self.def_module_key, &self.def_repo, &self.exports)?;
        let ruleset = rulesets
            .get(&self.ruleset)
            .ok_or_else(|| EvalError::RulesetMissing {
                module: self.def_module_key.clone(),
                ruleset: self.ruleset.clone(),
            })?;

        let repo_info = Value::from_json(&self.repo_info).map_err(EvalError::context)?;
        std::fs::create_dir_all(&repo_path)?;
        let mut ctx = Context::for_fetch(
            repo_name,
            repo_info,
            repo_path.clone(),
            &self.def_repo,
            env.cache,
            env.resolver,
        );
        ruleset.fetch_fn.call(&mut ctx)?;

        write_fingerprint_file(&repo_path, &self.fingerprint)?;
        Ok(repo_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ruleset::FuncValue;
    use bzlmod_common::{Label, LabelResolver, ResolveLabelError, ResolvedLabel};
    use bzlmod_fetch::CacheDir;
    use bzlmod_testutil::write_file;
    use std::path::Path;

    struct DirResolver {
        root: PathBuf,
    }

    impl LabelResolver for DirResolver {
        fn resolve_label(
            &self,
            cur_repo: &str,
            _cur_package: &str,
            label: &Label,
        ) -> Result<ResolvedLabel, ResolveLabelError> {
            let repo = label.repo.clone().filter(|r| !r.is_empty()).unwrap_or_else(|| cur_repo.to_owned());
            Ok(ResolvedLabel {
                repo: repo.clone(),
                package: label.package.clone().unwrap_or_default(),
                filename: self.root.join(&repo).join(&label.target),
            })
        }
    }

    fn generated(fingerprint: &str) -> Generated {
        Generated {
            def_module_key: ModuleKey::new("defmod", "1.0"),
            def_repo: "defmod".to_owned(),
            exports: "rules.bzl".to_owned(),
            ruleset: "gen".to_owned(),
            repo_info: serde_json::json!({"marker": "hello"}),
            machine_specific: false,
            fingerprint: fingerprint.to_owned(),
        }
    }

    fn loader_with_writer(resolver: &DirResolver) -> RulesetLoader<'_> {
        let mut loader = RulesetLoader::new(resolver);
        loader.insert_global(
            "gen_resolve",
            Value::Function(FuncValue::new(|_| Ok(Value::None))),
        );
        // The fetch fn writes a file derived from the repo info.
        loader.insert_global(
            "gen_fetch",
            Value::Function(FuncValue::new(|ctx| {
                let Value::Dict(pairs) = &ctx.repo_info else {
                    return Err(EvalError::context("expected dict repo info"));
                };
                let Value::Str(marker) = &pairs[0].1 else {
                    return Err(EvalError::context("expected string marker"));
                };
                let content = format!("{}:{marker}", ctx.name);
                ctx.file(&Value::Str("generated.txt".into()), &content, false)?;
                Ok(Value::None)
            })),
        );
        loader
    }

    fn exports_fixture(root: &Path) {
        write_file(
            root.join("defmod/rules.bzl"),
            "gen = module_rule(resolve_fn=gen_resolve, fetch_fn=gen_fetch)\n",
        );
    }

    #[test]
    fn runs_fetch_fn_and_gates_on_fingerprint() {
        let tmp = tempfile::tempdir().unwrap();
        exports_fixture(tmp.path());
        let resolver = DirResolver {
            root: tmp.path().to_owned(),
        };
        let cache = CacheDir::new(tmp.path().join("cache"));
        let env = FetchEnv {
            cache: &cache,
            vendor_dir: None,
            ws_dir: tmp.path(),
            resolver: Some(&resolver),
        };

        let gen = generated("FP1");
        let mut loader = loader_with_writer(&resolver);
        let path = gen.fetch("myrepo", &env, &mut loader).unwrap();
        assert_eq!(path, cache.workspace_dir(tmp.path()).join("myrepo"));
        assert_eq!(
            std::fs::read_to_string(path.join("generated.txt")).unwrap(),
            "myrepo:hello"
        );
        assert!(verify_fingerprint_file(&path, "FP1"));

        // Ready directory: the fetch fn must not run again. Prove it by
        // changing the generated file and re-fetching.
        std::fs::write(path.join("generated.txt"), "touched").unwrap();
        let mut loader = loader_with_writer(&resolver);
        gen.fetch("myrepo", &env, &mut loader).unwrap();
        assert_eq!(
            std::fs::read_to_string(path.join("generated.txt")).unwrap(),
            "touched"
        );
    }

    #[test]
    fn vendoring_places_repo_in_vendor_dir() {
        let tmp = tempfile::tempdir().unwrap();
        exports_fixture(tmp.path());
        let resolver = DirResolver {
            root: tmp.path().to_owned(),
        };
        let cache = CacheDir::new(tmp.path().join("cache"));
        let vendor = tmp.path().join("vendor");
        let env = FetchEnv {
            cache: &cache,
            vendor_dir: Some(&vendor),
            ws_dir: tmp.path(),
            resolver: Some(&resolver),
        };

        let gen = generated("FP2");
        let mut loader = loader_with_writer(&resolver);
        let path = gen.fetch("vendored", &env, &mut loader).unwrap();
        assert_eq!(path, vendor.join("vendored"));

        // Machine-specific repos ignore the vendor dir.
        let mut machine = generated("FP3");
        machine.machine_specific = true;
        let mut loader = loader_with_writer(&resolver);
        let path = machine.fetch("machine", &env, &mut loader).unwrap();
        assert_eq!(path, cache.workspace_dir(tmp.path()).join("machine"));
    }

    #[test]
    fn unknown_ruleset_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        exports_fixture(tmp.path());
        let resolver = DirResolver {
            root: tmp.path().to_owned(),
        };
        let cache = CacheDir::new(tmp.path().join("cache"));
        let env = FetchEnv {
            cache: &cache,
            vendor_dir: None,
            ws_dir: tmp.path(),
            resolver: Some(&resolver),
        };

        let mut gen = generated("FP4");
        gen.ruleset = "nonexistent".to_owned();
        let mut loader = loader_with_writer(&resolver);
        let err = gen.fetch("r", &env, &mut loader).unwrap_err();
        assert!(matches!(err, EvalError::RulesetMissing { .. }));
    }

    #[test]
    fn fingerprint_depends_on_inputs() {
        let key = ModuleKey::new("m", "1.0");
        let info = serde_json::json!({"v": 1});
        let base = Generated::compute_fingerprint(&key, "rs", "repo", &info, &[]);
        assert_eq!(base.len(), 32);
        assert_eq!(
            base,
            Generated::compute_fingerprint(&key, "rs", "repo", &info, &[])
        );
        assert_ne!(
            base,
            Generated::compute_fingerprint(&key, "rs", "other", &info, &[])
        );
        assert_ne!(
            base,
            Generated::compute_fingerprint(&key, "rs", "repo", &serde_json::json!({"v": 2}), &[])
        );
        assert_ne!(
            base,
            Generated::compute_fingerprint(&key, "rs", "repo", &info, &["PATH=/x".to_owned()])
        );
    }

    #[test]
    fn serde_round_trip() {
        let gen = generated("FP5");
        let json = serde_json::to_string(&gen).unwrap();
        let back: Generated = serde_json::from_str(&json).unwrap();
        assert_eq!(back, gen);
    }
}
