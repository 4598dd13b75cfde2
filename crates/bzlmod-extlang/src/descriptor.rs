//! Discovery-time builtins for module descriptor files.
//!
//! A descriptor file declares the module's identity (`module`), its direct
//! dependencies (`bazel_dep`), and, in the root module only, workspace
//! settings and overrides. `module()` and `bazel_dep()` return handles
//! whose attribute calls are captured as tags. Non-root files see no-op
//! versions of `workspace_settings`, `override_dep` and every override
//! constructor.

use crate::eval::{exec_stmts, EvalHost, Scope};
use crate::syntax::parse;
use crate::tag::Tag;
use crate::value::{Builtin, CallArgs, Value};
use crate::{EvalError, SourcePos};
use bzlmod_common::{Label, ModuleKey};
use bzlmod_fetch::Patch;
use std::collections::{BTreeMap, HashMap};

/// User-specified redirection of how a module is obtained.
#[derive(Debug, Clone, PartialEq)]
pub enum Override {
    SingleVersion {
        version: String,
        registry: String,
        patches: Vec<Patch>,
    },
    MultipleVersion {
        versions: Vec<String>,
        registry: String,
    },
    /// Keep going through a registry (possibly a specific one), but append
    /// extra patches.
    Registry {
        registry: String,
        patches: Vec<Patch>,
    },
    LocalPath {
        path: String,
    },
    Archive {
        url: String,
        integrity: String,
        strip_prefix: String,
        patches: Vec<Patch>,
    },
    Git {
        repo: String,
        commit: String,
        patches: Vec<Patch>,
    },
}

pub type OverrideSet = BTreeMap<String, Override>;

/// Fields recorded by the `module()` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModuleDecl {
    pub name: String,
    pub version: String,
    pub compatibility_level: i64,
    pub bazel_compatibility: String,
    pub module_rule_exports: String,
    pub toolchains_to_register: Vec<String>,
    pub execution_platforms_to_register: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct WsSettings {
    pub vendor_dir: String,
    pub registries: Vec<String>,
}

/// Everything a descriptor file produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DescriptorOutput {
    pub module: Option<ModuleDecl>,
    pub ws_settings: Option<WsSettings>,
    /// repo_name → dep key, in declaration order under a stable map.
    pub deps: BTreeMap<String, ModuleKey>,
    pub overrides: OverrideSet,
    pub tags: Vec<Tag>,
}

struct DescriptorHost {
    root: bool,
    out: DescriptorOutput,
}

/// Executes a descriptor file. `root` selects whether settings and
/// overrides are honoured or no-ops.
pub fn execute_descriptor(
    file: &str,
    source: &str,
    root: bool,
) -> Result<DescriptorOutput, EvalError> {
    let stmts = parse(file, source)?;
    let mut host = DescriptorHost {
        root,
        out: DescriptorOutput::default(),
    };
    let mut scope = Scope::with_globals(&descriptor_globals());
    exec_stmts(&stmts, &mut scope, &mut host)?;
    Ok(host.out)
}

fn descriptor_globals() -> HashMap<String, Value> {
    let mut globals = HashMap::new();
    for builtin in [
        Builtin::Module,
        Builtin::BazelDep,
        Builtin::WorkspaceSettings,
        Builtin::OverrideDep,
        Builtin::SingleVersionOverride,
        Builtin::MultipleVersionOverride,
        Builtin::RegistryOverride,
        Builtin::ArchiveOverride,
        Builtin::GitOverride,
        Builtin::LocalPathOverride,
        Builtin::LabelCtor,
    ] {
        globals.insert(builtin.name().to_owned(), Value::Builtin(builtin));
    }
    globals
}

/// Reads the `patch_files`/`patch_strip` pair shared by override
/// constructors.
fn patch_kwargs(name: &str, args: &CallArgs, pos: &SourcePos) -> Result<Vec<Patch>, EvalError> {
    let files = args.string_list_kw(name, "patch_files", pos)?;
    let strip = args.int_kw(name, "patch_strip", pos)?.unwrap_or(0);
    if strip < 0 {
        return Err(EvalError::at(pos, format!("{name}: patch_strip may not be negative")));
    }
    Ok(files
        .into_iter()
        .map(|file| Patch {
            file,
            strip: strip as u32,
        })
        .collect())
}

impl EvalHost for DescriptorHost {
    fn call_builtin(
        &mut self,
        builtin: Builtin,
        args: CallArgs,
        pos: &SourcePos,
    ) -> Result<Value, EvalError> {
        // Non-root files get no-ops for settings, overrides, and the
        // override constructors.
        if !self.root
            && matches!(
                builtin,
                Builtin::WorkspaceSettings
                    | Builtin::OverrideDep
                    | Builtin::SingleVersionOverride
                    | Builtin::MultipleVersionOverride
                    | Builtin::RegistryOverride
                    | Builtin::ArchiveOverride
                    | Builtin::GitOverride
                    | Builtin::LocalPathOverride
            )
        {
            return Ok(Value::None);
        }

        match builtin {
            Builtin::Module => self.module(args, pos),
            Builtin::BazelDep => self.bazel_dep(args, pos),
            Builtin::WorkspaceSettings => self.workspace_settings(args, pos),
            Builtin::OverrideDep => self.override_dep(args, pos),
            Builtin::SingleVersionOverride => {
                let name = builtin.name();
                args.no_positional(name, pos)?;
                args.check_known(name, &["version", "registry", "patch_files", "patch_strip"], pos)?;
                let version = args.required_str_kw(name, "version", pos)?;
                if version.is_empty() {
                    return Err(EvalError::at(pos, format!("{name}: version may not be empty")));
                }
                Ok(Value::Override(Override::SingleVersion {
                    version,
                    registry: args.str_kw(name, "registry", pos)?.unwrap_or_default(),
                    patches: patch_kwargs(name, &args, pos)?,
                }))
            }
            Builtin::MultipleVersionOverride => {
                let name = builtin.name();
                args.no_positional(name, pos)?;
                args.check_known(name, &["versions", "registry"], pos)?;
                let versions = args.string_list_kw(name, "versions", pos)?;
                if versions.is_empty() {
                    return Err(EvalError::at(pos, format!("{name}: versions may not be empty")));
                }
                Ok(Value::Override(Override::MultipleVersion {
                    versions,
                    registry: args.str_kw(name, "registry", pos)?.unwrap_or_default(),
                }))
            }
            Builtin::RegistryOverride => {
                let name = builtin.name();
                args.no_positional(name, pos)?;
                args.check_known(name, &["registry", "patch_files", "patch_strip"], pos)?;
                let registry = args.str_kw(name, "registry", pos)?.unwrap_or_default();
                let patches = patch_kwargs(name, &args, pos)?;
                if registry.is_empty() && patches.is_empty() {
                    return Err(EvalError::at(pos, format!("{name}: nothing is overridden")));
                }
                Ok(Value::Override(Override::Registry { registry, patches }))
            }
            Builtin::ArchiveOverride => {
                let name = builtin.name();
                args.no_positional(name, pos)?;
                args.check_known(
                    name,
                    &["url", "integrity", "strip_prefix", "patch_files", "patch_strip"],
                    pos,
                )?;
                Ok(Value::Override(Override::Archive {
                    url: args.required_str_kw(name, "url", pos)?,
                    integrity: args.str_kw(name, "integrity", pos)?.unwrap_or_default(),
                    strip_prefix: args.str_kw(name, "strip_prefix", pos)?.unwrap_or_default(),
                    patches: patch_kwargs(name, &args, pos)?,
                }))
            }
            Builtin::GitOverride => {
                let name = builtin.name();
                args.no_positional(name, pos)?;
                args.check_known(name, &["repo", "commit", "patch_files", "patch_strip"], pos)?;
                Ok(Value::Override(Override::Git {
                    repo: args.required_str_kw(name, "repo", pos)?,
                    commit: args.required_str_kw(name, "commit", pos)?,
                    patches: patch_kwargs(name, &args, pos)?,
                }))
            }
            Builtin::LocalPathOverride => {
                let name = builtin.name();
                args.no_positional(name, pos)?;
                args.check_known(name, &["path"], pos)?;
                Ok(Value::Override(Override::LocalPath {
                    path: args.required_str_kw(name, "path", pos)?,
                }))
            }
            Builtin::LabelCtor => label_ctor(args, pos),
            other => Err(EvalError::at(
                pos,
                format!("{} is not available in module descriptor files", other.name()),
            )),
        }
    }

    fn record_tag(&mut self, tag: Tag) -> Result<Value, EvalError> {
        self.out.tags.push(tag);
        Ok(Value::None)
    }
}

impl DescriptorHost {
    fn module(&mut self, args: CallArgs, pos: &SourcePos) -> Result<Value, EvalError> {
        let name = "module";
        args.no_positional(name, pos)?;
        args.check_known(
            name,
            &[
                "name",
                "version",
                "compatibility_level",
                "bazel_compatibility",
                "module_rule_exports",
                "toolchains_to_register",
                "execution_platforms_to_register",
            ],
            pos,
        )?;
        if self.out.module.is_some() {
            return Err(EvalError::at(pos, "module() may only be called once"));
        }
        let decl = ModuleDecl {
            name: args.str_kw(name, "name", pos)?.unwrap_or_default(),
            version: args.str_kw(name, "version", pos)?.unwrap_or_default(),
            compatibility_level: args.int_kw(name, "compatibility_level", pos)?.unwrap_or(0),
            bazel_compatibility: args
                .str_kw(name, "bazel_compatibility", pos)?
                .unwrap_or_default(),
            module_rule_exports: args
                .str_kw(name, "module_rule_exports", pos)?
                .unwrap_or_default(),
            toolchains_to_register: args.string_list_kw(name, "toolchains_to_register", pos)?,
            execution_platforms_to_register: args
                .string_list_kw(name, "execution_platforms_to_register", pos)?,
        };
        let key = ModuleKey::new(decl.name.clone(), decl.version.clone());
        self.out.module = Some(decl);
        Ok(Value::Handle(key))
    }

    fn bazel_dep(&mut self, args: CallArgs, pos: &SourcePos) -> Result<Value, EvalError> {
        let name = "bazel_dep";
        args.no_positional(name, pos)?;
        args.check_known(name, &["name", "version", "repo_name"], pos)?;
        let dep_name = args.required_str_kw(name, "name", pos)?;
        let version = args.required_str_kw(name, "version", pos)?;
        let repo_name = match args.str_kw(name, "repo_name", pos)? {
            Some(repo_name) if !repo_name.is_empty() => repo_name,
            _ => dep_name.clone(),
        };
        let key = ModuleKey::new(dep_name, version);
        self.out.deps.insert(repo_name, key.clone());
        Ok(Value::Handle(key))
    }

    fn workspace_settings(&mut self, args: CallArgs, pos: &SourcePos) -> Result<Value, EvalError> {
        let name = "workspace_settings";
        args.no_positional(name, pos)?;
        args.check_known(name, &["vendor_dir", "registries"], pos)?;
        if self.out.ws_settings.is_some() {
            return Err(EvalError::at(pos, "workspace_settings() may only be called once"));
        }
        self.out.ws_settings = Some(WsSettings {
            vendor_dir: args.str_kw(name, "vendor_dir", pos)?.unwrap_or_default(),
            registries: args.string_list_kw(name, "registries", pos)?,
        });
        Ok(Value::None)
    }

    fn override_dep(&mut self, args: CallArgs, pos: &SourcePos) -> Result<Value, EvalError> {
        let name = "override_dep";
        args.no_positional(name, pos)?;
        args.check_known(name, &["module_name", "override"], pos)?;
        let module_name = args.required_str_kw(name, "module_name", pos)?;
        let Some(Value::Override(override_)) = args.kwarg("override") else {
            return Err(EvalError::at(
                pos,
                format!("{name}: for override, want an override constructed by *_override()"),
            ));
        };
        if self.out.overrides.contains_key(&module_name) {
            return Err(EvalError::at(
                pos,
                format!("override_dep called twice on the same module {module_name}"),
            ));
        }
        self.out.overrides.insert(module_name, override_.clone());
        Ok(Value::None)
    }
}

/// `Label("...")`, shared by descriptor and exports files.
pub(crate) fn label_ctor(args: CallArgs, pos: &SourcePos) -> Result<Value, EvalError> {
    if args.pos_args.len() != 1 || !args.kwargs.is_empty() {
        return Err(EvalError::at(pos, "Label: want exactly one positional argument"));
    }
    let Value::Str(raw) = &args.pos_args[0] else {
        return Err(EvalError::at(
            pos,
            format!("Label: got {}, want string", args.pos_args[0].type_name()),
        ));
    };
    let label = Label::parse(raw).map_err(|e| EvalError::at(pos, e.to_string()))?;
    Ok(Value::Label(label))
}
