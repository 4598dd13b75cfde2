//! Ruleset definitions: the extension-definition builtins executed in
//! exports files.
//!
//! A ruleset names a resolve function (chooses repos for the whole
//! workspace) and a fetch function (materialises one generated repo), plus
//! a set of member rules with typed attribute schemas. `module_rule` is
//! sugar for a singleton ruleset whose only member carries the ruleset's
//! own name. The functions themselves are native host values injected into
//! the loader's globals; see the crate docs for the interpreter boundary.

use crate::attr::{AttrKind, AttrSpec};
use crate::context::Context;
use crate::descriptor::label_ctor;
use crate::eval::EvalHost;
use crate::tag::Tag;
use crate::value::{Builtin, CallArgs, Value};
use crate::{EvalError, SourcePos};
use bzlmod_common::ModuleKey;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

/// A native function callable with a [`Context`]. Resolve functions return
/// a `resolve_result(...)` value; fetch functions return `None`.
#[derive(Clone)]
pub struct FuncValue(pub Rc<dyn Fn(&mut Context<'_>) -> Result<Value, EvalError>>);

impl FuncValue {
    pub fn new(f: impl Fn(&mut Context<'_>) -> Result<Value, EvalError> + 'static) -> FuncValue {
        FuncValue(Rc::new(f))
    }

    pub fn call(&self, ctx: &mut Context<'_>) -> Result<Value, EvalError> {
        (self.0)(ctx)
    }
}

impl fmt::Debug for FuncValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<function>")
    }
}

impl PartialEq for FuncValue {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// One member rule of a ruleset.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RulesetMember {
    pub doc: String,
    pub attrs: BTreeMap<String, AttrSpec>,
}

#[derive(Debug, Clone, PartialEq)]
enum Members {
    /// `module_rule`: one member, addressed by the ruleset's own name.
    Singleton(RulesetMember),
    Named(BTreeMap<String, RulesetMember>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ruleset {
    /// The exported binding name; filled in by the loader.
    pub name: String,
    /// The module that defined this ruleset; filled in by the loader.
    pub module_key: ModuleKey,
    pub resolve_fn: FuncValue,
    pub fetch_fn: FuncValue,
    pub doc: String,
    pub machine_specific: bool,
    /// Environment variables whose values participate in generated-repo
    /// fingerprints.
    pub fetch_environ: Vec<String>,
    members: Members,
}

impl Ruleset {
    pub fn member(&self, rule_name: &str) -> Option<&RulesetMember> {
        match &self.members {
            Members::Singleton(member) if rule_name == self.name => Some(member),
            Members::Singleton(_) => None,
            Members::Named(map) => map.get(rule_name),
        }
    }

    /// Used by the loader when collecting exported bindings.
    pub(crate) fn with_identity(&self, name: &str, module_key: &ModuleKey) -> Ruleset {
        let mut ruleset = self.clone();
        ruleset.name = name.to_owned();
        ruleset.module_key = module_key.clone();
        ruleset
    }
}

/// The host under which exports files run. Everything here is a pure
/// constructor; tags cannot be recorded outside descriptor files.
pub struct ExportsHost;

pub fn exports_globals() -> HashMap<String, Value> {
    let mut globals = HashMap::new();
    for builtin in [
        Builtin::ModuleRule,
        Builtin::ModuleRuleset,
        Builtin::ModuleRulesetMember,
        Builtin::LabelCtor,
        Builtin::ResolveResultCtor,
    ] {
        globals.insert(builtin.name().to_owned(), Value::Builtin(builtin));
    }
    let mut attr = BTreeMap::new();
    for (member, builtin) in [
        ("bool", Builtin::AttrBool),
        ("int", Builtin::AttrInt),
        ("int_list", Builtin::AttrIntList),
        ("string", Builtin::AttrString),
        ("string_dict", Builtin::AttrStringDict),
        ("string_list", Builtin::AttrStringList),
        ("string_list_dict", Builtin::AttrStringListDict),
    ] {
        attr.insert(member.to_owned(), Value::Builtin(builtin));
    }
    globals.insert("attr".to_owned(), Value::Struct(attr));
    globals
}

impl EvalHost for ExportsHost {
    fn call_builtin(
        &mut self,
        builtin: Builtin,
        args: CallArgs,
        pos: &SourcePos,
    ) -> Result<Value, EvalError> {
        match builtin {
            Builtin::ModuleRule => module_rule(args, pos),
            Builtin::ModuleRuleset => module_ruleset(args, pos),
            Builtin::ModuleRulesetMember => {
                Ok(Value::Member(ruleset_member("module_ruleset_member", &args, pos)?))
            }
            Builtin::AttrBool => attr_builtin(AttrKind::Bool, &args, pos),
            Builtin::AttrInt => attr_builtin(AttrKind::Int, &args, pos),
            Builtin::AttrIntList => attr_builtin(AttrKind::IntList, &args, pos),
            Builtin::AttrString => attr_builtin(AttrKind::String, &args, pos),
            Builtin::AttrStringDict => attr_builtin(AttrKind::StringDict, &args, pos),
            Builtin::AttrStringList => attr_builtin(AttrKind::StringList, &args, pos),
            Builtin::AttrStringListDict => attr_builtin(AttrKind::StringListDict, &args, pos),
            Builtin::LabelCtor => label_ctor(args, pos),
            Builtin::ResolveResultCtor => crate::context::resolve_result_ctor(args, pos),
            other => Err(EvalError::at(
                pos,
                format!("{} is not available in exports files", other.name()),
            )),
        }
    }

    fn record_tag(&mut self, tag: Tag) -> Result<Value, EvalError> {
        Err(EvalError::at(
            &tag.pos,
            "extension calls may only appear in module descriptor files",
        ))
    }
}

fn attr_builtin(kind: AttrKind, args: &CallArgs, pos: &SourcePos) -> Result<Value, EvalError> {
    Ok(Value::Attr(Box::new(AttrSpec::from_call(kind, args, pos)?)))
}

/// Reads the shared `doc`/`attrs` keyword pair of member declarations.
fn ruleset_member(name: &str, args: &CallArgs, pos: &SourcePos) -> Result<RulesetMember, EvalError> {
    args.no_positional(name, pos)?;
    args.check_known(name, &["doc", "attrs"], pos)?;
    Ok(RulesetMember {
        doc: args.str_kw(name, "doc", pos)?.unwrap_or_default(),
        attrs: attrs_dict(name, args.kwarg("attrs"), pos)?,
    })
}

fn attrs_dict(
    name: &str,
    value: Option<&Value>,
    pos: &SourcePos,
) -> Result<BTreeMap<String, AttrSpec>, EvalError> {
    let mut attrs = BTreeMap::new();
    match value {
        None | Some(Value::None) => {}
        Some(Value::Dict(pairs)) => {
            for (key, value) in pairs {
                let Value::Str(attr_name) = key else {
                    return Err(EvalError::at(
                        pos,
                        format!("{name}: attrs keys must be strings, got {}", key.type_name()),
                    ));
                };
                let Value::Attr(spec) = value else {
                    return Err(EvalError::at(
                        pos,
                        format!("{name}: got {}, want attr", value.type_name()),
                    ));
                };
                attrs.insert(attr_name.clone(), (**spec).clone());
            }
        }
        Some(other) => {
            return Err(EvalError::at(
                pos,
                format!("{name}: for attrs, got {}, want dict", other.type_name()),
            ))
        }
    }
    Ok(attrs)
}

fn func_kwarg(name: &str, args: &CallArgs, kw: &str, pos: &SourcePos) -> Result<FuncValue, EvalError> {
    match args.kwarg(kw) {
        Some(Value::Function(f)) => Ok(f.clone()),
        Some(other) => Err(EvalError::at(
            pos,
            format!("{name}: for {kw}, got {}, want function", other.type_name()),
        )),
        None => Err(EvalError::at(pos, format!("{name}: missing required argument {kw}"))),
    }
}

fn module_rule(args: CallArgs, pos: &SourcePos) -> Result<Value, EvalError> {
    let name = "module_rule";
    args.no_positional(name, pos)?;
    args.check_known(
        name,
        &["resolve_fn", "fetch_fn", "doc", "attrs", "machine_specific", "fetch_environ"],
        pos,
    )?;
    Ok(Value::Ruleset(Rc::new(Ruleset {
        name: String::new(),
        module_key: ModuleKey::default(),
        resolve_fn: func_kwarg(name, &args, "resolve_fn", pos)?,
        fetch_fn: func_kwarg(name, &args, "fetch_fn", pos)?,
        doc: args.str_kw(name, "doc", pos)?.unwrap_or_default(),
        machine_specific: args.bool_kw(name, "machine_specific", pos)?.unwrap_or(false),
        fetch_environ: args.string_list_kw(name, "fetch_environ", pos)?,
        members: Members::Singleton(RulesetMember {
            doc: String::new(),
            attrs: attrs_dict(name, args.kwarg("attrs"), pos)?,
        }),
    })))
}

fn module_ruleset(args: CallArgs, pos: &SourcePos) -> Result<Value, EvalError> {
    let name = "module_ruleset";
    args.no_positional(name, pos)?;
    args.check_known(
        name,
        &["resolve_fn", "fetch_fn", "members", "doc", "machine_specific", "fetch_environ"],
        pos,
    )?;
    let mut members = BTreeMap::new();
    match args.kwarg("members") {
        None | Some(Value::None) => {}
        Some(Value::Dict(pairs)) => {
            for (key, value) in pairs {
                let Value::Str(member_name) = key else {
                    return Err(EvalError::at(
                        pos,
                        format!("{name}: members keys must be strings, got {}", key.type_name()),
                    ));
                };
                let Value::Member(member) = value else {
                    return Err(EvalError::at(
                        pos,
                        format!(
                            "{name}: got {}, want module_ruleset_member",
                            value.type_name()
                        ),
                    ));
                };
                members.insert(member_name.clone(), member.clone());
            }
        }
        Some(other) => {
            return Err(EvalError::at(
                pos,
                format!("{name}: for members, got {}, want dict", other.type_name()),
            ))
        }
    }
    Ok(Value::Ruleset(Rc::new(Ruleset {
        name: String::new(),
        module_key: ModuleKey::default(),
        resolve_fn: func_kwarg(name, &args, "resolve_fn", pos)?,
        fetch_fn: func_kwarg(name, &args, "fetch_fn", pos)?,
        doc: args.str_kw(name, "doc", pos)?.unwrap_or_default(),
        machine_specific: args.bool_kw(name, "machine_specific", pos)?.unwrap_or(false),
        fetch_environ: args.string_list_kw(name, "fetch_environ", pos)?,
        members: Members::Named(members),
    })))
}
