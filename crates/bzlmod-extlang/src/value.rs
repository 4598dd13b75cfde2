//! The guest value model.
//!
//! Everything that flows between descriptor files, rulesets and the host is
//! a [`Value`]: plain data (none/bool/int/string/list/dict/struct), labels
//! and paths, the opaque handles returned by `module()`/`bazel_dep()`, and
//! host-native wrappers (overrides, attr schemas, rulesets, functions).
//! `repo_info` values round-trip through canonical JSON.

use crate::attr::AttrSpec;
use crate::descriptor::Override;
use crate::ruleset::{FuncValue, Ruleset, RulesetMember};
use crate::{EvalError, SourcePos};
use bzlmod_common::{Label, ModuleKey};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::rc::Rc;

/// Builtins are identified values; the evaluator routes their calls to the
/// executing host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Module,
    BazelDep,
    WorkspaceSettings,
    OverrideDep,
    SingleVersionOverride,
    MultipleVersionOverride,
    RegistryOverride,
    ArchiveOverride,
    GitOverride,
    LocalPathOverride,
    ModuleRule,
    ModuleRuleset,
    ModuleRulesetMember,
    AttrBool,
    AttrInt,
    AttrIntList,
    AttrString,
    AttrStringDict,
    AttrStringList,
    AttrStringListDict,
    LabelCtor,
    ResolveResultCtor,
}

impl Builtin {
    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Module => "module",
            Builtin::BazelDep => "bazel_dep",
            Builtin::WorkspaceSettings => "workspace_settings",
            Builtin::OverrideDep => "override_dep",
            Builtin::SingleVersionOverride => "single_version_override",
            Builtin::MultipleVersionOverride => "multiple_version_override",
            Builtin::RegistryOverride => "registry_override",
            Builtin::ArchiveOverride => "archive_override",
            Builtin::GitOverride => "git_override",
            Builtin::LocalPathOverride => "local_path_override",
            Builtin::ModuleRule => "module_rule",
            Builtin::ModuleRuleset => "module_ruleset",
            Builtin::ModuleRulesetMember => "module_ruleset_member",
            Builtin::AttrBool => "attr.bool",
            Builtin::AttrInt => "attr.int",
            Builtin::AttrIntList => "attr.int_list",
            Builtin::AttrString => "attr.string",
            Builtin::AttrStringDict => "attr.string_dict",
            Builtin::AttrStringList => "attr.string_list",
            Builtin::AttrStringListDict => "attr.string_list_dict",
            Builtin::LabelCtor => "Label",
            Builtin::ResolveResultCtor => "resolve_result",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
    Dict(Vec<(Value, Value)>),
    Struct(BTreeMap<String, Value>),
    Label(Label),
    Path(PathBuf),
    /// Tag receiver returned by `module()` and `bazel_dep()`.
    Handle(ModuleKey),
    /// Calling `handle.ruleset` records a tag whose rule name equals
    /// the ruleset name.
    RulesetCallable { module: ModuleKey, ruleset: String },
    /// Calling `handle.ruleset.rule` records a tag with a distinct
    /// rule name.
    RuleCallable {
        module: ModuleKey,
        ruleset: String,
        rule: String,
    },
    Builtin(Builtin),
    Override(Override),
    Attr(Box<AttrSpec>),
    Member(RulesetMember),
    Ruleset(Rc<Ruleset>),
    Function(FuncValue),
    ResolveResult(Rc<crate::context::ResolveResult>),
}

impl Value {
    /// A short type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Struct(_) => "struct",
            Value::Label(_) => "Label",
            Value::Path(_) => "path",
            Value::Handle(_) => "module_handle",
            Value::RulesetCallable { .. } => "ruleset_callable",
            Value::RuleCallable { .. } => "rule_callable",
            Value::Builtin(_) => "builtin",
            Value::Override(_) => "override",
            Value::Attr(_) => "attr",
            Value::Member(_) => "module_ruleset_member",
            Value::Ruleset(_) => "module_ruleset",
            Value::Function(_) => "function",
            Value::ResolveResult(_) => "resolve_result",
        }
    }

    /// Extracts a list of strings; `None` passes through as an empty list.
    pub fn string_list(&self) -> Result<Vec<String>, String> {
        match self {
            Value::None => Ok(Vec::new()),
            Value::List(items) => items
                .iter()
                .map(|item| match item {
                    Value::Str(s) => Ok(s.clone()),
                    other => Err(format!("got {}, want string", other.type_name())),
                })
                .collect(),
            other => Err(format!("got {}, want list of strings", other.type_name())),
        }
    }

    /// Serialises to canonical JSON. Only data values survive: dict keys
    /// must be strings, and host-native values are rejected.
    pub fn to_json(&self) -> Result<serde_json::Value, String> {
        use serde_json::Value as Json;
        Ok(match self {
            Value::None => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::Number((*i).into()),
            Value::Str(s) => Json::String(s.clone()),
            Value::List(items) => Json::Array(
                items
                    .iter()
                    .map(|item| item.to_json())
                    .collect::<Result<_, _>>()?,
            ),
            Value::Dict(pairs) => {
                let mut map = serde_json::Map::new();
                for (k, v) in pairs {
                    let Value::Str(key) = k else {
                        return Err(format!(
                            "dict key of type {} is not serializable",
                            k.type_name()
                        ));
                    };
                    map.insert(key.clone(), v.to_json()?);
                }
                Json::Object(map)
            }
            Value::Struct(fields) => {
                let mut map = serde_json::Map::new();
                for (k, v) in fields {
                    map.insert(k.clone(), v.to_json()?);
                }
                Json::Object(map)
            }
            Value::Label(label) => Json::String(label.to_string()),
            other => return Err(format!("value of type {} is not serializable", other.type_name())),
        })
    }

    /// The inverse of [`to_json`](Self::to_json); objects become dicts.
    pub fn from_json(json: &serde_json::Value) -> Result<Value, String> {
        use serde_json::Value as Json;
        Ok(match json {
            Json::Null => Value::None,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => return Err(format!("non-integer number {n} is not representable")),
            },
            Json::String(s) => Value::Str(s.clone()),
            Json::Array(items) => Value::List(
                items
                    .iter()
                    .map(Value::from_json)
                    .collect::<Result<_, _>>()?,
            ),
            Json::Object(map) => Value::Dict(
                map.iter()
                    .map(|(k, v)| Ok::<_, String>((Value::Str(k.clone()), Value::from_json(v)?)))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

/// Positional and keyword arguments of a call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallArgs {
    pub pos_args: Vec<Value>,
    pub kwargs: Vec<(String, Value)>,
}

impl CallArgs {
    pub fn kwarg(&self, name: &str) -> Option<&Value> {
        self.kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Rejects positional arguments (most builtins are keyword-only).
    pub fn no_positional(&self, builtin: &str, pos: &SourcePos) -> Result<(), EvalError> {
        if self.pos_args.is_empty() {
            Ok(())
        } else {
            Err(EvalError::at(
                pos,
                format!("{builtin}: unexpected positional arguments"),
            ))
        }
    }

    /// Rejects keyword arguments outside the allowed set.
    pub fn check_known(
        &self,
        builtin: &str,
        allowed: &[&str],
        pos: &SourcePos,
    ) -> Result<(), EvalError> {
        for (name, _) in &self.kwargs {
            if !allowed.contains(&name.as_str()) {
                return Err(EvalError::at(
                    pos,
                    format!("{builtin}: unexpected keyword argument {name:?}"),
                ));
            }
        }
        Ok(())
    }

    pub fn str_kw(&self, builtin: &str, name: &str, pos: &SourcePos) -> Result<Option<String>, EvalError> {
        match self.kwarg(name) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(other) => Err(EvalError::at(
                pos,
                format!("{builtin}: for {name}, got {}, want string", other.type_name()),
            )),
        }
    }

    pub fn required_str_kw(&self, builtin: &str, name: &str, pos: &SourcePos) -> Result<String, EvalError> {
        self.str_kw(builtin, name, pos)?.ok_or_else(|| {
            EvalError::at(pos, format!("{builtin}: missing required argument {name}"))
        })
    }

    pub fn int_kw(&self, builtin: &str, name: &str, pos: &SourcePos) -> Result<Option<i64>, EvalError> {
        match self.kwarg(name) {
            None => Ok(None),
            Some(Value::Int(i)) => Ok(Some(*i)),
            Some(other) => Err(EvalError::at(
                pos,
                format!("{builtin}: for {name}, got {}, want int", other.type_name()),
            )),
        }
    }

    pub fn bool_kw(&self, builtin: &str, name: &str, pos: &SourcePos) -> Result<Option<bool>, EvalError> {
        match self.kwarg(name) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(other) => Err(EvalError::at(
                pos,
                format!("{builtin}: for {name}, got {}, want bool", other.type_name()),
            )),
        }
    }

    pub fn string_list_kw(
        &self,
        builtin: &str,
        name: &str,
        pos: &SourcePos,
    ) -> Result<Vec<String>, EvalError> {
        match self.kwarg(name) {
            None => Ok(Vec::new()),
            Some(value) => value
                .string_list()
                .map_err(|e| EvalError::at(pos, format!("{builtin}: for {name}, {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_round_trip() {
        // Keys are given in sorted order, matching the canonical object
        // ordering JSON objects come back in.
        let value = Value::Dict(vec![
            (Value::Str("count".into()), Value::Int(3)),
            (Value::Str("empty".into()), Value::None),
            (Value::Str("fast".into()), Value::Bool(true)),
            (Value::Str("name".into()), Value::Str("toolchain".into())),
            (
                Value::Str("parts".into()),
                Value::List(vec![Value::Str("a".into()), Value::Str("b".into())]),
            ),
        ]);
        let json = value.to_json().unwrap();
        let back = Value::from_json(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn struct_serialises_as_object() {
        let mut fields = BTreeMap::new();
        fields.insert("x".to_owned(), Value::Int(1));
        let json = Value::Struct(fields).to_json().unwrap();
        assert_eq!(json, serde_json::json!({"x": 1}));
    }

    #[test]
    fn non_data_values_are_rejected() {
        assert!(Value::Handle(ModuleKey::new("a", "1.0")).to_json().is_err());
        let non_string_key = Value::Dict(vec![(Value::Int(1), Value::None)]);
        assert!(non_string_key.to_json().is_err());
    }

    #[test]
    fn string_list_extraction() {
        let ok = Value::List(vec![Value::Str("a".into()), Value::Str("b".into())]);
        assert_eq!(ok.string_list().unwrap(), vec!["a", "b"]);
        assert_eq!(Value::None.string_list().unwrap(), Vec::<String>::new());
        assert!(Value::List(vec![Value::Int(1)]).string_list().is_err());
        assert!(Value::Str("a".into()).string_list().is_err());
    }

    #[test]
    fn kwarg_lookup() {
        let args = CallArgs {
            pos_args: vec![],
            kwargs: vec![("name".into(), Value::Str("x".into()))],
        };
        assert_eq!(args.kwarg("name"), Some(&Value::Str("x".into())));
        assert_eq!(args.kwarg("version"), None);
    }
}
