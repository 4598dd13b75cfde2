//! Typed attribute declarations for ruleset members, and their
//! instantiation against a tag's keyword arguments.

use crate::value::{CallArgs, Value};
use crate::{EvalError, SourcePos};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    Bool,
    Int,
    IntList,
    String,
    StringDict,
    StringList,
    StringListDict,
}

impl AttrKind {
    fn describe(&self) -> &'static str {
        match self {
            AttrKind::Bool => "bool",
            AttrKind::Int => "int",
            AttrKind::IntList => "list of ints",
            AttrKind::String => "string",
            AttrKind::StringDict => "dict of strings",
            AttrKind::StringList => "list of strings",
            AttrKind::StringListDict => "dict of string lists",
        }
    }

    /// The default used when the declaration doesn't name one.
    fn implicit_default(&self) -> Value {
        match self {
            AttrKind::Bool => Value::Bool(false),
            AttrKind::Int => Value::Int(0),
            AttrKind::String => Value::Str(String::new()),
            AttrKind::IntList | AttrKind::StringList => Value::List(Vec::new()),
            AttrKind::StringDict | AttrKind::StringListDict => Value::Dict(Vec::new()),
        }
    }

    fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (AttrKind::Bool, Value::Bool(_)) => true,
            (AttrKind::Int, Value::Int(_)) => true,
            (AttrKind::String, Value::Str(_)) => true,
            (AttrKind::IntList, Value::List(items)) => {
                items.iter().all(|item| matches!(item, Value::Int(_)))
            }
            (AttrKind::StringList, Value::List(items)) => {
                items.iter().all(|item| matches!(item, Value::Str(_)))
            }
            (AttrKind::StringDict, Value::Dict(pairs)) => pairs
                .iter()
                .all(|(k, v)| matches!(k, Value::Str(_)) && matches!(v, Value::Str(_))),
            (AttrKind::StringListDict, Value::Dict(pairs)) => pairs.iter().all(|(k, v)| {
                matches!(k, Value::Str(_))
                    && matches!(v, Value::List(items) if items.iter().all(|item| matches!(item, Value::Str(_))))
            }),
            _ => false,
        }
    }

    fn is_collection(&self) -> bool {
        matches!(
            self,
            AttrKind::IntList | AttrKind::StringList | AttrKind::StringDict | AttrKind::StringListDict
        )
    }
}

/// A declared attribute of a ruleset member.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrSpec {
    pub kind: AttrKind,
    pub default: Value,
    pub doc: String,
    pub mandatory: bool,
    /// Enumerated allowed values; empty means unconstrained.
    pub values: Vec<Value>,
    pub allow_empty: bool,
}

impl AttrSpec {
    /// Builds an attr declaration from an `attr.<kind>(...)` call.
    pub fn from_call(kind: AttrKind, args: &CallArgs, pos: &SourcePos) -> Result<AttrSpec, EvalError> {
        let name = match kind {
            AttrKind::Bool => "attr.bool",
            AttrKind::Int => "attr.int",
            AttrKind::IntList => "attr.int_list",
            AttrKind::String => "attr.string",
            AttrKind::StringDict => "attr.string_dict",
            AttrKind::StringList => "attr.string_list",
            AttrKind::StringListDict => "attr.string_list_dict",
        };
        args.no_positional(name, pos)?;
        args.check_known(name, &["default", "doc", "mandatory", "values", "allow_empty"], pos)?;

        let default = match args.kwarg("default") {
            None | Some(Value::None) => kind.implicit_default(),
            Some(value) => {
                if !kind.accepts(value) {
                    return Err(EvalError::at(
                        pos,
                        format!(
                            "{name}: default of type {} doesn't match the attribute type",
                            value.type_name()
                        ),
                    ));
                }
                value.clone()
            }
        };
        let values = match args.kwarg("values") {
            None => Vec::new(),
            Some(Value::List(items)) => items.clone(),
            Some(other) => {
                return Err(EvalError::at(
                    pos,
                    format!("{name}: for values, got {}, want list", other.type_name()),
                ))
            }
        };
        Ok(AttrSpec {
            kind,
            default,
            doc: args.str_kw(name, "doc", pos)?.unwrap_or_default(),
            mandatory: args.bool_kw(name, "mandatory", pos)?.unwrap_or(false),
            values,
            allow_empty: args.bool_kw(name, "allow_empty", pos)?.unwrap_or(true),
        })
    }

    fn validate(&self, attr_name: &str, value: &Value) -> Result<(), EvalError> {
        if !self.kind.accepts(value) {
            return Err(EvalError::schema(format!(
                "attribute {attr_name:?}: got {}, want {}",
                value.type_name(),
                self.kind.describe()
            )));
        }
        if !self.values.is_empty() && !self.values.contains(value) {
            return Err(EvalError::schema(format!(
                "attribute {attr_name:?}: value not in the allowed set"
            )));
        }
        if self.kind.is_collection() && !self.allow_empty {
            let empty = match value {
                Value::List(items) => items.is_empty(),
                Value::Dict(pairs) => pairs.is_empty(),
                _ => false,
            };
            if empty {
                return Err(EvalError::schema(format!(
                    "attribute {attr_name:?} may not be empty"
                )));
            }
        }
        Ok(())
    }
}

/// Instantiates a member's declared attributes against a tag's keyword
/// arguments: validates every provided value, fills defaults, and rejects
/// unknown and missing-mandatory attributes.
pub fn instantiate_attrs(
    attrs: &BTreeMap<String, AttrSpec>,
    kwargs: &[(String, Value)],
) -> Result<BTreeMap<String, Value>, EvalError> {
    let mut out = BTreeMap::new();
    for (name, value) in kwargs {
        let Some(spec) = attrs.get(name) else {
            return Err(EvalError::schema(format!("unknown attribute {name:?}")));
        };
        spec.validate(name, value)?;
        out.insert(name.clone(), value.clone());
    }
    for (name, spec) in attrs {
        if out.contains_key(name) {
            continue;
        }
        if spec.mandatory {
            return Err(EvalError::schema(format!(
                "missing mandatory attribute {name:?}"
            )));
        }
        out.insert(name.clone(), spec.default.clone());
    }
    Ok(out)
}
