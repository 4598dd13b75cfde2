//! Statement evaluation against a host.
//!
//! The evaluator binds names, resolves attribute access and routes calls.
//! Everything behavioural (what `module()` records, what a rule call
//! captures) lives in the [`EvalHost`] the file is executed under.

use crate::syntax::{Expr, Stmt};
use crate::tag::Tag;
use crate::value::{Builtin, CallArgs, Value};
use crate::{EvalError, SourcePos};
use std::collections::HashMap;

/// The host side of an executing file: builtin behaviour and tag capture.
pub trait EvalHost {
    fn call_builtin(
        &mut self,
        builtin: Builtin,
        args: CallArgs,
        pos: &SourcePos,
    ) -> Result<Value, EvalError>;

    /// Invoked when a ruleset or rule callable is called.
    fn record_tag(&mut self, tag: Tag) -> Result<Value, EvalError>;
}

/// Name bindings of an executing file.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub bindings: HashMap<String, Value>,
}

impl Scope {
    pub fn with_globals(globals: &HashMap<String, Value>) -> Scope {
        Scope {
            bindings: globals.clone(),
        }
    }
}

/// Executes a sequence of statements, returning the final bindings.
pub fn exec_stmts(
    stmts: &[Stmt],
    scope: &mut Scope,
    host: &mut dyn EvalHost,
) -> Result<(), EvalError> {
    for stmt in stmts {
        exec_stmt(stmt, scope, host)?;
    }
    Ok(())
}

pub fn exec_stmt(stmt: &Stmt, scope: &mut Scope, host: &mut dyn EvalHost) -> Result<(), EvalError> {
    let value = eval_expr(&stmt.expr, scope, host)?;
    if let Some(target) = &stmt.target {
        scope.bindings.insert(target.clone(), value);
    }
    Ok(())
}

pub fn eval_expr(
    expr: &Expr,
    scope: &mut Scope,
    host: &mut dyn EvalHost,
) -> Result<Value, EvalError> {
    match expr {
        Expr::NoneLit(_) => Ok(Value::None),
        Expr::Bool(b, _) => Ok(Value::Bool(*b)),
        Expr::Int(i, _) => Ok(Value::Int(*i)),
        Expr::Str(s, _) => Ok(Value::Str(s.clone())),
        Expr::List(items, _) => Ok(Value::List(
            items
                .iter()
                .map(|item| eval_expr(item, scope, host))
                .collect::<Result<_, _>>()?,
        )),
        Expr::Dict(pairs, _) => Ok(Value::Dict(
            pairs
                .iter()
                .map(|(k, v)| Ok::<_, EvalError>((eval_expr(k, scope, host)?, eval_expr(v, scope, host)?)))
                .collect::<Result<_, _>>()?,
        )),
        Expr::Ident(name, pos) => scope
            .bindings
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::at(pos, format!("undefined name {name:?}"))),
        Expr::Attr(receiver, name, pos) => {
            let receiver = eval_expr(receiver, scope, host)?;
            attr_access(&receiver, name, pos)
        }
        Expr::Call {
            callee,
            args,
            kwargs,
            pos,
        } => {
            let callee = eval_expr(callee, scope, host)?;
            let call_args = CallArgs {
                pos_args: args
                    .iter()
                    .map(|arg| eval_expr(arg, scope, host))
                    .collect::<Result<_, _>>()?,
                kwargs: kwargs
                    .iter()
                    .map(|(name, value)| Ok((name.clone(), eval_expr(value, scope, host)?)))
                    .collect::<Result<Vec<_>, EvalError>>()?,
            };
            call_value(&callee, call_args, pos, host)
        }
    }
}

/// Attribute access. Module and dep handles are "smart objects": any
/// attribute yields a ruleset callable, and an attribute on that yields a
/// rule callable.
fn attr_access(receiver: &Value, name: &str, pos: &SourcePos) -> Result<Value, EvalError> {
    match receiver {
        Value::Struct(fields) => fields.get(name).cloned().ok_or_else(|| {
            EvalError::at(pos, format!("struct has no attribute {name:?}"))
        }),
        Value::Handle(key) => Ok(Value::RulesetCallable {
            module: key.clone(),
            ruleset: name.to_owned(),
        }),
        Value::RulesetCallable { module, ruleset } => Ok(Value::RuleCallable {
            module: module.clone(),
            ruleset: ruleset.clone(),
            rule: name.to_owned(),
        }),
        other => Err(EvalError::at(
            pos,
            format!("{} has no attribute {name:?}", other.type_name()),
        )),
    }
}

pub fn call_value(
    callee: &Value,
    args: CallArgs,
    pos: &SourcePos,
    host: &mut dyn EvalHost,
) -> Result<Value, EvalError> {
    match callee {
        Value::Builtin(builtin) => host.call_builtin(*builtin, args, pos),
        // Calling `handle.ruleset` records a tag whose rule name is the
        // ruleset name itself.
        Value::RulesetCallable { module, ruleset } => host.record_tag(Tag {
            module_key: module.clone(),
            ruleset_name: ruleset.clone(),
            rule_name: ruleset.clone(),
            args: args.pos_args,
            kwargs: args.kwargs,
            pos: pos.clone(),
        }),
        Value::RuleCallable {
            module,
            ruleset,
            rule,
        } => host.record_tag(Tag {
            module_key: module.clone(),
            ruleset_name: ruleset.clone(),
            rule_name: rule.clone(),
            args: args.pos_args,
            kwargs: args.kwargs,
            pos: pos.clone(),
        }),
        other => Err(EvalError::at(
            pos,
            format!("{} is not callable", other.type_name()),
        )),
    }
}
