//! The extension-language host.
//!
//! Module descriptor files (`MODULE.bazel`) and extension export files are
//! written in a small configuration language. This crate embeds an
//! evaluator for the declarative statement subset those files use
//! (assignments, literals, dotted attribute access and calls) and exposes
//! the host side: descriptor builtins with tag capture, the typed `attr`
//! schema system, ruleset definitions with a label-aware loader, the
//! `Context` capability handed to resolve/fetch functions, and the fetcher
//! for generated repos. A full general-purpose interpreter is an external
//! collaborator and would slot in behind the same builtin table and
//! [`Value`] model.

pub mod attr;
pub mod context;
pub mod descriptor;
pub mod eval;
pub mod generated;
pub mod loader;
pub mod ruleset;
pub mod syntax;
pub mod tag;
pub mod value;

pub use attr::{instantiate_attrs, AttrKind, AttrSpec};
pub use context::{BazelModule, BazelModuleRef, Context, OsInfo, ResolveResult, RuleInstance};
pub use descriptor::{
    execute_descriptor, DescriptorOutput, ModuleDecl, Override, OverrideSet, WsSettings,
};
pub use generated::Generated;
pub use loader::RulesetLoader;
pub use ruleset::{FuncValue, Ruleset, RulesetMember};
pub use tag::Tag;
pub use value::{CallArgs, Value};

use bzlmod_common::{ModuleKey, ResolveLabelError};
use bzlmod_fetch::FetchError;
use std::fmt;
use thiserror::Error;

/// A source position; part of every evaluation error and captured tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourcePos {
    pub file: String,
    pub line: u32,
    pub col: u32,
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.col)
    }
}

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("{pos}: syntax error: {message}")]
    Parse { pos: SourcePos, message: String },
    #[error("{pos}: {message}")]
    Eval { pos: SourcePos, message: String },
    #[error("{message}")]
    Schema { message: String },
    #[error("{message}")]
    Context { message: String },
    #[error("module {module} does not export a ruleset named {ruleset:?}")]
    RulesetMissing { module: ModuleKey, ruleset: String },
    #[error("load cycle detected at {path}")]
    LoadCycle { path: String },
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Label(#[from] ResolveLabelError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EvalError {
    pub fn at(pos: &SourcePos, message: impl Into<String>) -> EvalError {
        EvalError::Eval {
            pos: pos.clone(),
            message: message.into(),
        }
    }

    pub fn schema(message: impl Into<String>) -> EvalError {
        EvalError::Schema {
            message: message.into(),
        }
    }

    pub fn context(message: impl Into<String>) -> EvalError {
        EvalError::Context {
            message: message.into(),
        }
    }
}
