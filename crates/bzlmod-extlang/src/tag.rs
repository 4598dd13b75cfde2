//! Captured extension calls.

use crate::value::Value;
use crate::SourcePos;
use bzlmod_common::ModuleKey;

/// One recorded extension-call site inside a module descriptor: a call of
/// the form `handle.ruleset.rule(args...)` where `handle` came from
/// `module()` or `bazel_dep()`.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    /// The module defining the ruleset (the handle's module).
    pub module_key: ModuleKey,
    pub ruleset_name: String,
    pub rule_name: String,
    pub args: Vec<Value>,
    pub kwargs: Vec<(String, Value)>,
    pub pos: SourcePos,
}
