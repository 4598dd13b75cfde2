//! The label-aware exports loader.
//!
//! Exports files are located by resolving a label against the workspace
//! (which fetches the defining repo on demand), executed under the
//! extension-definition builtins, and cached per file path. `load()`
//! statements pull bindings from other exports files; a file that is
//! reached again while still in progress is a load cycle.

use crate::eval::{exec_stmt, eval_expr, Scope};
use crate::ruleset::{exports_globals, ExportsHost, Ruleset};
use crate::syntax::{parse, Expr, Stmt};
use crate::value::Value;
use crate::{EvalError, SourcePos};
use bzlmod_common::{Label, LabelResolver, ModuleKey};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::rc::Rc;

enum LoadState {
    InProgress,
    Done(Rc<HashMap<String, Value>>),
}

pub struct RulesetLoader<'a> {
    resolver: &'a dyn LabelResolver,
    /// Extra bindings visible to every exports file, notably the native
    /// resolve/fetch functions rulesets are built from.
    globals: HashMap<String, Value>,
    cache: HashMap<PathBuf, LoadState>,
}

impl<'a> RulesetLoader<'a> {
    pub fn new(resolver: &'a dyn LabelResolver) -> RulesetLoader<'a> {
        RulesetLoader {
            resolver,
            globals: exports_globals(),
            cache: HashMap::new(),
        }
    }

    pub fn insert_global(&mut self, name: &str, value: Value) {
        self.globals.insert(name.to_owned(), value);
    }

    /// Loads the exports file of the given module and returns the rulesets
    /// it exports, keyed by binding name.
    pub fn rulesets(
        &mut self,
        def_module_key: &ModuleKey,
        def_repo: &str,
        exports_path: &str,
    ) -> Result<BTreeMap<String, Rc<Ruleset>>, EvalError> {
        if exports_path.is_empty() {
            return Err(EvalError::schema(format!(
                "module {def_module_key} does not declare module_rule_exports"
            )));
        }
        let label = Label {
            repo: None,
            package: None,
            target: exports_path.to_owned(),
        };
        let resolved = self.resolver.resolve_label(def_repo, "", &label)?;
        let bindings = self.load_file(&resolved.repo, &resolved.package, resolved.filename)?;

        let mut rulesets = BTreeMap::new();
        for (name, value) in bindings.iter() {
            if let Value::Ruleset(ruleset) = value {
                rulesets.insert(
                    name.clone(),
                    Rc::new(ruleset.with_identity(name, def_module_key)),
                );
            }
        }
        Ok(rulesets)
    }

    fn load_file(
        &mut self,
        cur_repo: &str,
        cur_package: &str,
        path: PathBuf,
    ) -> Result<Rc<HashMap<String, Value>>, EvalError> {
        match self.cache.get(&path) {
            Some(LoadState::Done(bindings)) => return Ok(Rc::clone(bindings)),
            Some(LoadState::InProgress) => {
                return Err(EvalError::LoadCycle {
                    path: path.display().to_string(),
                })
            }
            None => {}
        }
        self.cache.insert(path.clone(), LoadState::InProgress);

        let result = self.exec_file(cur_repo, cur_package, &path);
        match result {
            Ok(bindings) => {
                let bindings = Rc::new(bindings);
                self.cache
                    .insert(path, LoadState::Done(Rc::clone(&bindings)));
                Ok(bindings)
            }
            Err(e) => {
                // Leave the in-progress marker out so a later attempt can
                // retry cleanly.
                self.cache.remove(&path);
                Err(e)
            }
        }
    }

    fn exec_file(
        &mut self,
        cur_repo: &str,
        cur_package: &str,
        path: &std::path::Path,
    ) -> Result<HashMap<String, Value>, EvalError> {
        let source = std::fs::read_to_string(path)?;
        let file_name = path.display().to_string();
        let stmts = parse(&file_name, &source)?;

        let mut scope = Scope::with_globals(&self.globals);
        for stmt in &stmts {
            if let Some((label_expr, symbols, pos)) = as_load_stmt(stmt) {
                self.exec_load(cur_repo, cur_package, label_expr, symbols, pos, &mut scope)?;
            } else {
                exec_stmt(stmt, &mut scope, &mut ExportsHost)?;
            }
        }

        // Exported bindings are the names the file itself introduced.
        let mut exported = scope.bindings;
        for name in self.globals.keys() {
            exported.remove(name);
        }
        Ok(exported)
    }

    fn exec_load(
        &mut self,
        cur_repo: &str,
        cur_package: &str,
        label_expr: &Expr,
        symbols: Vec<(String, Expr)>,
        pos: &SourcePos,
        scope: &mut Scope,
    ) -> Result<(), EvalError> {
        let label_value = eval_expr(label_expr, scope, &mut ExportsHost)?;
        let Value::Str(raw_label) = &label_value else {
            return Err(EvalError::at(
                pos,
                format!("load: got {}, want string label", label_value.type_name()),
            ));
        };
        let label = Label::parse(raw_label).map_err(|e| EvalError::at(pos, e.to_string()))?;
        let resolved = self.resolver.resolve_label(cur_repo, cur_package, &label)?;
        let loaded = self.load_file(&resolved.repo, &resolved.package, resolved.filename)?;

        for (local_name, symbol_expr) in symbols {
            let symbol_value = eval_expr(&symbol_expr, scope, &mut ExportsHost)?;
            let Value::Str(symbol) = &symbol_value else {
                return Err(EvalError::at(
                    pos,
                    format!("load: got {}, want string symbol", symbol_value.type_name()),
                ));
            };
            let value = loaded.get(symbol).ok_or_else(|| {
                EvalError::at(pos, format!("load: {raw_label} does not export {symbol:?}"))
            })?;
            let local_name = if local_name.is_empty() {
                symbol.clone()
            } else {
                local_name
            };
            scope.bindings.insert(local_name, value.clone());
        }
        Ok(())
    }
}

/// Recognises a top-level `load("label", "sym", alias="sym2")` statement.
/// Returns the label expression and (local name, symbol expression) pairs.
fn as_load_stmt(stmt: &Stmt) -> Option<(&Expr, Vec<(String, Expr)>, &SourcePos)> {
    if stmt.target.is_some() {
        return None;
    }
    let Expr::Call {
        callee,
        args,
        kwargs,
        pos,
    } = &stmt.expr
    else {
        return None;
    };
    let Expr::Ident(name, _) = &**callee else {
        return None;
    };
    if name != "load" || args.is_empty() {
        return None;
    }
    let mut symbols = Vec::new();
    for arg in &args[1..] {
        // A bare "sym" imports under its own name.
        if let Expr::Str(symbol, _) = arg {
            symbols.push((symbol.clone(), arg.clone()));
        } else {
            symbols.push((String::new(), arg.clone()));
        }
    }
    for (alias, expr) in kwargs {
        symbols.push((alias.clone(), expr.clone()));
    }
    Some((&args[0], symbols, pos))
}
