//! The `Context` capability handed to resolve and fetch functions, and the
//! `BazelModule` tree that exposes the dependency graph to resolve
//! functions.

use crate::value::{CallArgs, Value};
use crate::{EvalError, SourcePos};
use bzlmod_common::paths::normalize_path;
use bzlmod_common::{integrity, Label, LabelResolver};
use bzlmod_fetch::{download, extract, CacheDir, Patch};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::rc::Rc;
use std::time::{Duration, Instant};
use tracing::info;

/// A node of the dependency graph as seen by resolve functions. Mirrors
/// the selected graph; `rule_instances` holds the validated instantiations
/// of this module's tags for the ruleset being resolved.
#[derive(Debug, Default)]
pub struct BazelModule {
    pub name: String,
    pub version: String,
    pub bazel_deps: Vec<BazelModuleRef>,
    /// rule name → instances, in tag source order.
    pub rule_instances: BTreeMap<String, Vec<RuleInstance>>,
}

/// Graphs can contain diamonds (and, in principle, cycles), so nodes are
/// shared and linked after construction.
pub type BazelModuleRef = Rc<RefCell<BazelModule>>;

#[derive(Debug, Clone, PartialEq)]
pub struct RuleInstance {
    pub rule_name: String,
    pub attrs: BTreeMap<String, Value>,
}

/// Breadth-first walk over the module tree, visiting each node once.
pub fn bfs<E>(
    top: &BazelModuleRef,
    mut visit: impl FnMut(&BazelModule) -> Result<(), E>,
) -> Result<(), E> {
    let mut queue = vec![Rc::clone(top)];
    let mut seen = vec![Rc::as_ptr(top)];
    let mut idx = 0;
    while idx < queue.len() {
        let module = Rc::clone(&queue[idx]);
        idx += 1;
        visit(&module.borrow())?;
        for dep in &module.borrow().bazel_deps {
            if !seen.contains(&Rc::as_ptr(dep)) {
                seen.push(Rc::as_ptr(dep));
                queue.push(Rc::clone(dep));
            }
        }
    }
    Ok(())
}

/// What a resolve function returns: the generated repos (name → opaque
/// repo info) plus toolchains and execution platforms to register.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolveResult {
    pub repos: BTreeMap<String, Value>,
    pub toolchains: Vec<String>,
    pub exec_platforms: Vec<String>,
}

/// The `resolve_result(repos={}, toolchains=[], execution_platforms=[])`
/// builtin.
pub(crate) fn resolve_result_ctor(args: CallArgs, pos: &SourcePos) -> Result<Value, EvalError> {
    let name = "resolve_result";
    args.no_positional(name, pos)?;
    args.check_known(name, &["repos", "toolchains", "execution_platforms"], pos)?;
    let mut repos = BTreeMap::new();
    match args.kwarg("repos") {
        None | Some(Value::None) => {}
        Some(Value::Dict(pairs)) => {
            for (key, value) in pairs {
                let Value::Str(repo_name) = key else {
                    return Err(EvalError::at(
                        pos,
                        format!("{name}: repos keys must be strings, got {}", key.type_name()),
                    ));
                };
                repos.insert(repo_name.clone(), value.clone());
            }
        }
        Some(other) => {
            return Err(EvalError::at(
                pos,
                format!("{name}: for repos, got {}, want dict", other.type_name()),
            ))
        }
    }
    Ok(Value::ResolveResult(Rc::new(ResolveResult {
        repos,
        toolchains: args.string_list_kw(name, "toolchains", pos)?,
        exec_platforms: args.string_list_kw(name, "execution_platforms", pos)?,
    })))
}

/// Process environment and normalised OS name, as exposed through
/// `ctx.os`.
#[derive(Debug, Clone)]
pub struct OsInfo {
    pub environ: BTreeMap<String, String>,
    pub name: String,
}

impl OsInfo {
    pub fn current() -> OsInfo {
        OsInfo {
            environ: std::env::vars().collect(),
            // Normalised to match what build files historically expect.
            name: match std::env::consts::OS {
                "windows" => "windows 10".to_owned(),
                "macos" => "mac os x".to_owned(),
                other => other.to_owned(),
            },
        }
    }
}

/// The capability object for resolve and fetch functions.
///
/// During resolution there is no repo yet: `name` is empty, `repo_info` is
/// `None`, `top_module` is set and `root_path` is empty. During a fetch it
/// is the other way around.
pub struct Context<'a> {
    pub name: String,
    pub os: OsInfo,
    pub repo_info: Value,
    pub top_module: Option<BazelModuleRef>,
    /// Where relative paths land; the repo directory during a fetch.
    pub root_path: PathBuf,
    cache: &'a CacheDir,
    resolver: Option<&'a dyn LabelResolver>,
    /// The repo labels are resolved against: the module defining the
    /// running ruleset.
    cur_repo: String,
}

/// The return value of `ctx.execute()`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecResult {
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    pub fn into_value(self) -> Value {
        let mut fields = BTreeMap::new();
        fields.insert("return_code".to_owned(), Value::Int(self.return_code.into()));
        fields.insert("stdout".to_owned(), Value::Str(self.stdout));
        fields.insert("stderr".to_owned(), Value::Str(self.stderr));
        Value::Struct(fields)
    }
}

/// The return value of `ctx.download()` / `ctx.download_and_extract()`.
fn download_info(sha256: &[u8]) -> Value {
    let hex: String = sha256.iter().map(|b| format!("{b:02x}")).collect();
    let mut fields = BTreeMap::new();
    fields.insert("sha256".to_owned(), Value::Str(hex));
    fields.insert(
        "integrity".to_owned(),
        Value::Str(integrity::from_sha256_digest(sha256)),
    );
    Value::Struct(fields)
}

impl<'a> Context<'a> {
    pub fn for_resolve(
        top_module: BazelModuleRef,
        cur_repo: &str,
        cache: &'a CacheDir,
        resolver: Option<&'a dyn LabelResolver>,
    ) -> Context<'a> {
        Context {
            name: String::new(),
            os: OsInfo::current(),
            repo_info: Value::None,
            top_module: Some(top_module),
            root_path: PathBuf::new(),
            cache,
            resolver,
            cur_repo: cur_repo.to_owned(),
        }
    }

    pub fn for_fetch(
        repo_name: &str,
        repo_info: Value,
        repo_path: PathBuf,
        cur_repo: &str,
        cache: &'a CacheDir,
        resolver: Option<&'a dyn LabelResolver>,
    ) -> Context<'a> {
        Context {
            name: repo_name.to_owned(),
            os: OsInfo::current(),
            repo_info,
            top_module: None,
            root_path: repo_path,
            cache,
            resolver,
            cur_repo: cur_repo.to_owned(),
        }
    }

    /// Resolves a string, path or label value to an absolute file path.
    /// Strings are taken relative to the context root; labels go through
    /// the workspace's label resolver.
    pub fn resolve_path(&self, value: &Value) -> Result<PathBuf, EvalError> {
        match value {
            Value::None => Ok(self.root_path.clone()),
            Value::Str(s) => Ok(normalize_path(&self.root_path, s)),
            Value::Path(p) => Ok(p.clone()),
            Value::Label(label) => self.resolve_label(label),
            other => Err(EvalError::context(format!(
                "expected string, path, or Label, got {}",
                other.type_name()
            ))),
        }
    }

    fn resolve_label(&self, label: &Label) -> Result<PathBuf, EvalError> {
        let Some(resolver) = self.resolver else {
            return Err(EvalError::context("no label resolver available in this context"));
        };
        let resolved = resolver.resolve_label(&self.cur_repo, "", label)?;
        Ok(resolved.filename)
    }

    /// Deletes a file or (empty) directory. Returns whether anything was
    /// deleted; other I/O failures are errors.
    pub fn delete(&self, path: &Value) -> Result<bool, EvalError> {
        let path = self.resolve_path(path)?;
        let result = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Accepts either a full integrity expression or a hex sha256, and
    /// canonicalises the latter.
    fn effective_integrity(sha256: &str, integrity_expr: &str) -> Result<String, EvalError> {
        if !integrity_expr.is_empty() {
            return Ok(integrity_expr.to_owned());
        }
        if sha256.is_empty() {
            return Ok(String::new());
        }
        let digest = hex_decode(sha256)
            .ok_or_else(|| EvalError::context(format!("invalid sha256: {sha256:?}")))?;
        Ok(integrity::from_sha256_digest(&digest))
    }

    pub fn download(
        &self,
        urls: &[String],
        output: &Value,
        sha256: &str,
        integrity_expr: &str,
        executable: bool,
    ) -> Result<Value, EvalError> {
        let output_path = self.resolve_path(output)?;
        let integrity_expr = Self::effective_integrity(sha256, integrity_expr)?;
        let result = download(urls, &integrity_expr, self.cache)?;
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&result.path, &output_path)?;
        set_executable(&output_path, executable)?;
        Ok(download_info(&result.sha256))
    }

    /// `archive_type` overrides format detection; when empty, the format
    /// comes from the winning URL's file name.
    pub fn download_and_extract(
        &self,
        urls: &[String],
        output: &Value,
        sha256: &str,
        integrity_expr: &str,
        archive_type: &str,
        strip_prefix: &str,
    ) -> Result<Value, EvalError> {
        let output_path = self.resolve_path(output)?;
        let integrity_expr = Self::effective_integrity(sha256, integrity_expr)?;
        let result = download(urls, &integrity_expr, self.cache)?;
        let name = if archive_type.is_empty() {
            result.url_file_name()
        } else {
            format!("archive.{}", archive_type.trim_start_matches('.'))
        };
        extract::extract_as(&result.path, &name, &output_path, strip_prefix)?;
        Ok(download_info(&result.sha256))
    }

    pub fn extract(&self, archive: &Value, output: &Value, strip_prefix: &str) -> Result<(), EvalError> {
        let archive_path = self.resolve_path(archive)?;
        let output_path = self.resolve_path(output)?;
        extract::extract(&archive_path, &output_path, strip_prefix)?;
        Ok(())
    }

    /// Runs a subprocess with a timeout, capturing stdout and stderr. A
    /// non-zero exit code is reported through the result, not as an error.
    pub fn execute(
        &self,
        arguments: &[Value],
        timeout: Duration,
        environ: &BTreeMap<String, String>,
        quiet: bool,
        working_directory: &str,
    ) -> Result<ExecResult, EvalError> {
        if arguments.is_empty() {
            return Err(EvalError::context("empty command"));
        }
        let mut argv = Vec::with_capacity(arguments.len());
        for (i, arg) in arguments.iter().enumerate() {
            match arg {
                Value::Str(s) => argv.push(s.clone()),
                Value::Path(_) | Value::Label(_) => {
                    let path = self.resolve_path(arg).map_err(|e| {
                        EvalError::context(format!("in argument #{i}: {e}"))
                    })?;
                    argv.push(path.to_string_lossy().into_owned());
                }
                other => {
                    return Err(EvalError::context(format!(
                        "in argument #{i}: got {}, want string, path, or Label",
                        other.type_name()
                    )))
                }
            }
        }

        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]);
        for (key, value) in environ {
            command.env(key, value);
        }
        if !working_directory.is_empty() {
            command.current_dir(normalize_path(&self.root_path, working_directory));
        } else if !self.root_path.as_os_str().is_empty() {
            command.current_dir(&self.root_path);
        }
        command.stdout(Stdio::piped()).stderr(Stdio::piped()).stdin(Stdio::null());

        let mut child = command
            .spawn()
            .map_err(|e| EvalError::context(format!("couldn't run subprocess {:?}: {e}", argv[0])))?;

        let stdout = spawn_reader(child.stdout.take());
        let stderr = spawn_reader(child.stderr.take());

        let deadline = Instant::now() + timeout;
        let status = loop {
            match child.try_wait()? {
                Some(status) => break status,
                None => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(EvalError::context(format!(
                            "subprocess {:?} timed out after {}s",
                            argv[0],
                            timeout.as_secs()
                        )));
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        };

        let stdout = stdout.join().unwrap_or_default();
        let stderr = stderr.join().unwrap_or_default();
        if !quiet {
            print!("{stdout}");
            eprint!("{stderr}");
        }
        Ok(ExecResult {
            return_code: status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    pub fn file(&self, path: &Value, content: &str, executable: bool) -> Result<(), EvalError> {
        let path = self.resolve_path(path)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        set_executable(&path, executable)?;
        Ok(())
    }

    pub fn patch(&self, patch_file: &Value, strip: u32) -> Result<(), EvalError> {
        let patch_path = self.resolve_path(patch_file)?;
        let patch = Patch {
            file: patch_path.to_string_lossy().into_owned(),
            strip,
        };
        patch.apply(&self.root_path, self.cache)?;
        Ok(())
    }

    pub fn path(&self, value: &Value) -> Result<PathBuf, EvalError> {
        self.resolve_path(value)
    }

    pub fn read(&self, path: &Value) -> Result<String, EvalError> {
        let path = self.resolve_path(path)?;
        Ok(fs::read_to_string(&path)?)
    }

    pub fn report_progress(&self, status: &str) {
        let who = if self.name.is_empty() { "resolve" } else { self.name.as_str() };
        info!("{who}: {status}");
    }

    pub fn symlink(&self, from: &Value, to: &Value) -> Result<(), EvalError> {
        let from_path = self.resolve_path(from)?;
        let to_path = self.resolve_path(to)?;
        if let Some(parent) = to_path.parent() {
            fs::create_dir_all(parent)?;
        }
        #[cfg(unix)]
        std::os::unix::fs::symlink(&from_path, &to_path)?;
        #[cfg(not(unix))]
        fs::copy(&from_path, &to_path).map(|_| ())?;
        Ok(())
    }

    /// Copies a template file, replacing each substitution key with its
    /// value.
    pub fn template(
        &self,
        path: &Value,
        template: &Value,
        substitutions: &BTreeMap<String, String>,
        executable: bool,
    ) -> Result<(), EvalError> {
        let path = self.resolve_path(path)?;
        let template_path = self.resolve_path(template)?;
        let mut contents = fs::read_to_string(&template_path)?;
        for (key, value) in substitutions {
            contents = contents.replace(key, value);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, contents)?;
        set_executable(&path, executable)?;
        Ok(())
    }

    /// Looks a program up on PATH.
    pub fn which(&self, program: &str) -> Option<PathBuf> {
        let path_var = self.os.environ.get("PATH")?;
        for dir in std::env::split_paths(path_var) {
            let candidate = dir.join(program);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }
}

fn spawn_reader(pipe: Option<impl Read + Send + 'static>) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut out = String::new();
        if let Some(mut pipe) = pipe {
            let mut bytes = Vec::new();
            let _ = pipe.read_to_end(&mut bytes);
            out = String::from_utf8_lossy(&bytes).into_owned();
        }
        out
    })
}

#[cfg(unix)]
fn set_executable(path: &Path, executable: bool) -> Result<(), std::io::Error> {
    use std::os::unix::fs::PermissionsExt;
    let mode = if executable { 0o775 } else { 0o664 };
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path, _executable: bool) -> Result<(), std::io::Error> {
    Ok(())
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}
