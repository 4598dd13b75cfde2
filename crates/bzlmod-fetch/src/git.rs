//! The git fetcher: a repository checked out at a pinned commit.

use crate::patch::fingerprint_parts;
use crate::{fetch_with_cache, FetchEnv, FetchError, Patch};
use bzlmod_common::hash;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Git {
    pub repo: String,
    pub commit: String,
    #[serde(default)]
    pub patches: Vec<Patch>,
}

impl Git {
    pub fn fingerprint(&self) -> String {
        hash(&[
            "gitRepo".into(),
            (&self.repo).into(),
            (&self.commit).into(),
            (&fingerprint_parts(&self.patches)).into(),
        ])
    }

    /// Fetches without vendoring and without a repo name, for discovery.
    pub fn early_fetch(&self, env: &FetchEnv<'_>) -> Result<PathBuf, FetchError> {
        let bare = FetchEnv::bare(env.cache, env.ws_dir);
        self.fetch("", &bare)
    }

    pub fn fetch(&self, repo_name: &str, env: &FetchEnv<'_>) -> Result<PathBuf, FetchError> {
        fetch_with_cache(&self.fingerprint(), repo_name, env, |dest| {
            self.checkout(dest)?;
            for patch in &self.patches {
                patch.apply(dest, env.cache)?;
            }
            Ok(())
        })
    }

    /// Materialises the pinned commit into a clean directory by shelling
    /// out to git: init, fetch the single commit, check it out detached.
    fn checkout(&self, dest: &Path) -> Result<(), FetchError> {
        if dest.exists() {
            fs::remove_dir_all(dest)?;
        }
        fs::create_dir_all(dest)?;
        self.run_git(dest, &["init", "--quiet"])?;
        self.run_git(dest, &["fetch", "--quiet", "--depth=1", &self.repo, &self.commit])?;
        self.run_git(dest, &["checkout", "--quiet", "--detach", "FETCH_HEAD"])?;
        Ok(())
    }

    fn run_git(&self, dir: &Path, args: &[&str]) -> Result<(), FetchError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .output()
            .map_err(|e| FetchError::GitFailed {
                repo: self.repo.clone(),
                detail: format!("couldn't run git: {e}"),
            })?;
        if !output.status.success() {
            return Err(FetchError::GitFailed {
                repo: self.repo.clone(),
                detail: format!(
                    "git {} failed: {}",
                    args.first().unwrap_or(&""),
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{verify_fingerprint_file, write_fingerprint_file, CacheDir};

    fn git_fetcher() -> Git {
        Git {
            repo: "https://example.com/repo.git".to_owned(),
            commit: "123456abcdef".to_owned(),
            patches: Vec::new(),
        }
    }

    #[test]
    fn fingerprint_is_stable_and_distinct() {
        let a = git_fetcher();
        let b = git_fetcher();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 32);

        let mut c = git_fetcher();
        c.commit = "other".to_owned();
        assert_ne!(a.fingerprint(), c.fingerprint());

        let mut d = git_fetcher();
        d.patches.push(Patch {
            file: "fix.patch".into(),
            strip: 1,
        });
        assert_ne!(a.fingerprint(), d.fingerprint());
    }

    #[test]
    fn ready_shared_dir_avoids_git_entirely() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = CacheDir::new(tmp.path());
        let g = Git {
            // An unreachable repo: success proves git was never invoked.
            repo: "file:///nonexistent/repo.git".to_owned(),
            commit: "deadbeef".to_owned(),
            patches: Vec::new(),
        };
        let shared = cache.shared_repo_dir(&g.fingerprint());
        write_fingerprint_file(&shared, &g.fingerprint()).unwrap();

        let env = FetchEnv::bare(&cache, tmp.path());
        let path = g.fetch("", &env).unwrap();
        assert_eq!(path, shared);
    }

    #[test]
    fn checkout_of_local_repo() {
        // Build a throwaway git repo with one commit, then fetch it by
        // commit hash.
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("src");
        fs::create_dir_all(&src).unwrap();
        let run = |args: &[&str]| {
            let output = Command::new("git").arg("-C").arg(&src).args(args).output().unwrap();
            assert!(
                output.status.success(),
                "git {args:?}: {}",
                String::from_utf8_lossy(&output.stderr)
            );
            String::from_utf8_lossy(&output.stdout).trim().to_owned()
        };
        run(&["init", "--quiet"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "test"]);
        fs::write(src.join("MODULE.bazel"), "module(name=\"m\")\n").unwrap();
        run(&["add", "."]);
        run(&["commit", "--quiet", "-m", "initial"]);
        let commit = run(&["rev-parse", "HEAD"]);

        let cache = CacheDir::new(tmp.path().join("bzlmod"));
        let g = Git {
            repo: format!("file://{}", src.display()),
            commit,
            patches: Vec::new(),
        };
        let env = FetchEnv::bare(&cache, tmp.path());
        let path = g.fetch("", &env).unwrap();
        assert_eq!(
            fs::read_to_string(path.join("MODULE.bazel")).unwrap(),
            "module(name=\"m\")\n"
        );
        assert!(verify_fingerprint_file(&path, &g.fingerprint()));
    }
}
