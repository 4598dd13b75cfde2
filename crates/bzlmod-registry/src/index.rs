//! The index registry: a directory tree served over http(s) or straight
//! from disk (`file://`).
//!
//! Layout:
//!   bazel_registry.json                   `{ "mirrors": [...] }`
//!   <name>/<version>/MODULE.bazel         module descriptor
//!   <name>/<version>/source.json          where the source archive lives
//!   <name>/<version>/patches/<file>       registry-supplied patches

use crate::{Registry, RegistryError};
use bzlmod_common::{hash, ModuleKey};
use bzlmod_fetch::{Archive, Fetcher, Patch};
use serde::Deserialize;
use std::cell::RefCell;
use std::io::Read;
use std::path::PathBuf;
use tracing::debug;
use url::Url;

#[derive(Debug, Clone, Default, Deserialize)]
struct RegistryConfig {
    #[serde(default)]
    mirrors: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct SourceInfo {
    url: String,
    #[serde(default)]
    integrity: String,
    #[serde(default)]
    strip_prefix: String,
    #[serde(default)]
    patch_files: Vec<String>,
    #[serde(default)]
    patch_strip: u32,
}

pub struct Index {
    url: Url,
    agent: ureq::Agent,
    // bazel_registry.json is fetched at most once per Index instance.
    config: RefCell<Option<RegistryConfig>>,
}

impl Index {
    pub fn new(raw_url: &str) -> Result<Index, RegistryError> {
        let url = Url::parse(raw_url).map_err(|e| RegistryError::BadUrl {
            url: raw_url.to_owned(),
            reason: e.to_string(),
        })?;
        Ok(Index {
            url,
            agent: ureq::Agent::new_with_defaults(),
            config: RefCell::new(None),
        })
    }

    /// Reads a file relative to the registry root. `Ok(None)` means the
    /// file doesn't exist (a not-found at the registry level).
    fn read(&self, rel_path: &str) -> Result<Option<Vec<u8>>, RegistryError> {
        let file_url = format!("{}/{}", self.url.as_str().trim_end_matches('/'), rel_path);
        if self.url.scheme() == "file" {
            let mut path: PathBuf = self
                .url
                .to_file_path()
                .map_err(|()| RegistryError::BadUrl {
                    url: self.url.to_string(),
                    reason: "not a local path".to_owned(),
                })?;
            path.push(rel_path);
            match std::fs::read(&path) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(e.into()),
            }
        } else {
            debug!("GET {file_url}");
            match self.agent.get(&file_url).call() {
                Ok(response) => {
                    let mut body = Vec::new();
                    response
                        .into_body()
                        .into_reader()
                        .read_to_end(&mut body)
                        .map_err(|e| RegistryError::Http {
                            url: file_url,
                            detail: e.to_string(),
                        })?;
                    Ok(Some(body))
                }
                Err(ureq::Error::StatusCode(404)) => Ok(None),
                Err(ureq::Error::StatusCode(code)) => Err(RegistryError::Http {
                    url: file_url,
                    detail: format!("HTTP {code}"),
                }),
                Err(e) => Err(RegistryError::Http {
                    url: file_url,
                    detail: e.to_string(),
                }),
            }
        }
    }

    fn config(&self) -> Result<RegistryConfig, RegistryError> {
        if let Some(config) = self.config.borrow().as_ref() {
            return Ok(config.clone());
        }
        let config = match self.read("bazel_registry.json")? {
            Some(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| RegistryError::Metadata {
                    url: format!("{}/bazel_registry.json", self.url()),
                    detail: e.to_string(),
                })?
            }
            None => RegistryConfig::default(),
        };
        *self.config.borrow_mut() = Some(config.clone());
        Ok(config)
    }
}

impl Registry for Index {
    fn url(&self) -> String {
        self.url.as_str().trim_end_matches('/').to_owned()
    }

    fn get_module_bazel(&self, key: &ModuleKey) -> Result<Vec<u8>, RegistryError> {
        self.read(&format!("{}/{}/MODULE.bazel", key.name, key.version))?
            .ok_or_else(|| RegistryError::NotFound(key.clone()))
    }

    fn get_fetcher(&self, key: &ModuleKey) -> Result<Fetcher, RegistryError> {
        let rel = format!("{}/{}/source.json", key.name, key.version);
        let bytes = self
            .read(&rel)?
            .ok_or_else(|| RegistryError::NotFound(key.clone()))?;
        let source: SourceInfo =
            serde_json::from_slice(&bytes).map_err(|e| RegistryError::Metadata {
                url: format!("{}/{rel}", self.url()),
                detail: e.to_string(),
            })?;
        let source_url = Url::parse(&source.url).map_err(|e| RegistryError::Metadata {
            url: format!("{}/{rel}", self.url()),
            detail: format!("bad source url {:?}: {e}", source.url),
        })?;

        // Mirrors first (rewritten as mirror/host/path, preserving the
        // query), then the original source URL as the last resort.
        let mut urls = Vec::new();
        for mirror in &self.config()?.mirrors {
            let mut rewritten = format!(
                "{}/{}{}",
                mirror.trim_end_matches('/'),
                source_url.host_str().unwrap_or_default(),
                source_url.path(),
            );
            if let Some(query) = source_url.query() {
                rewritten.push('?');
                rewritten.push_str(query);
            }
            urls.push(rewritten);
        }
        urls.push(source.url.clone());

        let patches = source
            .patch_files
            .iter()
            .map(|file| Patch {
                file: format!("{}/{}/{}/patches/{file}", self.url(), key.name, key.version),
                strip: source.patch_strip,
            })
            .collect();

        Ok(Fetcher::Archive(Archive {
            urls,
            integrity: source.integrity,
            strip_prefix: source.strip_prefix,
            patches,
            // Derived from the module identity rather than the mirror list,
            // so mirror changes don't invalidate existing caches.
            fingerprint: hash(&[
                "regModule".into(),
                (&key.name).into(),
                (&key.version).into(),
                self.url().as_str().into(),
            ]),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bzlmod_testutil::{write_file, StaticHttpServer};

    fn index_fixture() -> Vec<(String, Vec<u8>)> {
        vec![
            (
                "/bazel_registry.json".to_owned(),
                br#"{
  "mirrors": [
    "https://mirror.bazel.build/",
    "file:///home/bazel/mymirror/"
  ]
}"#
                .to_vec(),
            ),
            ("/A/1.0/MODULE.bazel".to_owned(), b"kek".to_vec()),
            ("/B/2.0/MODULE.bazel".to_owned(), b"lel".to_vec()),
            (
                "/A/1.0/source.json".to_owned(),
                br#"{
  "url": "http://mysite.com/thing.zip",
  "integrity": "sha256-blah",
  "strip_prefix": "pref"
}"#
                .to_vec(),
            ),
            (
                "/A/2.0/source.json".to_owned(),
                br#"{
  "url": "https://github.com/lol.tar.gz",
  "integrity": "sha256-bleh",
  "patch_files": ["1-fix-this.patch", "2-fix-that.patch"],
  "patch_strip": 1
}"#
                .to_vec(),
            ),
            (
                "/B/1.0/source.json".to_owned(),
                br#"{
  "url": "https://example.com/archive.jar?with=query",
  "integrity": "sha256-bluh"
}"#
                .to_vec(),
            ),
        ]
    }

    fn both_indexes(tmp: &std::path::Path) -> (StaticHttpServer, Vec<Index>) {
        let files = index_fixture();
        for (path, bytes) in &files {
            write_file(tmp.join(path.trim_start_matches('/')), bytes);
        }
        let server = StaticHttpServer::start(files);
        let http = Index::new(server.url()).unwrap();
        let file = Index::new(&format!("file://{}", tmp.display())).unwrap();
        (server, vec![http, file])
    }

    #[test]
    fn url_is_identity() {
        for raw in ["file:///home/my/reg", "http://kek.com", "https://blah.net/something"] {
            let index = Index::new(raw).unwrap();
            assert_eq!(index.url(), *raw);
        }
    }

    #[test]
    fn get_module_bazel_over_http_and_file() {
        let tmp = tempfile::tempdir().unwrap();
        let (_server, indexes) = both_indexes(tmp.path());
        for reg in &indexes {
            assert_eq!(reg.get_module_bazel(&ModuleKey::new("A", "1.0")).unwrap(), b"kek");
            assert_eq!(reg.get_module_bazel(&ModuleKey::new("B", "2.0")).unwrap(), b"lel");
            assert!(matches!(
                reg.get_module_bazel(&ModuleKey::new("A", "2.0")),
                Err(RegistryError::NotFound(_)),
            ));
        }
    }

    #[test]
    fn get_fetcher_composes_mirrors() {
        let tmp = tempfile::tempdir().unwrap();
        let (_server, indexes) = both_indexes(tmp.path());
        for reg in &indexes {
            let fetcher = reg.get_fetcher(&ModuleKey::new("A", "1.0")).unwrap();
            assert_eq!(
                fetcher,
                Fetcher::Archive(Archive {
                    urls: vec![
                        "https://mirror.bazel.build/mysite.com/thing.zip".to_owned(),
                        "file:///home/bazel/mymirror/mysite.com/thing.zip".to_owned(),
                        "http://mysite.com/thing.zip".to_owned(),
                    ],
                    integrity: "sha256-blah".to_owned(),
                    strip_prefix: "pref".to_owned(),
                    patches: Vec::new(),
                    fingerprint: hash(&[
                        "regModule".into(),
                        "A".into(),
                        "1.0".into(),
                        reg.url().as_str().into(),
                    ]),
                }),
                "{}",
                reg.url()
            );
        }
    }

    #[test]
    fn get_fetcher_turns_patch_files_into_registry_urls() {
        let tmp = tempfile::tempdir().unwrap();
        let (_server, indexes) = both_indexes(tmp.path());
        for reg in &indexes {
            let Fetcher::Archive(archive) = reg.get_fetcher(&ModuleKey::new("A", "2.0")).unwrap()
            else {
                panic!("expected archive fetcher");
            };
            assert_eq!(
                archive.patches,
                vec![
                    Patch {
                        file: format!("{}/A/2.0/patches/1-fix-this.patch", reg.url()),
                        strip: 1,
                    },
                    Patch {
                        file: format!("{}/A/2.0/patches/2-fix-that.patch", reg.url()),
                        strip: 1,
                    },
                ]
            );
        }
    }

    #[test]
    fn get_fetcher_preserves_query_strings() {
        let tmp = tempfile::tempdir().unwrap();
        let (_server, indexes) = both_indexes(tmp.path());
        for reg in &indexes {
            let Fetcher::Archive(archive) = reg.get_fetcher(&ModuleKey::new("B", "1.0")).unwrap()
            else {
                panic!("expected archive fetcher");
            };
            assert_eq!(
                archive.urls,
                vec![
                    "https://mirror.bazel.build/example.com/archive.jar?with=query".to_owned(),
                    "file:///home/bazel/mymirror/example.com/archive.jar?with=query".to_owned(),
                    "https://example.com/archive.jar?with=query".to_owned(),
                ]
            );
        }
    }

    #[test]
    fn missing_registry_config_means_no_mirrors() {
        let tmp = tempfile::tempdir().unwrap();
        write_file(
            tmp.path().join("A/1.0/source.json"),
            br#"{"url": "http://mysite.com/thing.zip"}"#,
        );
        let reg = Index::new(&format!("file://{}", tmp.path().display())).unwrap();
        let Fetcher::Archive(archive) = reg.get_fetcher(&ModuleKey::new("A", "1.0")).unwrap()
        else {
            panic!("expected archive fetcher");
        };
        assert_eq!(archive.urls, vec!["http://mysite.com/thing.zip".to_owned()]);
    }
}
