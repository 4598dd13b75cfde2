//! An in-memory registry for tests, addressable through `fake:<name>` URLs
//! so test code can hand plain URL strings to discovery.

use crate::{Registry, RegistryError};
use bzlmod_common::ModuleKey;
use bzlmod_fetch::Fetcher;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

static FAKES: OnceLock<Mutex<HashMap<String, Arc<Fake>>>> = OnceLock::new();

fn fakes() -> &'static Mutex<HashMap<String, Arc<Fake>>> {
    FAKES.get_or_init(|| Mutex::new(HashMap::new()))
}

pub(crate) fn open(raw_url: &str) -> Result<Arc<dyn Registry>, RegistryError> {
    let name = raw_url.strip_prefix("fake:").unwrap_or(raw_url);
    let fake = fakes()
        .lock()
        .expect("fake registry table poisoned")
        .get(name)
        .cloned();
    match fake {
        Some(fake) => Ok(fake),
        None => Err(RegistryError::BadUrl {
            url: raw_url.to_owned(),
            reason: "unknown fake registry".to_owned(),
        }),
    }
}

#[derive(Clone)]
struct FakeModule {
    module_bazel: Vec<u8>,
    fetcher: Option<Fetcher>,
}

pub struct Fake {
    name: String,
    modules: Mutex<HashMap<ModuleKey, FakeModule>>,
}

impl Fake {
    /// Creates a fake registry and registers it under `fake:<name>`. Use a
    /// name unique to the test to avoid cross-test interference.
    pub fn register(name: &str) -> Arc<Fake> {
        let fake = Arc::new(Fake {
            name: name.to_owned(),
            modules: Mutex::new(HashMap::new()),
        });
        fakes()
            .lock()
            .expect("fake registry table poisoned")
            .insert(name.to_owned(), Arc::clone(&fake));
        fake
    }

    pub fn add_module(
        &self,
        name: &str,
        version: &str,
        module_bazel: impl Into<Vec<u8>>,
        fetcher: Option<Fetcher>,
    ) {
        let key = ModuleKey::new(name, version);
        let mut modules = self.modules.lock().expect("fake module table poisoned");
        assert!(
            !modules.contains_key(&key),
            "entry already exists for {key}"
        );
        modules.insert(
            key,
            FakeModule {
                module_bazel: module_bazel.into(),
                fetcher,
            },
        );
    }
}

impl Registry for Fake {
    fn url(&self) -> String {
        format!("fake:{}", self.name)
    }

    fn get_module_bazel(&self, key: &ModuleKey) -> Result<Vec<u8>, RegistryError> {
        self.modules
            .lock()
            .expect("fake module table poisoned")
            .get(key)
            .map(|m| m.module_bazel.clone())
            .ok_or_else(|| RegistryError::NotFound(key.clone()))
    }

    fn get_fetcher(&self, key: &ModuleKey) -> Result<Fetcher, RegistryError> {
        self.modules
            .lock()
            .expect("fake module table poisoned")
            .get(key)
            .and_then(|m| m.fetcher.clone())
            .ok_or_else(|| RegistryError::NotFound(key.clone()))
    }
}
