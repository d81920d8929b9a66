use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::BuildConfig;
use crate::error::{IoContext, Result, UnifyError};
use crate::resources::ResourceReader;
use crate::types::DependencyKind;

pub const CACHE_FILE_NAME: &str = "build-state.json";
const CACHE_VERSION: u32 = 1;

/// Path-keyed store with an ephemeral and a disk-backed implementation.
pub trait KeyValueStore<V>: Send + Sync {
    fn get(&self, key: &Path) -> Option<&V>;

    fn get_mut(&mut self, key: &Path) -> Option<&mut V>;

    fn insert(&mut self, key: PathBuf, value: V) -> Option<V>;

    fn remove(&mut self, key: &Path) -> Option<V>;

    /// Sorted.
    fn keys(&self) -> Vec<PathBuf>;

    fn len(&self) -> usize;

    fn clear(&mut self);

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, key: &Path) -> bool {
        self.get(key).is_some()
    }

    fn persist(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MemoryStore<V> {
    entries: HashMap<PathBuf, V>,
}

impl<V> Default for MemoryStore<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<V> MemoryStore<V> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<V: Send + Sync> KeyValueStore<V> for MemoryStore<V> {
    fn get(&self, key: &Path) -> Option<&V> {
        self.entries.get(key)
    }

    fn get_mut(&mut self, key: &Path) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    fn insert(&mut self, key: PathBuf, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    fn remove(&mut self, key: &Path) -> Option<V> {
        self.entries.remove(key)
    }

    fn keys(&self) -> Vec<PathBuf> {
        let mut keys: Vec<PathBuf> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Serialize, Deserialize)]
struct StoreFile<V> {
    version: u32,
    #[serde(default)]
    fingerprint: String,
    entries: BTreeMap<String, V>,
}

/// A [`MemoryStore`] that is loaded from and written back to one JSON file.
#[derive(Debug, Clone)]
pub struct PersistentStore<V> {
    file: PathBuf,
    fingerprint: String,
    memory: MemoryStore<V>,
}

impl<V: Serialize + DeserializeOwned> PersistentStore<V> {
    /// Missing, unreadable, corrupt or version-mismatched files load as empty.
    pub fn load(file: &Path) -> Self {
        Self::load_with_fingerprint(file, "")
    }

    /// Like [`PersistentStore::load`], and a file written under another
    /// fingerprint also loads as empty.
    pub fn load_with_fingerprint(file: &Path, fingerprint: &str) -> Self {
        let mut memory = MemoryStore::new();

        match fs::read_to_string(file) {
            Ok(content) => match serde_json::from_str::<StoreFile<V>>(&content) {
                Ok(stored) if stored.version != CACHE_VERSION => {
                    debug!(
                        path = %file.display(),
                        version = stored.version,
                        "Ignoring cache written by another version"
                    );
                }
                Ok(stored) if stored.fingerprint != fingerprint => {
                    debug!(path = %file.display(), "Ignoring cache written with other settings");
                }
                Ok(stored) => {
                    for (key, value) in stored.entries {
                        memory.entries.insert(PathBuf::from(key), value);
                    }
                }
                Err(error) => {
                    debug!(path = %file.display(), %error, "Ignoring corrupt cache file");
                }
            },
            Err(error) => {
                debug!(path = %file.display(), %error, "No cache file loaded");
            }
        }

        Self {
            file: file.to_path_buf(),
            fingerprint: fingerprint.to_string(),
            memory,
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    fn write(&self) -> Result<()> {
        if let Some(parent) = self.file.parent() {
            fs::create_dir_all(parent).io_context("creating cache directory", parent)?;
        }

        let stored = StoreFile {
            version: CACHE_VERSION,
            fingerprint: self.fingerprint.clone(),
            entries: self
                .memory
                .entries
                .iter()
                .map(|(key, value)| (key.to_string_lossy().replace('\\', "/"), value))
                .collect::<BTreeMap<String, &V>>(),
        };
        let content =
            serde_json::to_string_pretty(&stored).map_err(|error| UnifyError::JsonParse {
                path: self.file.clone(),
                message: error.to_string(),
            })?;

        fs::write(&self.file, content).io_context("writing cache", &self.file)
    }
}

impl<V: Serialize + DeserializeOwned + Send + Sync> KeyValueStore<V> for PersistentStore<V> {
    fn get(&self, key: &Path) -> Option<&V> {
        self.memory.get(key)
    }

    fn get_mut(&mut self, key: &Path) -> Option<&mut V> {
        self.memory.get_mut(key)
    }

    fn insert(&mut self, key: PathBuf, value: V) -> Option<V> {
        self.memory.insert(key, value)
    }

    fn remove(&mut self, key: &Path) -> Option<V> {
        self.memory.remove(key)
    }

    fn keys(&self) -> Vec<PathBuf> {
        self.memory.keys()
    }

    fn len(&self) -> usize {
        self.memory.len()
    }

    fn clear(&mut self) {
        self.memory.clear();
    }

    fn persist(&self) -> Result<()> {
        self.write()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedDependency {
    pub path: PathBuf,
    pub kind: DependencyKind,
    /// `None` when the dependency did not exist at the time of the build.
    pub hash: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub hash: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<CachedDependency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Content hashes of every tracked source plus, for pages, the dependency
/// snapshot and output path of the last successful render.
pub struct BuildCache {
    store: Box<dyn KeyValueStore<CacheEntry>>,
}

impl std::fmt::Debug for BuildCache {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("BuildCache")
            .field("entries", &self.store.len())
            .finish()
    }
}

impl Default for BuildCache {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl BuildCache {
    pub fn with_store(store: Box<dyn KeyValueStore<CacheEntry>>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::with_store(Box::new(MemoryStore::new()))
    }

    pub fn load(config: &BuildConfig) -> Self {
        if config.cache {
            Self::with_store(Box::new(PersistentStore::load_with_fingerprint(
                &config.cache_file(),
                &config.fingerprint(),
            )))
        } else {
            Self::in_memory()
        }
    }

    pub fn has_changed(&self, path: &Path, content: &[u8]) -> bool {
        self.store
            .get(path)
            .map(|entry| entry.hash != content_hash(content))
            .unwrap_or(true)
    }

    pub fn record_hash(&mut self, path: &Path, content: &[u8]) {
        self.record_hash_value(path, content_hash(content));
    }

    pub fn record_hash_value(&mut self, path: &Path, hash: String) {
        match self.store.get_mut(path) {
            Some(entry) => entry.hash = hash,
            None => {
                self.store.insert(
                    path.to_path_buf(),
                    CacheEntry {
                        hash,
                        ..Default::default()
                    },
                );
            }
        }
    }

    pub fn record_page(
        &mut self,
        page: &Path,
        hash: String,
        dependencies: Vec<CachedDependency>,
        output: PathBuf,
    ) {
        for dependency in &dependencies {
            if let Some(dependency_hash) = &dependency.hash {
                self.record_hash_value(&dependency.path, dependency_hash.clone());
            }
        }
        self.store.insert(
            page.to_path_buf(),
            CacheEntry {
                hash,
                dependencies,
                output: Some(output),
            },
        );
    }

    pub fn entry(&self, path: &Path) -> Option<&CacheEntry> {
        self.store.get(path)
    }

    pub fn remove(&mut self, path: &Path) -> Option<CacheEntry> {
        self.store.remove(path)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.store.contains(path)
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.store.keys()
    }

    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    pub fn clear(&mut self) {
        self.store.clear();
    }

    /// Up to date iff the page's own hash, the hash of every dependency in
    /// its last snapshot, and the existence of its output all still hold.
    pub fn is_page_fresh(
        &self,
        page: &Path,
        content: &[u8],
        resources: &dyn ResourceReader,
    ) -> bool {
        let Some(entry) = self.store.get(page) else {
            return false;
        };
        if entry.hash != content_hash(content) {
            return false;
        }
        let Some(output) = &entry.output else {
            return false;
        };
        if !resources.exists(output) {
            return false;
        }

        entry.dependencies.iter().all(|dependency| {
            match resources.read(&dependency.path) {
                Ok(current) => current.map(|bytes| content_hash(&bytes)) == dependency.hash,
                Err(_) => false,
            }
        })
    }

    pub fn persist(&self) -> Result<()> {
        self.store.persist()
    }
}
