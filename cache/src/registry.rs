//! A named table of live caches.

use crate::builder::{default_disk_directory, CacheBuilder};
use crate::config::{CacheConfig, RegistryConfig};
use crate::delegate::{CacheDelegate, CacheType};
use crate::error::{CacheError, Result};
use crate::populating::SelfPopulatingCache;
use crate::provider::ElementProvider;

use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

/// A registered cache with its key and value types erased.
struct RegisteredCache {
  cache_type: CacheType,
  key_type: &'static str,
  value_type: &'static str,
  // Always an `Arc<dyn CacheDelegate<K, V>>` for the types named above.
  handle: Box<dyn Any + Send + Sync>,
  close: Box<dyn Fn() + Send + Sync>,
}

impl RegisteredCache {
  fn new<K: 'static, V: 'static>(cache: Arc<dyn CacheDelegate<K, V>>) -> Self {
    let closer = Arc::clone(&cache);
    Self {
      cache_type: cache.cache_type(),
      key_type: type_name::<K>(),
      value_type: type_name::<V>(),
      handle: Box::new(cache),
      close: Box::new(move || closer.close()),
    }
  }

  fn downcast<K: 'static, V: 'static>(&self, name: &str) -> Result<Arc<dyn CacheDelegate<K, V>>> {
    self
      .handle
      .downcast_ref::<Arc<dyn CacheDelegate<K, V>>>()
      .cloned()
      .ok_or_else(|| CacheError::TypeMismatch {
        name: name.to_string(),
      })
  }
}

/// Owns every cache created through it, by name.
///
/// A name maps to at most one live cache. Creation is atomic per name: racing
/// first requests for the same name get the same instance. Dropping the
/// registry closes every cache it still holds.
///
/// Factories passed to the `get_or_create*` methods run while the name's table
/// shard is locked and must not call back into the registry.
pub struct CacheRegistry {
  caches: DashMap<String, RegisteredCache, ahash::RandomState>,
  default_disk_directory: RwLock<PathBuf>,
  configured: HashMap<String, CacheConfig>,
}

impl fmt::Debug for CacheRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheRegistry")
      .field("caches", &self.names())
      .field("default_disk_directory", &*self.default_disk_directory.read())
      .field("configured", &self.configured.keys().collect::<Vec<_>>())
      .finish()
  }
}

impl Default for CacheRegistry {
  fn default() -> Self {
    Self::new()
  }
}

impl CacheRegistry {
  /// Creates an empty registry whose disk tiers default to the system temp directory.
  pub fn new() -> Self {
    Self {
      caches: DashMap::with_hasher(ahash::RandomState::new()),
      default_disk_directory: RwLock::new(default_disk_directory()),
      configured: HashMap::new(),
    }
  }

  /// Creates a registry that knows the caches declared in `config`.
  ///
  /// Nothing is built until a configured cache is first requested.
  pub fn from_config(config: RegistryConfig) -> Self {
    info!(caches = config.caches.len(), "cache registry configured");
    Self {
      caches: DashMap::with_hasher(ahash::RandomState::new()),
      default_disk_directory: RwLock::new(
        config
          .default_disk_directory
          .unwrap_or_else(default_disk_directory),
      ),
      configured: config.caches,
    }
  }

  /// Changes the directory new disk tiers are created under. Existing caches keep theirs.
  pub fn set_default_disk_directory(&self, path: impl Into<PathBuf>) {
    let path = path.into();
    debug!(path = ?path, "default disk directory changed");
    *self.default_disk_directory.write() = path;
  }

  pub fn default_disk_directory(&self) -> PathBuf {
    self.default_disk_directory.read().clone()
  }

  /// A builder for `name` that falls back to this registry's default disk directory.
  pub fn builder<K, V>(&self, name: &str, config: &CacheConfig) -> CacheBuilder<K, V> {
    CacheBuilder::from_config(name, config).fallback_disk_directory(self.default_disk_directory())
  }

  /// Returns the cache called `name`, creating it with `factory` if absent.
  pub fn get_or_create_with<K, V, F>(&self, name: &str, factory: F) -> Result<Arc<dyn CacheDelegate<K, V>>>
  where
    K: 'static,
    V: 'static,
    F: FnOnce() -> Result<Arc<dyn CacheDelegate<K, V>>>,
  {
    // Fast path without taking the shard's write lock.
    if let Some(existing) = self.caches.get(name) {
      return existing.downcast(name);
    }

    match self.caches.entry(name.to_string()) {
      Entry::Occupied(entry) => entry.get().downcast(name),
      Entry::Vacant(entry) => {
        let cache = factory()?;
        info!(cache = %name, cache_type = %cache.cache_type(), "registered cache");
        entry.insert(RegisteredCache::new(Arc::clone(&cache)));
        Ok(cache)
      }
    }
  }

  /// Returns the cache called `name`, building it from `config` if absent.
  pub fn get_or_create<K, V>(&self, name: &str, config: &CacheConfig) -> Result<Arc<dyn CacheDelegate<K, V>>>
  where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
  {
    self.get_or_create_with(name, || self.builder::<K, V>(name, config).build())
  }

  /// Like [`get_or_create`](Self::get_or_create), using the configuration this
  /// registry was created with.
  pub fn get_or_create_configured<K, V>(&self, name: &str) -> Result<Arc<dyn CacheDelegate<K, V>>>
  where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
  {
    let config = self
      .configured
      .get(name)
      .ok_or_else(|| CacheError::UnknownCache(name.to_string()))?;
    self.get_or_create(name, config)
  }

  /// Returns the cache called `name`, creating it from `config` wrapped in a
  /// decorator that fills misses from `provider`.
  ///
  /// The provider is only used when the cache is created.
  pub fn get_or_create_populating<K, V, P>(
    &self,
    name: &str,
    config: &CacheConfig,
    provider: P,
  ) -> Result<Arc<dyn CacheDelegate<K, V>>>
  where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
    P: ElementProvider<K, V> + 'static,
  {
    self.get_or_create_with(name, || {
      let cache: SelfPopulatingCache<K, V> =
        self.builder(name, config).build_self_populating(provider)?;
      Ok(Arc::new(cache) as Arc<dyn CacheDelegate<K, V>>)
    })
  }

  /// Returns the cache called `name` if it exists.
  pub fn get<K: 'static, V: 'static>(&self, name: &str) -> Result<Option<Arc<dyn CacheDelegate<K, V>>>> {
    self
      .caches
      .get(name)
      .map(|entry| entry.downcast(name))
      .transpose()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.caches.contains_key(name)
  }

  /// The backend variant of the cache called `name`, without knowing its types.
  pub fn cache_type(&self, name: &str) -> Option<CacheType> {
    self.caches.get(name).map(|entry| entry.cache_type)
  }

  pub fn names(&self) -> Vec<String> {
    self.caches.iter().map(|entry| entry.key().clone()).collect()
  }

  pub fn len(&self) -> usize {
    self.caches.len()
  }

  pub fn is_empty(&self) -> bool {
    self.caches.is_empty()
  }

  /// Closes the cache called `name` and forgets it. Returns `false` if there was none.
  pub fn remove(&self, name: &str) -> bool {
    match self.caches.remove(name) {
      Some((_, registered)) => {
        (registered.close)();
        info!(
          cache = %name,
          key_type = registered.key_type,
          value_type = registered.value_type,
          "removed cache"
        );
        true
      }
      None => false,
    }
  }

  /// Closes and forgets every cache.
  pub fn clear(&self) {
    for name in self.names() {
      self.remove(&name);
    }
  }
}

impl Drop for CacheRegistry {
  fn drop(&mut self) {
    self.clear();
  }
}
