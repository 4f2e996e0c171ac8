use crate::backend::overflow::OverflowOptions;
use crate::backend::{DiskOverflowCache, NoOpCache, SoftReferenceCache, VolatileCache};
use crate::config::{
  CacheConfig, CacheKind, DiskBound, EvictionPolicy, MemoryBound, PersistenceStrategy,
};
use crate::delegate::CacheDelegate;
use crate::error::{BuildError, Result};
use crate::listener::EvictionListener;
use crate::populating::{FetchMode, ProviderFailurePolicy, SelfPopulatingCache};
use crate::provider::ElementProvider;

use core::fmt;
use std::hash::{BuildHasher, Hash};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Name of the directory under the system temp directory used when nothing else is configured.
pub const DEFAULT_DISK_DIRECTORY_NAME: &str = "cachet";

/// How many values a soft-reference cache keeps alive when `soft_capacity` is not set.
pub const DEFAULT_SOFT_CAPACITY: usize = 10_000;

/// The disk directory used when neither the cache nor its registry names one.
pub fn default_disk_directory() -> PathBuf {
  std::env::temp_dir().join(DEFAULT_DISK_DIRECTORY_NAME)
}

/// A builder for every cache backend.
///
/// Options that do not apply to the backend being built are ignored, so one
/// [`CacheConfig`] can describe any kind of cache.
pub struct CacheBuilder<K, V, H = ahash::RandomState> {
  name: String,
  config: CacheConfig,
  shards: usize,
  hasher: H,
  fallback_disk_directory: Option<PathBuf>,
  fetch_mode: FetchMode,
  failure_policy: ProviderFailurePolicy,
  listener: Option<Arc<dyn EvictionListener<K, V>>>,
}

// Manual Debug implementation for CacheBuilder.
impl<K, V, H> fmt::Debug for CacheBuilder<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheBuilder")
      .field("name", &self.name)
      .field("config", &self.config)
      .field("shards", &self.shards)
      .field("fetch_mode", &self.fetch_mode)
      .field("has_listener", &self.listener.is_some())
      .finish_non_exhaustive()
  }
}

// --- Default Constructors ---
impl<K, V> CacheBuilder<K, V, ahash::RandomState> {
  /// Creates a builder for a cache called `name` with default settings.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      config: CacheConfig::default(),
      shards: (num_cpus::get() * 4).max(1).next_power_of_two(),
      hasher: ahash::RandomState::new(),
      fallback_disk_directory: None,
      fetch_mode: FetchMode::default(),
      failure_policy: ProviderFailurePolicy::default(),
      listener: None,
    }
  }

  /// Creates a builder pre-filled from a configuration.
  pub fn from_config(name: impl Into<String>, config: &CacheConfig) -> Self {
    let mut builder = Self::new(name);
    if let Some(shards) = config.shards {
      // Zero is kept as-is so that `build` reports it.
      builder.shards = shards;
    }
    builder.config = config.clone();
    builder
  }
}

// --- General Configuration Methods ---
impl<K, V, H> CacheBuilder<K, V, H> {
  pub fn kind(mut self, kind: CacheKind) -> Self {
    self.config.kind = kind;
    self
  }

  /// Bounds the memory tier by entry count.
  pub fn max_entries_in_memory(mut self, entries: u64) -> Self {
    self.config.memory_bound = MemoryBound::Entries(entries);
    self
  }

  /// Bounds the memory tier by the encoded size of its values.
  pub fn heap_size_bytes(mut self, bytes: u64) -> Self {
    self.config.memory_bound = MemoryBound::Bytes(bytes);
    self
  }

  pub fn max_entries_on_disk(mut self, entries: u64) -> Self {
    self.config.disk_bound = DiskBound::Entries(entries);
    self
  }

  pub fn disk_size_bytes(mut self, bytes: u64) -> Self {
    self.config.disk_bound = DiskBound::Bytes(bytes);
    self
  }

  /// Sets a time-to-live (TTL) for all entries in the cache.
  pub fn time_to_live(mut self, duration: Duration) -> Self {
    self.config.time_to_live = Some(duration);
    self
  }

  /// Sets a time-to-idle (TTI) for all entries in the cache.
  pub fn time_to_idle(mut self, duration: Duration) -> Self {
    self.config.time_to_idle = Some(duration);
    self
  }

  pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
    self.config.eviction_policy = policy;
    self
  }

  pub fn persistence(mut self, persistence: PersistenceStrategy) -> Self {
    self.config.persistence = persistence;
    self
  }

  /// Sets the directory under which this cache's disk tier is created.
  pub fn disk_directory(mut self, path: impl Into<PathBuf>) -> Self {
    self.config.disk_directory = Some(path.into());
    self
  }

  /// The directory used when no explicit `disk_directory` is set.
  pub(crate) fn fallback_disk_directory(mut self, path: PathBuf) -> Self {
    self.fallback_disk_directory = Some(path);
    self
  }

  /// Sets the number of concurrent shards to use.
  pub fn shards(mut self, shards: usize) -> Self {
    // Ensure shards is at least 1 and a power of two for fast bitwise ANDing.
    self.shards = shards.max(1).next_power_of_two();
    self
  }

  /// How many values a soft-reference cache keeps alive before reclaiming the
  /// least recently used. Defaults to [`DEFAULT_SOFT_CAPACITY`].
  pub fn soft_capacity(mut self, capacity: usize) -> Self {
    self.config.soft_capacity = Some(capacity);
    self
  }

  /// Sets the eviction listener for the cache.
  pub fn eviction_listener<Listener>(mut self, listener: Listener) -> Self
  where
    Listener: EvictionListener<K, V> + 'static,
  {
    self.listener = Some(Arc::new(listener));
    self
  }

  /// How a self-populating cache handles concurrent misses on one key.
  pub fn fetch_mode(mut self, mode: FetchMode) -> Self {
    self.fetch_mode = mode;
    self
  }

  pub fn provider_failure_policy(mut self, policy: ProviderFailurePolicy) -> Self {
    self.failure_policy = policy;
    self
  }

  /// Sets the hasher used by the volatile backend's shards.
  pub fn hasher<H2>(self, hasher: H2) -> CacheBuilder<K, V, H2> {
    CacheBuilder {
      name: self.name,
      config: self.config,
      shards: self.shards,
      hasher,
      fallback_disk_directory: self.fallback_disk_directory,
      fetch_mode: self.fetch_mode,
      failure_policy: self.failure_policy,
      listener: self.listener,
    }
  }

  /// The configuration as it currently stands.
  pub fn config(&self) -> &CacheConfig {
    &self.config
  }

  /// Validates the builder configuration for the backend about to be built.
  pub(crate) fn validate(&self, kind: CacheKind) -> Result<(), BuildError> {
    if self.shards == 0 {
      return Err(BuildError::ZeroShards);
    }
    match kind {
      CacheKind::DiskOverflow => {
        if matches!(
          self.config.memory_bound,
          MemoryBound::Entries(0) | MemoryBound::Bytes(0)
        ) {
          return Err(BuildError::ZeroCapacity);
        }
        if self.config.persistence == PersistenceStrategy::SwapOnOverflow
          && matches!(
            self.config.disk_bound,
            DiskBound::Entries(0) | DiskBound::Bytes(0)
          )
        {
          return Err(BuildError::ZeroCapacity);
        }
      }
      CacheKind::SoftReference => {
        if self.config.soft_capacity == Some(0) {
          return Err(BuildError::ZeroCapacity);
        }
      }
      CacheKind::Volatile | CacheKind::NoOp => {}
    }
    Ok(())
  }

  fn resolved_disk_directory(&self) -> PathBuf {
    self
      .config
      .disk_directory
      .clone()
      .or_else(|| self.fallback_disk_directory.clone())
      .unwrap_or_else(default_disk_directory)
  }
}

// --- Build Methods ---
impl<K, V, H> CacheBuilder<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Builds an in-memory cache with the configured timeouts.
  pub fn build_volatile(self) -> Result<VolatileCache<K, V, H>, BuildError> {
    self.validate(CacheKind::Volatile)?;
    Ok(VolatileCache::new(
      self.name,
      self.shards.next_power_of_two(),
      self.hasher,
      self.config.time_to_live,
      self.config.time_to_idle,
      self.listener,
    ))
  }

  pub fn build_soft(self) -> Result<SoftReferenceCache<K, V>, BuildError> {
    self.validate(CacheKind::SoftReference)?;
    Ok(SoftReferenceCache::new(
      self.name,
      self.config.soft_capacity.unwrap_or(DEFAULT_SOFT_CAPACITY),
      self.listener,
    ))
  }

  pub fn build_no_op(self) -> NoOpCache<K, V> {
    NoOpCache::new(self.name)
  }
}

impl<K, V, H> CacheBuilder<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Serialize + DeserializeOwned + Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  /// Builds a two-tier cache. Creating the disk tier's directory may fail.
  pub fn build_disk_overflow(self) -> Result<DiskOverflowCache<K, V>> {
    self.validate(CacheKind::DiskOverflow)?;
    let disk_directory = self.resolved_disk_directory();
    let options = OverflowOptions {
      memory_bound: self.config.memory_bound,
      disk_bound: self.config.disk_bound,
      persistence: self.config.persistence,
      disk_directory: &disk_directory,
      time_to_live: self.config.time_to_live,
      time_to_idle: self.config.time_to_idle,
    };
    DiskOverflowCache::new(self.name, options, self.listener)
  }

  /// Builds whichever backend the configured kind names.
  pub fn build(self) -> Result<Arc<dyn CacheDelegate<K, V>>> {
    let kind = self.config.kind;
    let cache: Arc<dyn CacheDelegate<K, V>> = match kind {
      CacheKind::DiskOverflow => Arc::new(self.build_disk_overflow()?),
      CacheKind::Volatile => Arc::new(self.build_volatile()?),
      CacheKind::SoftReference => Arc::new(self.build_soft()?),
      CacheKind::NoOp => Arc::new(self.build_no_op()),
    };
    Ok(cache)
  }

  /// Builds the configured backend wrapped in a decorator that fills misses from `provider`.
  pub fn build_self_populating<P>(self, provider: P) -> Result<SelfPopulatingCache<K, V>>
  where
    P: ElementProvider<K, V> + 'static,
  {
    let fetch_mode = self.fetch_mode;
    let failure_policy = self.failure_policy;
    let inner = self.build()?;
    Ok(
      SelfPopulatingCache::new(inner, Arc::new(provider))
        .with_fetch_mode(fetch_mode)
        .with_failure_policy(failure_policy),
    )
  }
}
