//! A decorator that fills cache misses from an [`ElementProvider`].

use crate::delegate::{CacheDelegate, CacheType};
use crate::error::{ProviderError, ProviderErrorKind, Result};
use crate::metrics::MetricsSnapshot;
use crate::provider::ElementProvider;
use crate::store::hash_key;

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{trace, warn};

/// How concurrent misses on the same key are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchMode {
  /// Every missing caller invokes the provider. Racing first accesses to one key
  /// may call it more than once; the last value stored wins.
  #[default]
  Concurrent,
  /// At most one provider call per key at a time.
  ///
  /// Loads are serialized through a fixed set of lock stripes chosen by key hash,
  /// so unrelated keys that share a stripe also wait for each other.
  SingleFlight {
    /// Number of lock stripes, rounded up to a power of two.
    stripes: usize,
  },
}

/// What a failed provider call turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderFailurePolicy {
  /// Every provider error is returned to the caller.
  Propagate,
  /// `Unavailable` errors are logged and reported as a miss; all others are returned.
  #[default]
  TolerateUnavailable,
}

impl ProviderFailurePolicy {
  fn tolerates(self, error: &ProviderError) -> bool {
    match self {
      ProviderFailurePolicy::Propagate => false,
      ProviderFailurePolicy::TolerateUnavailable => error.kind() == ProviderErrorKind::Unavailable,
    }
  }
}

/// A self-populating cache: on a miss the provider computes the value, which is
/// stored in the wrapped delegate and returned.
pub struct SelfPopulatingCache<K, V> {
  inner: Arc<dyn CacheDelegate<K, V>>,
  provider: Arc<dyn ElementProvider<K, V>>,
  failure_policy: ProviderFailurePolicy,
  load_locks: Box<[Mutex<()>]>,
  hasher: ahash::RandomState,
}

impl<K, V> fmt::Debug for SelfPopulatingCache<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SelfPopulatingCache")
      .field("name", &self.inner.name())
      .field("inner_type", &self.inner.cache_type())
      .field("failure_policy", &self.failure_policy)
      .field("load_stripes", &self.load_locks.len())
      .finish_non_exhaustive()
  }
}

impl<K, V> SelfPopulatingCache<K, V>
where
  K: Eq + Hash + Clone + Send + Sync,
  V: Send + Sync,
{
  pub fn new(inner: Arc<dyn CacheDelegate<K, V>>, provider: Arc<dyn ElementProvider<K, V>>) -> Self {
    Self {
      inner,
      provider,
      failure_policy: ProviderFailurePolicy::default(),
      load_locks: Vec::new().into_boxed_slice(),
      hasher: ahash::RandomState::new(),
    }
  }

  pub fn with_fetch_mode(mut self, mode: FetchMode) -> Self {
    self.load_locks = match mode {
      FetchMode::Concurrent => Vec::new().into_boxed_slice(),
      FetchMode::SingleFlight { stripes } => (0..stripes.max(1).next_power_of_two())
        .map(|_| Mutex::new(()))
        .collect(),
    };
    self
  }

  pub fn with_failure_policy(mut self, policy: ProviderFailurePolicy) -> Self {
    self.failure_policy = policy;
    self
  }

  pub fn fetch_mode(&self) -> FetchMode {
    if self.load_locks.is_empty() {
      FetchMode::Concurrent
    } else {
      FetchMode::SingleFlight {
        stripes: self.load_locks.len(),
      }
    }
  }

  /// The decorated delegate.
  pub fn inner(&self) -> &Arc<dyn CacheDelegate<K, V>> {
    &self.inner
  }

  /// Recomputes `key` from the provider and stores the fresh value, hit or not.
  pub fn refresh(&self, key: &K) -> Result<Option<Arc<V>>> {
    match self.load_lock(key) {
      Some(lock) => {
        let _guard = lock.lock();
        self.populate(key)
      }
      None => self.populate(key),
    }
  }

  fn load_lock(&self, key: &K) -> Option<&Mutex<()>> {
    if self.load_locks.is_empty() {
      return None;
    }
    let hash = hash_key(&self.hasher, key);
    Some(&self.load_locks[hash as usize & (self.load_locks.len() - 1)])
  }

  fn populate(&self, key: &K) -> Result<Option<Arc<V>>> {
    trace!(cache = %self.inner.name(), "populating miss from provider");
    match self.provider.provide(key) {
      Ok(value) => {
        let value = Arc::new(value);
        self.inner.insert(key.clone(), value.clone());
        Ok(Some(value))
      }
      Err(error) if self.failure_policy.tolerates(&error) => {
        warn!(cache = %self.inner.name(), %error, "provider unavailable, treating as miss");
        Ok(None)
      }
      Err(error) => Err(error.into()),
    }
  }
}

impl<K, V> CacheDelegate<K, V> for SelfPopulatingCache<K, V>
where
  K: Eq + Hash + Clone + Send + Sync,
  V: Send + Sync,
{
  fn name(&self) -> &str {
    self.inner.name()
  }

  fn insert(&self, key: K, value: Arc<V>) {
    self.inner.insert(key, value);
  }

  fn remove(&self, key: &K) -> bool {
    self.inner.remove(key)
  }

  fn get(&self, key: &K) -> Result<Option<Arc<V>>> {
    if let Some(value) = self.inner.get(key)? {
      return Ok(Some(value));
    }

    match self.load_lock(key) {
      Some(lock) => {
        let _guard = lock.lock();
        // Another thread may have loaded the key while we waited.
        if let Some(value) = self.inner.get(key)? {
          return Ok(Some(value));
        }
        self.populate(key)
      }
      None => self.populate(key),
    }
  }

  fn keys(&self) -> Vec<K> {
    self.inner.keys()
  }

  fn contains_key(&self, key: &K) -> bool {
    self.inner.contains_key(key)
  }

  fn len(&self) -> usize {
    self.inner.len()
  }

  fn close(&self) {
    self.inner.close();
  }

  fn cache_type(&self) -> CacheType {
    CacheType::SelfPopulating
  }

  fn metrics(&self) -> Option<MetricsSnapshot> {
    self.inner.metrics()
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use crate::backend::NoOpCache;

  #[test]
  fn provider_value_is_returned_even_when_inner_cache_stores_nothing() {
    let inner: Arc<dyn CacheDelegate<u32, u32>> = Arc::new(NoOpCache::<u32, u32>::new("noop"));
    let provider: Arc<dyn ElementProvider<u32, u32>> = Arc::new(|key: &u32| -> Result<u32, ProviderError> { Ok(key + 1) });
    let cache = SelfPopulatingCache::new(inner, provider);
    assert_eq!(cache.get(&1).unwrap().as_deref(), Some(&2));
  }

  #[test]
  fn single_flight_rounds_stripes_up() {
    let inner: Arc<dyn CacheDelegate<u32, u32>> = Arc::new(NoOpCache::<u32, u32>::new("noop"));
    let provider: Arc<dyn ElementProvider<u32, u32>> = Arc::new(|key: &u32| -> Result<u32, ProviderError> { Ok(*key) });
    let cache = SelfPopulatingCache::new(inner, provider)
      .with_fetch_mode(FetchMode::SingleFlight { stripes: 5 });
    assert_eq!(cache.fetch_mode(), FetchMode::SingleFlight { stripes: 8 });
  }
}
