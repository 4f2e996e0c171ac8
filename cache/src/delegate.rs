//! The uniform contract every cache backend implements.

use crate::error::Result;
use crate::metrics::MetricsSnapshot;

use std::fmt;
use std::sync::Arc;

/// The backend variant behind a [`CacheDelegate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheType {
  /// Bounded LRU memory tier with a spill-over disk tier.
  DiskOverflow,
  /// Pure memory with TTL/TTI, no disk.
  Volatile,
  /// Values reclaimable under memory pressure.
  SoftReference,
  /// Always misses.
  NoOp,
  /// A delegate decorated with a provider that fills misses.
  SelfPopulating,
}

impl fmt::Display for CacheType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      CacheType::DiskOverflow => write!(f, "disk_overflow"),
      CacheType::Volatile => write!(f, "volatile"),
      CacheType::SoftReference => write!(f, "soft_reference"),
      CacheType::NoOp => write!(f, "no_op"),
      CacheType::SelfPopulating => write!(f, "self_populating"),
    }
  }
}

/// A named cache hiding the differences between backends.
///
/// Implementations are safe to share between threads; `get` and `put` need no
/// external locking.
pub trait CacheDelegate<K, V>: Send + Sync {
  /// The name the cache was created under.
  fn name(&self) -> &str;

  /// Stores an already shared value, replacing any previous one.
  fn insert(&self, key: K, value: Arc<V>);

  /// Removes a key, returning `true` if a live value was present.
  /// Removing an absent key has no side effects.
  fn remove(&self, key: &K) -> bool;

  /// Looks up a key. A missing, expired or reclaimed value is `Ok(None)`.
  ///
  /// Only population can fail: a self-populating cache returns the provider's error.
  fn get(&self, key: &K) -> Result<Option<Arc<V>>>;

  /// A snapshot of the keys that currently hold a live value.
  fn keys(&self) -> Vec<K>;

  /// Drops every entry and releases backend resources. Calling it again is a no-op.
  fn close(&self);

  fn cache_type(&self) -> CacheType;

  /// Stores `value` under `key`; `None` is equivalent to [`remove`](Self::remove).
  fn put(&self, key: K, value: Option<V>) {
    match value {
      Some(value) => self.insert(key, Arc::new(value)),
      None => {
        self.remove(&key);
      }
    }
  }

  /// Whether `key` currently maps to a live value. Never triggers population.
  fn contains_key(&self, key: &K) -> bool;

  /// The number of live keys.
  fn len(&self) -> usize {
    self.keys().len()
  }

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// A snapshot of the backend's counters, if it keeps any.
  fn metrics(&self) -> Option<MetricsSnapshot> {
    None
  }

  /// Looks up several keys, stopping at the first population failure.
  fn get_all(&self, keys: &[K]) -> Result<Vec<Option<Arc<V>>>> {
    keys.iter().map(|key| self.get(key)).collect()
  }

  /// Applies [`put`](Self::put) to each pair in order.
  fn put_all(&self, entries: Vec<(K, Option<V>)>) {
    for (key, value) in entries {
      self.put(key, value);
    }
  }
}
