use std::fmt;
use std::sync::Arc;

/// Describes the reason an entry was removed from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
  /// The entry was removed due to exceeding the cache's capacity.
  Capacity,
  /// The entry was removed because its time-to-live or time-to-idle expired.
  Expired,
  /// The entry was explicitly removed.
  Removed,
  /// The entry's value was reclaimed under memory pressure.
  Reclaimed,
  /// The entry left the memory tier and could not be kept on disk.
  Overflow,
}

impl fmt::Display for EvictionReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EvictionReason::Capacity => write!(f, "evicted due to capacity"),
      EvictionReason::Expired => write!(f, "evicted due to expiration (TTL/TTI)"),
      EvictionReason::Removed => write!(f, "explicitly removed"),
      EvictionReason::Reclaimed => write!(f, "reclaimed under memory pressure"),
      EvictionReason::Overflow => write!(f, "dropped on memory overflow"),
    }
  }
}

/// A listener that can be registered with a cache to receive notifications
/// when entries are evicted.
///
/// Listeners run synchronously on the thread that triggered the eviction, after
/// the cache has released its internal locks. The value is `None` when it was
/// already gone, e.g. a reclaimed soft value or an entry evicted from disk.
pub trait EvictionListener<K, V>: Send + Sync {
  fn on_evict(&self, key: K, value: Option<Arc<V>>, reason: EvictionReason);
}

impl<K, V, F> EvictionListener<K, V> for F
where
  F: Fn(K, Option<Arc<V>>, EvictionReason) + Send + Sync,
{
  fn on_evict(&self, key: K, value: Option<Arc<V>>, reason: EvictionReason) {
    self(key, value, reason)
  }
}

/// A batch of evictions collected while a lock was held, delivered after it is released.
pub(crate) type Evictions<K, V> = Vec<(K, Option<Arc<V>>, EvictionReason)>;

pub(crate) fn notify<K, V>(
  listener: &Option<Arc<dyn EvictionListener<K, V>>>,
  evictions: Evictions<K, V>,
) {
  if let Some(listener) = listener {
    for (key, value, reason) in evictions {
      listener.on_evict(key, value, reason);
    }
  }
}
