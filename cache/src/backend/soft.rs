use crate::delegate::{CacheDelegate, CacheType};
use crate::error::Result;
use crate::listener::{self, EvictionListener, EvictionReason};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::reclaim::{SoftHeap, SoftRef};

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, trace};

/// A cache whose values may be reclaimed under memory pressure.
///
/// Keys are held strongly in a concurrent map, values only through [`SoftRef`]s
/// backed by the cache's [`SoftHeap`]. There is no disk tier and no eviction
/// policy beyond reclamation, which suits cheap, fully rematerializable values.
pub struct SoftReferenceCache<K: Eq + Hash + Clone, V> {
  name: String,
  map: DashMap<K, SoftRef<V>, ahash::RandomState>,
  heap: SoftHeap<K, V>,
  metrics: Metrics,
  listener: Option<Arc<dyn EvictionListener<K, V>>>,
}

impl<K: Eq + Hash + Clone, V> fmt::Debug for SoftReferenceCache<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SoftReferenceCache")
      .field("name", &self.name)
      .field("heap", &self.heap)
      .field("metrics", &self.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

impl<K, V> SoftReferenceCache<K, V>
where
  K: Eq + Hash + Clone + Send + Sync,
  V: Send + Sync,
{
  /// Creates a cache whose heap keeps at most `soft_capacity` values alive.
  pub(crate) fn new(
    name: String,
    soft_capacity: usize,
    listener: Option<Arc<dyn EvictionListener<K, V>>>,
  ) -> Self {
    debug!(cache = %name, soft_capacity, "creating soft-reference cache");
    Self {
      name,
      map: DashMap::with_hasher(ahash::RandomState::new()),
      heap: SoftHeap::new(soft_capacity),
      metrics: Metrics::new(),
      listener,
    }
  }

  /// The heap retaining this cache's values. Reclaiming from it simulates memory pressure.
  pub fn heap(&self) -> &SoftHeap<K, V> {
    &self.heap
  }

  /// Drops `key` if, and only if, its value has been reclaimed.
  fn purge(&self, key: &K) -> bool {
    if self
      .map
      .remove_if(key, |_, soft| soft.is_reclaimed())
      .is_some()
    {
      Metrics::incr(&self.metrics.reclaimed);
      listener::notify(
        &self.listener,
        vec![(key.clone(), None, EvictionReason::Reclaimed)],
      );
      true
    } else {
      false
    }
  }

  /// Drains the heap's reclaim queue and purges the entries it names.
  fn sweep(&self) {
    for key in self.heap.drain_reclaimed() {
      self.purge(&key);
    }
  }
}

impl<K, V> CacheDelegate<K, V> for SoftReferenceCache<K, V>
where
  K: Eq + Hash + Clone + Send + Sync,
  V: Send + Sync,
{
  fn name(&self) -> &str {
    &self.name
  }

  fn insert(&self, key: K, value: Arc<V>) {
    // The shard stays locked while the heap swaps values, so the stored handle
    // always points at the value the heap retains.
    let slot = self.map.entry(key);
    let soft = self.heap.retain(slot.key().clone(), value);
    slot.insert(soft);
    Metrics::incr(&self.metrics.inserts);
    self.sweep();
  }

  fn remove(&self, key: &K) -> bool {
    let removed = self.map.remove(key);
    let strong = self.heap.release(key);
    let value = strong.or_else(|| removed.and_then(|(_, soft)| soft.get()));

    match value {
      Some(value) => {
        Metrics::incr(&self.metrics.removals);
        listener::notify(
          &self.listener,
          vec![(key.clone(), Some(value), EvictionReason::Removed)],
        );
        true
      }
      None => false,
    }
  }

  fn get(&self, key: &K) -> Result<Option<Arc<V>>> {
    self.sweep();

    // The map guard is released at the end of this statement, before any purge.
    let found = self.map.get(key).map(|soft| soft.get());
    match found {
      Some(Some(value)) => {
        self.heap.touch(key);
        Metrics::incr(&self.metrics.hits);
        Ok(Some(value))
      }
      Some(None) => {
        trace!(cache = %self.name, "value reclaimed, treating as miss");
        self.purge(key);
        Metrics::incr(&self.metrics.misses);
        Ok(None)
      }
      None => {
        Metrics::incr(&self.metrics.misses);
        Ok(None)
      }
    }
  }

  fn keys(&self) -> Vec<K> {
    self.sweep();
    self
      .map
      .iter()
      .filter(|entry| !entry.value().is_reclaimed())
      .map(|entry| entry.key().clone())
      .collect()
  }

  fn contains_key(&self, key: &K) -> bool {
    self
      .map
      .get(key)
      .map_or(false, |soft| !soft.is_reclaimed())
  }

  fn close(&self) {
    self.map.clear();
    self.heap.clear();
    debug!(cache = %self.name, "closed soft-reference cache");
  }

  fn cache_type(&self) -> CacheType {
    CacheType::SoftReference
  }

  fn metrics(&self) -> Option<MetricsSnapshot> {
    Some(self.metrics.snapshot())
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn reclaimed_value_is_a_miss_and_is_purged() {
    let cache = SoftReferenceCache::<u32, String>::new("soft".into(), usize::MAX, None);
    cache.put(1, Some("one".to_string()));
    cache.put(2, Some("two".to_string()));
    assert!(cache.contains_key(&1));

    cache.heap().reclaim_all();
    assert!(!cache.contains_key(&1));
    assert!(cache.get(&1).unwrap().is_none());
    assert!(cache.keys().is_empty(), "sweep purges the remaining entry");

    let metrics = cache.metrics().unwrap();
    assert_eq!(metrics.reclaimed, 2);
    assert_eq!(metrics.misses, 1);
  }

  #[test]
  fn bounded_heap_reclaims_least_recently_used() {
    let cache = SoftReferenceCache::<u32, u32>::new("soft".into(), 2, None);
    cache.put(1, Some(10));
    cache.put(2, Some(20));
    assert!(cache.get(&1).unwrap().is_some());
    cache.put(3, Some(30));

    let mut keys = cache.keys();
    keys.sort();
    assert_eq!(keys, vec![1, 3]);
  }

  #[test]
  fn value_in_use_survives_pressure() {
    let cache = SoftReferenceCache::<u32, u32>::new("soft".into(), usize::MAX, None);
    cache.put(1, Some(10));
    let held = cache.get(&1).unwrap().unwrap();
    cache.heap().reclaim_all();
    assert_eq!(cache.get(&1).unwrap(), Some(held));
  }
}
