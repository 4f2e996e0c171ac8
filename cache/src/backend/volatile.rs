use crate::delegate::{CacheDelegate, CacheType};
use crate::entry::CacheEntry;
use crate::error::Result;
use crate::listener::{self, EvictionListener, EvictionReason, Evictions};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::rng::FastRng;
use crate::store::ShardedStore;

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

/// One in this many writes samples a shard for expired entries.
const MAINTENANCE_PROBABILITY_DENOMINATOR: u32 = 16;

/// A pure in-memory cache with optional time-to-live and time-to-idle.
///
/// Entries are spread over independently locked shards. Expiry is checked when an
/// entry is read; writes occasionally sweep one random shard so that expired but
/// never-read entries do not accumulate.
pub struct VolatileCache<K, V, H = ahash::RandomState> {
  name: String,
  store: ShardedStore<K, V, H>,
  time_to_live: Option<Duration>,
  time_to_idle: Option<Duration>,
  metrics: Metrics,
  listener: Option<Arc<dyn EvictionListener<K, V>>>,
  rng: FastRng,
}

impl<K, V, H> fmt::Debug for VolatileCache<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("VolatileCache")
      .field("name", &self.name)
      .field("time_to_live", &self.time_to_live)
      .field("time_to_idle", &self.time_to_idle)
      .field("metrics", &self.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

impl<K, V, H> VolatileCache<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync,
  V: Send + Sync,
  H: BuildHasher + Clone + Send + Sync,
{
  /// `shards` must be a non-zero power of two; the builder guarantees this.
  pub(crate) fn new(
    name: String,
    shards: usize,
    hasher: H,
    time_to_live: Option<Duration>,
    time_to_idle: Option<Duration>,
    listener: Option<Arc<dyn EvictionListener<K, V>>>,
  ) -> Self {
    debug!(cache = %name, shards, ?time_to_live, ?time_to_idle, "creating volatile cache");
    Self {
      name,
      store: ShardedStore::new(shards, hasher),
      time_to_live,
      time_to_idle,
      metrics: Metrics::new(),
      listener,
      rng: FastRng::new(shards as u64),
    }
  }

  /// Removes `key` only if it still maps to the expired `entry` that was observed.
  fn expire(&self, key: &K, entry: &Arc<CacheEntry<V>>, evictions: &mut Evictions<K, V>) {
    let mut guard = self.store.shard_for(key).write();
    if let Some(current) = guard.get(key) {
      if Arc::ptr_eq(current, entry) {
        if let Some(removed) = guard.remove(key) {
          if let Some(expiration) = removed.expiration(self.time_to_idle) {
            self.metrics.record_expiration(expiration);
          }
          evictions.push((key.clone(), Some(removed.value()), EvictionReason::Expired));
        }
      }
    }
  }

  /// Sweeps expired entries from one shard.
  fn run_opportunistic_maintenance(&self, evictions: &mut Evictions<K, V>) {
    if !self.rng.should_run(MAINTENANCE_PROBABILITY_DENOMINATOR) {
      return;
    }
    let index = self.rng.below(self.store.len());
    self.sweep_shard(index, evictions);
  }

  fn sweep_shard(&self, index: usize, evictions: &mut Evictions<K, V>) {
    if self.time_to_live.is_none() && self.time_to_idle.is_none() {
      return;
    }
    let mut guard = self.store.shard_at(index).write();
    guard.retain(|key, entry| match entry.expiration(self.time_to_idle) {
      Some(expiration) => {
        self.metrics.record_expiration(expiration);
        evictions.push((key.clone(), Some(entry.value()), EvictionReason::Expired));
        false
      }
      None => true,
    });
  }

  /// Removes every expired entry from every shard.
  pub fn purge_expired(&self) {
    let mut evictions = Vec::new();
    for index in 0..self.store.len() {
      self.sweep_shard(index, &mut evictions);
    }
    listener::notify(&self.listener, evictions);
  }
}

impl<K, V, H> CacheDelegate<K, V> for VolatileCache<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync,
  V: Send + Sync,
  H: BuildHasher + Clone + Send + Sync,
{
  fn name(&self) -> &str {
    &self.name
  }

  fn insert(&self, key: K, value: Arc<V>) {
    let entry = Arc::new(CacheEntry::new(value, 1, self.time_to_live, self.time_to_idle));
    {
      let mut guard = self.store.shard_for(&key).write();
      guard.insert(key, entry);
    }
    Metrics::incr(&self.metrics.inserts);

    let mut evictions = Vec::new();
    self.run_opportunistic_maintenance(&mut evictions);
    listener::notify(&self.listener, evictions);
  }

  fn remove(&self, key: &K) -> bool {
    let removed = self.store.shard_for(key).write().remove(key);
    let Some(entry) = removed else {
      return false;
    };

    let reason = match entry.expiration(self.time_to_idle) {
      Some(expiration) => {
        self.metrics.record_expiration(expiration);
        EvictionReason::Expired
      }
      None => {
        Metrics::incr(&self.metrics.removals);
        EvictionReason::Removed
      }
    };
    listener::notify(&self.listener, vec![(key.clone(), Some(entry.value()), reason)]);
    reason == EvictionReason::Removed
  }

  fn get(&self, key: &K) -> Result<Option<Arc<V>>> {
    // Scope the read guard to release the lock as soon as possible.
    let found = self.store.shard_for(key).read().get(key).cloned();

    let Some(entry) = found else {
      trace!(cache = %self.name, "miss");
      Metrics::incr(&self.metrics.misses);
      return Ok(None);
    };

    if entry.expiration(self.time_to_idle).is_some() {
      let mut evictions = Vec::new();
      self.expire(key, &entry, &mut evictions);
      Metrics::incr(&self.metrics.misses);
      listener::notify(&self.listener, evictions);
      return Ok(None);
    }

    if self.time_to_idle.is_some() {
      entry.timestamps.touch();
    }
    Metrics::incr(&self.metrics.hits);
    Ok(Some(entry.value()))
  }

  fn keys(&self) -> Vec<K> {
    self
      .store
      .shards()
      .flat_map(|shard| {
        shard
          .read()
          .iter()
          .filter(|(_, entry)| entry.expiration(self.time_to_idle).is_none())
          .map(|(key, _)| key.clone())
          .collect::<Vec<_>>()
      })
      .collect()
  }

  fn contains_key(&self, key: &K) -> bool {
    self
      .store
      .shard_for(key)
      .read()
      .get(key)
      .map_or(false, |entry| entry.expiration(self.time_to_idle).is_none())
  }

  fn len(&self) -> usize {
    self
      .store
      .shards()
      .map(|shard| {
        shard
          .read()
          .values()
          .filter(|entry| entry.expiration(self.time_to_idle).is_none())
          .count()
      })
      .sum()
  }

  fn close(&self) {
    for shard in self.store.shards() {
      shard.write().clear();
    }
    debug!(cache = %self.name, "closed volatile cache");
  }

  fn cache_type(&self) -> CacheType {
    CacheType::Volatile
  }

  fn metrics(&self) -> Option<MetricsSnapshot> {
    Some(self.metrics.snapshot())
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use std::thread;

  fn new_cache(ttl: Option<Duration>, tti: Option<Duration>) -> VolatileCache<u32, String> {
    VolatileCache::new("volatile".into(), 4, ahash::RandomState::new(), ttl, tti, None)
  }

  #[test]
  fn put_get_remove() {
    let cache = new_cache(None, None);
    cache.put(1, Some("one".to_string()));
    assert_eq!(cache.get(&1).unwrap().as_deref(), Some(&"one".to_string()));
    assert!(cache.contains_key(&1));

    cache.put(1, None);
    assert!(cache.get(&1).unwrap().is_none());
    assert!(cache.keys().is_empty());

    let metrics = cache.metrics().unwrap();
    assert_eq!(metrics.hits, 1);
    assert_eq!(metrics.misses, 1);
    assert_eq!(metrics.removals, 1);
  }

  #[test]
  fn entries_expire_after_ttl() {
    let cache = new_cache(Some(Duration::from_millis(50)), None);
    cache.put(1, Some("one".to_string()));
    assert!(cache.get(&1).unwrap().is_some());
    thread::sleep(Duration::from_millis(80));

    assert!(!cache.contains_key(&1));
    assert!(cache.keys().is_empty());
    assert!(cache.get(&1).unwrap().is_none());
    assert_eq!(cache.metrics().unwrap().evicted_by_ttl, 1);
  }

  #[test]
  fn purge_expired_clears_unread_entries() {
    let cache = new_cache(None, Some(Duration::from_millis(30)));
    for i in 0..10 {
      cache.put(i, Some(i.to_string()));
    }
    thread::sleep(Duration::from_millis(60));
    cache.purge_expired();
    assert_eq!(cache.metrics().unwrap().evicted_by_tti, 10);
    assert_eq!(cache.len(), 0);
  }
}
