use crate::backend::disk::DiskTier;
use crate::config::{MemoryBound, PersistenceStrategy};
use crate::delegate::{CacheDelegate, CacheType};
use crate::entry::CacheEntry;
use crate::error::Result;
use crate::listener::{self, EvictionListener, EvictionReason, Evictions};
use crate::lru_list::LruList;
use crate::metrics::{Metrics, MetricsSnapshot};

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, trace, warn};

/// Both tiers, guarded together so an entry is never in two places at once.
struct TierState<K: Eq + Hash + Clone, V> {
  entries: HashMap<K, CacheEntry<V>>,
  order: LruList<K>,
  disk: Option<DiskTier<K>>,
}

/// Options for a [`DiskOverflowCache`], resolved by the builder.
#[derive(Debug, Clone)]
pub(crate) struct OverflowOptions<'a> {
  pub(crate) memory_bound: MemoryBound,
  pub(crate) disk_bound: crate::config::DiskBound,
  pub(crate) persistence: PersistenceStrategy,
  pub(crate) disk_directory: &'a Path,
  pub(crate) time_to_live: Option<Duration>,
  pub(crate) time_to_idle: Option<Duration>,
}

/// A two-tier cache: a bounded LRU memory tier that spills to disk.
///
/// Entries evicted from memory are either dropped or, with
/// [`PersistenceStrategy::SwapOnOverflow`], serialized with `bincode` into a
/// bounded disk tier. Reading a disk-resident key moves it back into memory.
/// Disk failures are logged and degrade to a miss; they never reach the caller.
///
/// Key membership is tracked in a separate concurrent set, so `contains_key`
/// does not take the tier lock when no timeouts are configured.
pub struct DiskOverflowCache<K: Eq + Hash + Clone, V> {
  name: String,
  state: Mutex<TierState<K, V>>,
  key_index: DashSet<K, ahash::RandomState>,
  memory_bound: MemoryBound,
  persistence: PersistenceStrategy,
  time_to_live: Option<Duration>,
  time_to_idle: Option<Duration>,
  metrics: Metrics,
  listener: Option<Arc<dyn EvictionListener<K, V>>>,
}

impl<K: Eq + Hash + Clone, V> fmt::Debug for DiskOverflowCache<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DiskOverflowCache")
      .field("name", &self.name)
      .field("memory_bound", &self.memory_bound)
      .field("persistence", &self.persistence)
      .field("time_to_live", &self.time_to_live)
      .field("time_to_idle", &self.time_to_idle)
      .field("metrics", &self.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

enum MemoryLookup<V> {
  Hit(Arc<V>),
  Expired,
  Absent,
}

impl<K, V> DiskOverflowCache<K, V>
where
  K: Eq + Hash + Clone + Send + Sync,
  V: Serialize + DeserializeOwned + Send + Sync,
{
  pub(crate) fn new(
    name: String,
    options: OverflowOptions<'_>,
    listener: Option<Arc<dyn EvictionListener<K, V>>>,
  ) -> Result<Self> {
    let disk = match options.persistence {
      PersistenceStrategy::SwapOnOverflow => Some(DiskTier::open(
        options.disk_directory,
        &name,
        options.disk_bound,
      )?),
      PersistenceStrategy::None => None,
    };
    debug!(
      cache = %name,
      memory_bound = ?options.memory_bound,
      persistence = ?options.persistence,
      "creating disk-overflow cache"
    );

    Ok(Self {
      name,
      state: Mutex::new(TierState {
        entries: HashMap::new(),
        order: LruList::new(),
        disk,
      }),
      key_index: DashSet::with_hasher(ahash::RandomState::new()),
      memory_bound: options.memory_bound,
      persistence: options.persistence,
      time_to_live: options.time_to_live,
      time_to_idle: options.time_to_idle,
      metrics: Metrics::new(),
      listener,
    })
  }

  /// The weight an entry counts against the memory bound.
  fn weigh(&self, value: &V) -> u64 {
    match self.memory_bound {
      MemoryBound::Entries(_) => 1,
      MemoryBound::Bytes(_) => bincode::serialized_size(value)
        .unwrap_or_else(|_| std::mem::size_of::<V>() as u64),
    }
  }

  fn over_memory_bound(&self, state: &TierState<K, V>) -> bool {
    match self.memory_bound {
      MemoryBound::Entries(max) => state.order.len() as u64 > max,
      MemoryBound::Bytes(max) => state.order.total_weight() > max,
    }
  }

  /// Places an entry at the head of the memory tier and evicts until within bound.
  fn admit(&self, state: &mut TierState<K, V>, key: K, entry: CacheEntry<V>, evictions: &mut Evictions<K, V>) {
    state.order.push_front(key.clone(), entry.weight());
    state.entries.insert(key.clone(), entry);
    self.key_index.insert(key);

    while self.over_memory_bound(state) {
      let Some((victim, _)) = state.order.pop_back() else {
        break;
      };
      if let Some(entry) = state.entries.remove(&victim) {
        self.overflow(state, victim, entry, evictions);
      }
    }
  }

  /// Handles an entry pushed out of the memory tier.
  fn overflow(&self, state: &mut TierState<K, V>, key: K, entry: CacheEntry<V>, evictions: &mut Evictions<K, V>) {
    if let Some(expiration) = entry.expiration(self.time_to_idle) {
      self.key_index.remove(&key);
      self.metrics.record_expiration(expiration);
      evictions.push((key, Some(entry.value()), EvictionReason::Expired));
      return;
    }

    let Some(disk) = state.disk.as_mut() else {
      self.key_index.remove(&key);
      Metrics::incr(&self.metrics.evicted_by_capacity);
      evictions.push((key, Some(entry.value()), EvictionReason::Overflow));
      return;
    };

    let written = bincode::serialize(entry.value.as_ref())
      .map_err(|e| e.to_string())
      .and_then(|bytes| {
        disk
          .write(key.clone(), &bytes, entry.timestamps.snapshot())
          .map_err(|e| e.to_string())
      });

    match written {
      Ok(pushed_out) => {
        trace!(cache = %self.name, "spilled entry to disk");
        Metrics::incr(&self.metrics.spilled_to_disk);
        for victim in pushed_out {
          self.key_index.remove(&victim);
          Metrics::incr(&self.metrics.evicted_by_capacity);
          evictions.push((victim, None, EvictionReason::Capacity));
        }
      }
      Err(error) => {
        warn!(cache = %self.name, %error, "disk write failed, dropping entry");
        self.key_index.remove(&key);
        Metrics::incr(&self.metrics.disk_write_failures);
        evictions.push((key, Some(entry.value()), EvictionReason::Overflow));
      }
    }
  }

  fn lookup_memory(&self, state: &mut TierState<K, V>, key: &K) -> MemoryLookup<V> {
    match state.entries.get(key) {
      Some(entry) if entry.expiration(self.time_to_idle).is_some() => MemoryLookup::Expired,
      Some(entry) => {
        if self.time_to_idle.is_some() {
          entry.timestamps.touch();
        }
        let value = entry.value();
        state.order.move_to_front(key);
        MemoryLookup::Hit(value)
      }
      None => MemoryLookup::Absent,
    }
  }

  fn expire_memory(&self, state: &mut TierState<K, V>, key: &K, evictions: &mut Evictions<K, V>) {
    if let Some(entry) = state.entries.remove(key) {
      state.order.remove(key);
      self.key_index.remove(key);
      if let Some(expiration) = entry.expiration(self.time_to_idle) {
        self.metrics.record_expiration(expiration);
      }
      evictions.push((key.clone(), Some(entry.value()), EvictionReason::Expired));
    }
  }

  /// Reads a disk-resident entry back into the memory tier.
  fn promote_from_disk(&self, state: &mut TierState<K, V>, key: &K, evictions: &mut Evictions<K, V>) -> Option<Arc<V>> {
    let disk = state.disk.as_mut()?;

    if let Some(expiration) = disk.expiration(key, self.time_to_idle) {
      disk.remove(key);
      self.key_index.remove(key);
      self.metrics.record_expiration(expiration);
      evictions.push((key.clone(), None, EvictionReason::Expired));
      return None;
    }

    let (bytes, timestamps) = match disk.take(key)? {
      Ok(read) => read,
      Err(error) => {
        warn!(cache = %self.name, %error, "disk read failed, treating as miss");
        self.key_index.remove(key);
        return None;
      }
    };

    let value: V = match bincode::deserialize(&bytes) {
      Ok(value) => value,
      Err(error) => {
        warn!(cache = %self.name, %error, "failed to decode disk entry, treating as miss");
        self.key_index.remove(key);
        return None;
      }
    };

    if self.time_to_idle.is_some() {
      timestamps.touch();
    }
    let value = Arc::new(value);
    let weight = self.weigh(&value);
    let entry = CacheEntry::restored(value.clone(), weight, timestamps);
    Metrics::incr(&self.metrics.disk_hits);
    self.admit(state, key.clone(), entry, evictions);
    Some(value)
  }

  /// Removes every expired entry from both tiers.
  pub fn purge_expired(&self) {
    if self.time_to_live.is_none() && self.time_to_idle.is_none() {
      return;
    }
    let mut evictions = Vec::new();
    {
      let mut state = self.state.lock();
      let expired: Vec<K> = state
        .entries
        .iter()
        .filter(|(_, entry)| entry.expiration(self.time_to_idle).is_some())
        .map(|(key, _)| key.clone())
        .collect();
      for key in expired {
        self.expire_memory(&mut state, &key, &mut evictions);
      }

      if let Some(disk) = state.disk.as_mut() {
        for (key, expiration) in disk.expired_keys(self.time_to_idle) {
          disk.remove(&key);
          self.key_index.remove(&key);
          self.metrics.record_expiration(expiration);
          evictions.push((key, None, EvictionReason::Expired));
        }
      }
    }
    listener::notify(&self.listener, evictions);
  }

  /// Whether `key` is currently held in the memory tier.
  pub fn in_memory(&self, key: &K) -> bool {
    self.state.lock().entries.contains_key(key)
  }

  /// Whether `key` is currently held in the disk tier.
  pub fn on_disk(&self, key: &K) -> bool {
    self
      .state
      .lock()
      .disk
      .as_ref()
      .map_or(false, |disk| disk.contains(key))
  }

  pub fn memory_len(&self) -> usize {
    self.state.lock().entries.len()
  }

  pub fn disk_len(&self) -> usize {
    self.state.lock().disk.as_ref().map_or(0, DiskTier::len)
  }

  /// Bytes currently written to the disk tier.
  pub fn disk_size_bytes(&self) -> u64 {
    self.state.lock().disk.as_ref().map_or(0, DiskTier::size_bytes)
  }

  /// The directory holding this cache's disk tier, while it is open.
  pub fn disk_path(&self) -> Option<std::path::PathBuf> {
    self
      .state
      .lock()
      .disk
      .as_ref()
      .and_then(|disk| disk.path().map(Path::to_path_buf))
  }
}

impl<K, V> CacheDelegate<K, V> for DiskOverflowCache<K, V>
where
  K: Eq + Hash + Clone + Send + Sync,
  V: Serialize + DeserializeOwned + Send + Sync,
{
  fn name(&self) -> &str {
    &self.name
  }

  fn insert(&self, key: K, value: Arc<V>) {
    let weight = self.weigh(&value);
    let entry = CacheEntry::new(value, weight, self.time_to_live, self.time_to_idle);
    let mut evictions = Vec::new();
    {
      let mut state = self.state.lock();
      state.entries.remove(&key);
      state.order.remove(&key);
      if let Some(disk) = state.disk.as_mut() {
        disk.remove(&key);
      }
      self.admit(&mut state, key, entry, &mut evictions);
    }
    Metrics::incr(&self.metrics.inserts);
    listener::notify(&self.listener, evictions);
  }

  fn remove(&self, key: &K) -> bool {
    let removed = {
      let mut state = self.state.lock();
      self.key_index.remove(key);
      match state.entries.remove(key) {
        Some(entry) => {
          state.order.remove(key);
          Some(Some(entry))
        }
        None => state
          .disk
          .as_mut()
          .and_then(|disk| disk.remove(key).then_some(None)),
      }
    };

    let Some(entry) = removed else {
      return false;
    };
    let value = entry.as_ref().map(CacheEntry::value);
    if let Some(expiration) = entry.as_ref().and_then(|e| e.expiration(self.time_to_idle)) {
      self.metrics.record_expiration(expiration);
      listener::notify(&self.listener, vec![(key.clone(), value, EvictionReason::Expired)]);
      return false;
    }

    Metrics::incr(&self.metrics.removals);
    listener::notify(&self.listener, vec![(key.clone(), value, EvictionReason::Removed)]);
    true
  }

  fn get(&self, key: &K) -> Result<Option<Arc<V>>> {
    let mut evictions = Vec::new();
    let found = {
      let mut state = self.state.lock();
      match self.lookup_memory(&mut state, key) {
        MemoryLookup::Hit(value) => Some(value),
        MemoryLookup::Expired => {
          self.expire_memory(&mut state, key, &mut evictions);
          None
        }
        MemoryLookup::Absent => self.promote_from_disk(&mut state, key, &mut evictions),
      }
    };

    if found.is_some() {
      Metrics::incr(&self.metrics.hits);
    } else {
      trace!(cache = %self.name, "miss");
      Metrics::incr(&self.metrics.misses);
    }
    listener::notify(&self.listener, evictions);
    Ok(found)
  }

  fn keys(&self) -> Vec<K> {
    self.purge_expired();
    self.key_index.iter().map(|key| key.clone()).collect()
  }

  fn contains_key(&self, key: &K) -> bool {
    if !self.key_index.contains(key) {
      return false;
    }
    if self.time_to_live.is_none() && self.time_to_idle.is_none() {
      return true;
    }

    let state = self.state.lock();
    match state.entries.get(key) {
      Some(entry) => entry.expiration(self.time_to_idle).is_none(),
      None => state
        .disk
        .as_ref()
        .map_or(false, |disk| disk.contains(key) && disk.expiration(key, self.time_to_idle).is_none()),
    }
  }

  fn len(&self) -> usize {
    self.purge_expired();
    self.key_index.len()
  }

  fn close(&self) {
    let mut state = self.state.lock();
    state.entries.clear();
    state.order.clear();
    if let Some(disk) = state.disk.as_mut() {
      disk.close();
    }
    self.key_index.clear();
    debug!(cache = %self.name, "closed disk-overflow cache");
  }

  fn cache_type(&self) -> CacheType {
    CacheType::DiskOverflow
  }

  fn metrics(&self) -> Option<MetricsSnapshot> {
    Some(self.metrics.snapshot())
  }
}
