use crate::error::{CacheError, ProviderError, Result};
use crate::list::IndexedList;
use crate::lru_list::LruList;
use crate::metrics::Metrics;
use crate::provider::IndexedProvider;
use crate::reclaim::{SoftHeap, SoftRef};

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

/// What a lazy list fetches when an index is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissStrategy {
  /// Fetch exactly the missing index.
  #[default]
  SingleFetch,
  /// Fetch a run of up to `cache_size` elements starting at the missing index, in
  /// one range request. Suits sequential access over an expensive provider.
  PrefetchOnMiss,
}

/// Soft retention defaults to this many times `cache_size` evicted elements.
pub const DEFAULT_SOFT_RETENTION_FACTOR: usize = 4;

/// A snapshot of a lazy list's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ListStats {
  pub hits: u64,
  pub misses: u64,
  /// Entries whose soft-retained value was reclaimed.
  pub reclaimed: u64,
  /// Entries pushed out of the hot set into soft retention.
  pub evicted: u64,
}

struct LazyState<V> {
  hot: LruList<usize>,
  values: HashMap<usize, Arc<V>>,
  soft: HashMap<usize, SoftRef<V>>,
}

/// A read-only sequence whose elements are produced by a provider on first access.
///
/// Up to `cache_size` recently used elements are held strongly. Elements pushed
/// out of that hot set are kept in a [`SoftHeap`] and stay recoverable until the
/// heap reclaims them, after which the next access fetches them again.
pub struct CachedLazyList<V> {
  provider: Arc<dyn IndexedProvider<V>>,
  offset: usize,
  len: usize,
  cache_size: usize,
  strategy: MissStrategy,
  state: Mutex<LazyState<V>>,
  heap: SoftHeap<usize, V>,
  metrics: Metrics,
}

impl<V> fmt::Debug for CachedLazyList<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CachedLazyList")
      .field("offset", &self.offset)
      .field("len", &self.len)
      .field("cache_size", &self.cache_size)
      .field("strategy", &self.strategy)
      .field("heap", &self.heap)
      .finish_non_exhaustive()
  }
}

impl<V: Send + Sync> CachedLazyList<V> {
  /// Creates a list of `len` elements holding at most `cache_size` of them
  /// strongly. A `cache_size` of zero is treated as one.
  ///
  /// Up to [`DEFAULT_SOFT_RETENTION_FACTOR`] times `cache_size` evicted elements
  /// stay soft-retained; see [`with_soft_capacity`](Self::with_soft_capacity).
  pub fn new(provider: Arc<dyn IndexedProvider<V>>, len: usize, cache_size: usize) -> Self {
    let soft_capacity = cache_size
      .max(1)
      .saturating_mul(DEFAULT_SOFT_RETENTION_FACTOR);
    Self::with_range(provider, 0, len, cache_size, MissStrategy::default(), soft_capacity)
  }

  fn with_range(
    provider: Arc<dyn IndexedProvider<V>>,
    offset: usize,
    len: usize,
    cache_size: usize,
    strategy: MissStrategy,
    soft_capacity: usize,
  ) -> Self {
    Self {
      provider,
      offset,
      len,
      cache_size: cache_size.max(1),
      strategy,
      state: Mutex::new(LazyState {
        hot: LruList::new(),
        values: HashMap::new(),
        soft: HashMap::new(),
      }),
      heap: SoftHeap::new(soft_capacity),
      metrics: Metrics::new(),
    }
  }

  pub fn with_miss_strategy(mut self, strategy: MissStrategy) -> Self {
    self.strategy = strategy;
    self
  }

  /// Bounds how many evicted elements stay soft-retained.
  pub fn with_soft_capacity(mut self, capacity: usize) -> Self {
    self.heap = SoftHeap::new(capacity);
    self
  }

  pub fn len(&self) -> usize {
    self.len
  }

  pub fn is_empty(&self) -> bool {
    self.len == 0
  }

  pub fn cache_size(&self) -> usize {
    self.cache_size
  }

  pub fn miss_strategy(&self) -> MissStrategy {
    self.strategy
  }

  /// The heap retaining evicted elements. Reclaiming from it simulates memory pressure.
  pub fn heap(&self) -> &SoftHeap<usize, V> {
    &self.heap
  }

  /// Number of elements currently held strongly.
  pub fn hot_len(&self) -> usize {
    self.state.lock().hot.len()
  }

  pub fn stats(&self) -> ListStats {
    ListStats {
      hits: self.metrics.hits.load(Ordering::Relaxed),
      misses: self.metrics.misses.load(Ordering::Relaxed),
      reclaimed: self.metrics.reclaimed.load(Ordering::Relaxed),
      evicted: self.metrics.evicted_by_capacity.load(Ordering::Relaxed),
    }
  }

  /// Returns the element at `index`, fetching it from the provider if it is not cached.
  pub fn get(&self, index: usize) -> Result<Arc<V>> {
    if index >= self.len {
      return Err(CacheError::IndexOutOfBounds {
        index,
        len: self.len,
      });
    }
    self.sweep();

    if let Some(value) = self.lookup(index) {
      Metrics::incr(&self.metrics.hits);
      return Ok(value);
    }
    Metrics::incr(&self.metrics.misses);

    // The provider is called without holding the state lock.
    let fetched = self.fetch(index)?;
    let mut state = self.state.lock();
    let mut requested = None;
    for (at, value) in fetched {
      if at == index {
        requested = Some(value.clone());
      }
      self.admit(&mut state, at, value);
    }
    state.hot.move_to_front(&index);
    requested.ok_or_else(|| {
      ProviderError::failed(format!("provider returned no element for index {}", index)).into()
    })
  }

  /// A new list over `[start, end)` of this one, sharing its provider but not its cache.
  pub fn sub_list(&self, start: usize, end: usize) -> Result<CachedLazyList<V>> {
    if end > self.len {
      return Err(CacheError::IndexOutOfBounds {
        index: end,
        len: self.len,
      });
    }
    if start > end {
      return Err(CacheError::IndexOutOfBounds {
        index: start,
        len: end,
      });
    }
    Ok(Self::with_range(
      Arc::clone(&self.provider),
      self.offset + start,
      end - start,
      self.cache_size,
      self.strategy,
      self.heap.capacity(),
    ))
  }

  /// Iterates over every element in order, fetching as needed.
  pub fn iter(&self) -> impl Iterator<Item = Result<Arc<V>>> + '_ {
    (0..self.len).map(move |index| self.get(index))
  }

  /// Releases every cached element. The list cannot be used afterwards.
  pub fn close(self) {
    let stats = self.stats();
    self.heap.clear();
    debug!(
      offset = self.offset,
      len = self.len,
      hits = stats.hits,
      misses = stats.misses,
      "closed lazy list"
    );
  }

  /// Prunes entries whose soft-retained value the heap has reclaimed.
  fn sweep(&self) {
    let reclaimed = self.heap.drain_reclaimed();
    if reclaimed.is_empty() {
      return;
    }
    let mut state = self.state.lock();
    for index in reclaimed {
      let dead = state
        .soft
        .get(&index)
        .map_or(false, SoftRef::is_reclaimed);
      if dead {
        state.soft.remove(&index);
        Metrics::incr(&self.metrics.reclaimed);
      }
    }
  }

  fn lookup(&self, index: usize) -> Option<Arc<V>> {
    let mut state = self.state.lock();
    if let Some(value) = state.values.get(&index).cloned() {
      state.hot.move_to_front(&index);
      return Some(value);
    }

    let soft = state.soft.remove(&index)?;
    match soft.get() {
      Some(value) => {
        trace!(index, "recovered soft-retained element");
        self.admit(&mut state, index, value.clone());
        Some(value)
      }
      None => {
        Metrics::incr(&self.metrics.reclaimed);
        None
      }
    }
  }

  fn fetch(&self, index: usize) -> Result<Vec<(usize, Arc<V>)>> {
    let absolute = self.offset + index;
    match self.strategy {
      MissStrategy::SingleFetch => {
        trace!(index = absolute, "fetching element");
        let value = self.provider.get(absolute)?;
        Ok(vec![(index, Arc::new(value))])
      }
      MissStrategy::PrefetchOnMiss => {
        let end = index.saturating_add(self.cache_size).min(self.len);
        trace!(start = absolute, end = self.offset + end, "prefetching range");
        let values = self.provider.get_range(absolute, self.offset + end)?;
        Ok(
          (index..end)
            .zip(values)
            .map(|(at, value)| (at, Arc::new(value)))
            .collect(),
        )
      }
    }
  }

  /// Makes `index` the most recently used hot element, moving the least recently
  /// used ones into soft retention while over `cache_size`.
  fn admit(&self, state: &mut LazyState<V>, index: usize, value: Arc<V>) {
    state.soft.remove(&index);
    drop(self.heap.release(&index));

    state.hot.push_front(index, 1);
    state.values.insert(index, value);

    while state.hot.len() > self.cache_size {
      let Some((victim, _)) = state.hot.pop_back() else {
        break;
      };
      if let Some(value) = state.values.remove(&victim) {
        Metrics::incr(&self.metrics.evicted_by_capacity);
        let soft = self.heap.retain(victim, value);
        state.soft.insert(victim, soft);
      }
    }
  }
}

impl<V: Send + Sync> IndexedList<V> for CachedLazyList<V> {
  fn get(&self, index: usize) -> Result<Option<Arc<V>>> {
    CachedLazyList::get(self, index).map(Some)
  }

  fn len(&self) -> usize {
    self.len
  }
}

#[cfg(test)]
mod test {
  use super::*;
  use std::sync::atomic::AtomicUsize;

  struct Squares {
    calls: AtomicUsize,
  }

  impl IndexedProvider<usize> for Squares {
    fn get(&self, index: usize) -> Result<usize, ProviderError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(index * index)
    }
  }

  fn squares() -> Arc<Squares> {
    Arc::new(Squares {
      calls: AtomicUsize::new(0),
    })
  }

  #[test]
  fn out_of_bounds_is_an_error() {
    let list = CachedLazyList::new(squares(), 3, 2);
    assert!(matches!(
      list.get(3),
      Err(CacheError::IndexOutOfBounds { index: 3, len: 3 })
    ));
  }

  #[test]
  fn evicted_elements_are_recovered_from_soft_retention() {
    let provider = squares();
    let list = CachedLazyList::new(provider.clone(), 10, 2);
    for i in 0..3 {
      assert_eq!(*list.get(i).unwrap(), i * i);
    }
    assert_eq!(list.hot_len(), 2);
    assert_eq!(list.stats().evicted, 1);

    assert_eq!(*list.get(0).unwrap(), 0);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3, "0 came back without a fetch");
  }

  #[test]
  fn mutators_are_unsupported() {
    let list = CachedLazyList::new(squares(), 3, 2);
    let list: &dyn IndexedList<usize> = &list;
    assert!(matches!(list.set(0, 1), Err(CacheError::Unsupported { operation: "set" })));
    assert!(matches!(list.push(1), Err(CacheError::Unsupported { .. })));
    assert!(matches!(list.insert(0, 1), Err(CacheError::Unsupported { .. })));
    assert!(matches!(list.remove(0), Err(CacheError::Unsupported { .. })));
    assert_eq!(list.len(), 3);
  }

  #[test]
  fn sub_list_reads_through_shared_provider() {
    let provider = squares();
    let list = CachedLazyList::new(provider.clone(), 10, 4);
    let tail = list.sub_list(5, 8).unwrap();
    assert_eq!(tail.len(), 3);
    assert_eq!(*tail.get(0).unwrap(), 25);
    assert!(tail.get(3).is_err());
    assert!(list.sub_list(2, 11).is_err());
    assert!(list.sub_list(6, 5).is_err());
  }
}
