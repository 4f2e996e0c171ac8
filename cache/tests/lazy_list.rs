mod support;

use cachet::{
  CacheError, CachedLazyList, IndexedProvider, MissStrategy, DEFAULT_SOFT_RETENTION_FACTOR,
};
use std::sync::Arc;
use support::RecordingProvider;

fn prefetching(provider: &Arc<RecordingProvider>, cache_size: usize) -> CachedLazyList<String> {
  CachedLazyList::new(provider.clone(), provider.len, cache_size)
    .with_miss_strategy(MissStrategy::PrefetchOnMiss)
}

#[test]
fn test_prefetch_fetches_clamped_runs() {
  support::init_tracing();
  let provider = Arc::new(RecordingProvider::new(10));
  let list = prefetching(&provider, 4);

  assert_eq!(*list.get(0).unwrap(), "element-0");
  assert_eq!(provider.ranges(), vec![(0, 4)]);
  for i in 1..4 {
    assert_eq!(*list.get(i).unwrap(), RecordingProvider::value_at(i));
  }
  assert_eq!(provider.ranges().len(), 1, "indices 1..=3 were prefetched");

  assert_eq!(*list.get(7).unwrap(), "element-7");
  assert_eq!(provider.ranges(), vec![(0, 4), (7, 10)]);
  assert_eq!(provider.single_calls(), 0);

  let stats = list.stats();
  assert_eq!(stats.misses, 2);
  assert_eq!(stats.hits, 3);
}

#[test]
fn test_single_fetch_requests_one_index() {
  let provider = Arc::new(RecordingProvider::new(10));
  let list = CachedLazyList::new(provider.clone(), 10, 4);

  list.get(3).unwrap();
  list.get(3).unwrap();
  assert_eq!(provider.single_calls(), 1);
  assert!(provider.ranges().is_empty());
  assert_eq!(list.hot_len(), 1);
}

#[test]
fn test_lru_bounds_hot_elements() {
  let provider = Arc::new(RecordingProvider::new(10));
  let list = CachedLazyList::new(provider.clone(), 10, 3);
  for i in 0..6 {
    list.get(i).unwrap();
  }
  assert_eq!(list.hot_len(), 3);
  assert_eq!(list.stats().evicted, 3);
  assert_eq!(list.heap().len(), 3);
}

#[test]
fn test_default_soft_retention_is_bounded() {
  let provider = Arc::new(RecordingProvider::new(1_000));
  let list = CachedLazyList::new(provider.clone(), 1_000, 4);
  for i in 0..1_000 {
    list.get(i).unwrap();
  }
  assert_eq!(list.hot_len(), 4);
  assert_eq!(list.heap().capacity(), 4 * DEFAULT_SOFT_RETENTION_FACTOR);
  assert_eq!(list.heap().len(), 4 * DEFAULT_SOFT_RETENTION_FACTOR);
  assert_eq!(list.stats().evicted, 996);
}

#[test]
fn test_unbounded_cache_size_prefetches_to_the_end() {
  let provider = Arc::new(RecordingProvider::new(10));
  let list = prefetching(&provider, usize::MAX);
  assert_eq!(*list.get(3).unwrap(), "element-3");
  assert_eq!(provider.ranges(), vec![(3, 10)]);
  assert_eq!(list.hot_len(), 7);

  let tail = list.sub_list(8, 10).unwrap();
  assert_eq!(*tail.get(1).unwrap(), "element-9");
  assert_eq!(provider.ranges(), vec![(3, 10), (9, 10)]);
}

#[test]
fn test_forced_reclamation_refetches_equal_value() {
  let provider = Arc::new(RecordingProvider::new(10));
  let list = CachedLazyList::new(provider.clone(), 10, 2);
  for i in 0..4 {
    list.get(i).unwrap();
  }
  // 0 and 1 are only soft-retained now.
  assert_eq!(list.heap().reclaim_all(), 2);

  let refetched = list.get(0).unwrap();
  assert_eq!(*refetched, provider.get(0).unwrap());
  assert_eq!(provider.single_calls(), 4 + 1 + 1);

  let stats = list.stats();
  assert_eq!(stats.reclaimed, 2, "the sweep pruned both reclaimed entries");
}

#[test]
fn test_value_in_use_survives_reclamation() {
  let provider = Arc::new(RecordingProvider::new(10));
  let list = CachedLazyList::new(provider.clone(), 10, 1);
  let held = list.get(0).unwrap();
  list.get(1).unwrap();

  list.heap().reclaim_all();
  let again = list.get(0).unwrap();
  assert!(Arc::ptr_eq(&held, &again));
  assert_eq!(provider.single_calls(), 2);
}

#[test]
fn test_bounded_soft_capacity_reclaims_oldest() {
  let provider = Arc::new(RecordingProvider::new(10));
  let list = CachedLazyList::new(provider.clone(), 10, 1).with_soft_capacity(2);
  for i in 0..5 {
    list.get(i).unwrap();
  }
  // Hot: 4. Soft: 3 and 2. 0 and 1 were reclaimed by the heap bound.
  assert_eq!(list.heap().len(), 2);
  list.get(3).unwrap();
  assert_eq!(provider.single_calls(), 5);
  list.get(0).unwrap();
  assert_eq!(provider.single_calls(), 6);
}

#[test]
fn test_sub_list_shares_provider() {
  let provider = Arc::new(RecordingProvider::new(10));
  let list = prefetching(&provider, 4);
  let window = list.sub_list(6, 9).unwrap();
  assert_eq!(window.len(), 3);

  assert_eq!(*window.get(0).unwrap(), "element-6");
  assert_eq!(provider.ranges(), vec![(6, 9)], "clamped to the window's end");
  assert!(matches!(
    window.get(3),
    Err(CacheError::IndexOutOfBounds { index: 3, len: 3 })
  ));
}

#[test]
fn test_iteration_visits_every_element() {
  let provider = Arc::new(RecordingProvider::new(5));
  let list = prefetching(&provider, 2);
  let values: Vec<String> = list.iter().map(|v| v.unwrap().as_ref().clone()).collect();
  assert_eq!(values.len(), 5);
  assert_eq!(values[4], "element-4");
  assert_eq!(provider.ranges(), vec![(0, 2), (2, 4), (4, 5)]);
  list.close();
}
