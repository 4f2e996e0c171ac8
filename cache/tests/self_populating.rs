mod support;

use cachet::{
  CacheBuilder, CacheDelegate, CacheError, CacheKind, FetchMode, ProviderError,
  ProviderErrorKind, ProviderFailurePolicy, SelfPopulatingCache,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

fn counting_cache(
  mode: FetchMode,
  delay: Duration,
) -> (SelfPopulatingCache<u32, String>, Arc<AtomicUsize>) {
  let calls = Arc::new(AtomicUsize::new(0));
  let counter = calls.clone();
  let cache = CacheBuilder::<u32, String>::new("populated")
    .kind(CacheKind::Volatile)
    .fetch_mode(mode)
    .build_self_populating(move |key: &u32| -> Result<String, ProviderError> {
      counter.fetch_add(1, Ordering::SeqCst);
      thread::sleep(delay);
      Ok(format!("value-{}", key))
    })
    .unwrap();
  (cache, calls)
}

#[test]
fn test_provider_called_once_per_unseen_key() {
  support::init_tracing();
  let (cache, calls) = counting_cache(FetchMode::Concurrent, Duration::ZERO);

  assert_eq!(cache.get(&1).unwrap().as_deref(), Some(&"value-1".to_string()));
  assert_eq!(calls.load(Ordering::SeqCst), 1);
  assert_eq!(cache.get(&1).unwrap().as_deref(), Some(&"value-1".to_string()));
  assert_eq!(calls.load(Ordering::SeqCst), 1);
  assert!(cache.contains_key(&1));
  assert!(!cache.contains_key(&2), "contains_key never populates");
  assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_explicit_put_bypasses_provider() {
  let (cache, calls) = counting_cache(FetchMode::Concurrent, Duration::ZERO);
  cache.put(5, Some("manual".to_string()));
  assert_eq!(cache.get(&5).unwrap().as_deref(), Some(&"manual".to_string()));
  assert_eq!(calls.load(Ordering::SeqCst), 0);

  cache.put(5, None);
  assert_eq!(cache.get(&5).unwrap().as_deref(), Some(&"value-5".to_string()));
  assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_refresh_replaces_cached_value() {
  let (cache, calls) = counting_cache(FetchMode::Concurrent, Duration::ZERO);
  cache.put(3, Some("stale".to_string()));
  assert_eq!(cache.refresh(&3).unwrap().as_deref(), Some(&"value-3".to_string()));
  assert_eq!(cache.get(&3).unwrap().as_deref(), Some(&"value-3".to_string()));
  assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_single_flight_loads_each_key_once() {
  let (cache, calls) = counting_cache(FetchMode::SingleFlight { stripes: 8 }, Duration::from_millis(50));
  let cache = Arc::new(cache);
  let threads = 8;
  let barrier = Arc::new(Barrier::new(threads));

  let handles: Vec<_> = (0..threads)
    .map(|_| {
      let cache = cache.clone();
      let barrier = barrier.clone();
      thread::spawn(move || {
        barrier.wait();
        cache.get(&42).unwrap().unwrap()
      })
    })
    .collect();
  for handle in handles {
    assert_eq!(*handle.join().unwrap(), "value-42");
  }
  assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_concurrent_mode_always_returns_a_value() {
  let (cache, calls) = counting_cache(FetchMode::Concurrent, Duration::from_millis(20));
  let cache = Arc::new(cache);
  let threads = 4;
  let barrier = Arc::new(Barrier::new(threads));

  let handles: Vec<_> = (0..threads)
    .map(|_| {
      let cache = cache.clone();
      let barrier = barrier.clone();
      thread::spawn(move || {
        barrier.wait();
        cache.get(&7).unwrap().unwrap()
      })
    })
    .collect();
  for handle in handles {
    assert_eq!(*handle.join().unwrap(), "value-7");
  }
  // Racing first accesses may each invoke the provider.
  let calls = calls.load(Ordering::SeqCst);
  assert!((1..=threads).contains(&calls));
}

fn failing_cache(kind: ProviderErrorKind, policy: ProviderFailurePolicy) -> SelfPopulatingCache<u32, u32> {
  let inner: Arc<dyn CacheDelegate<u32, u32>> = Arc::new(
    CacheBuilder::<u32, u32>::new("failing")
      .build_volatile()
      .unwrap(),
  );
  let provider = move |_: &u32| -> Result<u32, ProviderError> {
    Err(ProviderError::new(kind, "source is down"))
  };
  SelfPopulatingCache::new(inner, Arc::new(provider)).with_failure_policy(policy)
}

#[test]
fn test_unavailable_provider_is_tolerated_by_default() {
  support::init_tracing();
  let cache = failing_cache(ProviderErrorKind::Unavailable, ProviderFailurePolicy::default());
  assert!(cache.get(&1).unwrap().is_none());
  assert!(cache.keys().is_empty());
}

#[test]
fn test_other_provider_errors_propagate() {
  let cache = failing_cache(ProviderErrorKind::Failed, ProviderFailurePolicy::TolerateUnavailable);
  match cache.get(&1) {
    Err(CacheError::Provider(error)) => {
      assert_eq!(error.kind(), ProviderErrorKind::Failed);
      assert_eq!(error.message(), "source is down");
    }
    other => panic!("Expected a provider error, got {:?}", other),
  }
}

#[test]
fn test_propagate_policy_returns_every_error() {
  let cache = failing_cache(ProviderErrorKind::Unavailable, ProviderFailurePolicy::Propagate);
  assert!(matches!(cache.get(&1), Err(CacheError::Provider(_))));
}

#[test]
fn test_decorating_a_no_op_cache_calls_provider_every_time() {
  let calls = Arc::new(AtomicUsize::new(0));
  let counter = calls.clone();
  let cache = CacheBuilder::<u32, u32>::new("uncached")
    .kind(CacheKind::NoOp)
    .build_self_populating(move |key: &u32| -> Result<u32, ProviderError> {
      counter.fetch_add(1, Ordering::SeqCst);
      Ok(*key)
    })
    .unwrap();

  assert_eq!(cache.get(&4).unwrap().as_deref(), Some(&4));
  assert_eq!(cache.get(&4).unwrap().as_deref(), Some(&4));
  assert_eq!(calls.load(Ordering::SeqCst), 2);
}
