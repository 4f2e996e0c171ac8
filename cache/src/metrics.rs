use crate::entry::Expiration;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crossbeam_utils::CachePadded;

type Counter = CachePadded<AtomicU64>;

fn counter() -> Counter {
  CachePadded::new(AtomicU64::new(0))
}

/// Lock-free counters kept by each backend and lazy list.
#[derive(Debug)]
pub(crate) struct Metrics {
  pub(crate) hits: Counter,
  pub(crate) misses: Counter,
  pub(crate) inserts: Counter,
  pub(crate) removals: Counter,
  pub(crate) evicted_by_capacity: Counter,
  pub(crate) evicted_by_ttl: Counter,
  pub(crate) evicted_by_tti: Counter,
  pub(crate) reclaimed: Counter,
  pub(crate) spilled_to_disk: Counter,
  pub(crate) disk_hits: Counter,
  pub(crate) disk_write_failures: Counter,
  started: Instant,
}

impl Metrics {
  pub(crate) fn new() -> Self {
    Self {
      hits: counter(),
      misses: counter(),
      inserts: counter(),
      removals: counter(),
      evicted_by_capacity: counter(),
      evicted_by_ttl: counter(),
      evicted_by_tti: counter(),
      reclaimed: counter(),
      spilled_to_disk: counter(),
      disk_hits: counter(),
      disk_write_failures: counter(),
      started: Instant::now(),
    }
  }

  #[inline]
  pub(crate) fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn record_expiration(&self, expiration: Expiration) {
    match expiration {
      Expiration::Live => Self::incr(&self.evicted_by_ttl),
      Expiration::Idle => Self::incr(&self.evicted_by_tti),
    }
  }

  pub(crate) fn snapshot(&self) -> MetricsSnapshot {
    let read = |counter: &Counter| counter.load(Ordering::Relaxed);
    let hits = read(&self.hits);
    let misses = read(&self.misses);
    let lookups = hits + misses;

    MetricsSnapshot {
      hits,
      misses,
      hit_ratio: if lookups == 0 {
        0.0
      } else {
        hits as f64 / lookups as f64
      },
      inserts: read(&self.inserts),
      removals: read(&self.removals),
      evicted_by_capacity: read(&self.evicted_by_capacity),
      evicted_by_ttl: read(&self.evicted_by_ttl),
      evicted_by_tti: read(&self.evicted_by_tti),
      reclaimed: read(&self.reclaimed),
      spilled_to_disk: read(&self.spilled_to_disk),
      disk_hits: read(&self.disk_hits),
      disk_write_failures: read(&self.disk_write_failures),
      uptime_secs: self.started.elapsed().as_secs(),
    }
  }
}

/// Point-in-time counters of a cache, see [`CacheDelegate::metrics`](crate::CacheDelegate::metrics).
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
  pub hits: u64,
  pub misses: u64,
  /// `hits / (hits + misses)`, or zero before the first lookup.
  pub hit_ratio: f64,
  pub inserts: u64,
  /// Explicit removals through `remove` or `put(key, None)`.
  pub removals: u64,
  /// Entries dropped because a memory or disk bound was exceeded.
  pub evicted_by_capacity: u64,
  pub evicted_by_ttl: u64,
  pub evicted_by_tti: u64,
  /// Entries whose soft-retained value was reclaimed.
  pub reclaimed: u64,
  /// Entries moved from the memory tier to the disk tier.
  pub spilled_to_disk: u64,
  /// Lookups served by reading the disk tier.
  pub disk_hits: u64,
  /// Spills that failed and were dropped instead.
  pub disk_write_failures: u64,
  pub uptime_secs: u64,
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn hit_ratio_is_zero_without_lookups() {
    let metrics = Metrics::new();
    assert_eq!(metrics.snapshot().hit_ratio, 0.0);
    Metrics::incr(&metrics.hits);
    Metrics::incr(&metrics.misses);
    Metrics::incr(&metrics.hits);
    Metrics::incr(&metrics.hits);
    assert_eq!(metrics.snapshot().hit_ratio, 0.75);
  }
}
