use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

// Timestamps are stored as nanoseconds since this process-wide origin.
static CLOCK_ORIGIN: Lazy<Instant> = Lazy::new(Instant::now);

#[inline]
fn now_nanos() -> u64 {
  nanos(Instant::now().saturating_duration_since(*CLOCK_ORIGIN))
}

// Saturates instead of wrapping, so an effectively infinite timeout stays infinite.
#[inline]
fn nanos(duration: Duration) -> u64 {
  u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Why an entry is no longer valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Expiration {
  /// The time-to-live elapsed since insertion.
  Live,
  /// The entry was not accessed within the time-to-idle.
  Idle,
}

/// Insertion and access timestamps for an entry, shared between tiers.
///
/// When an entry is spilled to disk its timestamps travel with it, so an
/// entry cannot outlive its TTL by moving between tiers.
#[derive(Debug)]
pub(crate) struct Timestamps {
  /// The expiration timestamp in nanoseconds. 0 means no TTL.
  expires_at: AtomicU64,
  /// The last access timestamp in nanoseconds. 0 means no TTI.
  last_accessed: AtomicU64,
}

impl Timestamps {
  pub(crate) fn new(ttl: Option<Duration>, tti: Option<Duration>) -> Self {
    let now = now_nanos();
    Self {
      expires_at: AtomicU64::new(ttl.map_or(0, |d| now.saturating_add(nanos(d)))),
      last_accessed: AtomicU64::new(tti.map_or(0, |_| now)),
    }
  }

  /// Copies the current timestamps, e.g. when an entry moves to another tier.
  pub(crate) fn snapshot(&self) -> Self {
    Self {
      expires_at: AtomicU64::new(self.expires_at.load(Ordering::Relaxed)),
      last_accessed: AtomicU64::new(self.last_accessed.load(Ordering::Relaxed)),
    }
  }

  /// Updates the last accessed timestamp to the current time.
  #[inline]
  pub(crate) fn touch(&self) {
    self
      .last_accessed
      .store(now_nanos(), Ordering::Relaxed);
  }

  /// Checks if the entry is expired based on its TTL or TTI.
  #[inline]
  pub(crate) fn expiration(&self, tti: Option<Duration>) -> Option<Expiration> {
    let now = now_nanos();

    let expires_at = self.expires_at.load(Ordering::Relaxed);
    if expires_at > 0 && now >= expires_at {
      return Some(Expiration::Live);
    }

    if let Some(time_to_idle) = tti {
      let last_accessed = self.last_accessed.load(Ordering::Relaxed);
      if now >= last_accessed.saturating_add(nanos(time_to_idle)) {
        return Some(Expiration::Idle);
      }
    }

    None
  }
}

/// A container for a value in a memory tier, holding all necessary metadata.
#[derive(Debug)]
pub(crate) struct CacheEntry<V> {
  /// The user's value, wrapped in an Arc for shared ownership.
  pub(crate) value: Arc<V>,
  /// The weight this entry counts against a memory bound.
  weight: u64,
  pub(crate) timestamps: Timestamps,
}

impl<V> CacheEntry<V> {
  pub(crate) fn new(value: Arc<V>, weight: u64, ttl: Option<Duration>, tti: Option<Duration>) -> Self {
    Self {
      value,
      weight,
      timestamps: Timestamps::new(ttl, tti),
    }
  }

  /// Rebuilds an entry from a value read back from disk, keeping its original timestamps.
  pub(crate) fn restored(value: Arc<V>, weight: u64, timestamps: Timestamps) -> Self {
    Self {
      value,
      weight,
      timestamps,
    }
  }

  /// Returns a clone of the `Arc` containing the value.
  #[inline]
  pub(crate) fn value(&self) -> Arc<V> {
    self.value.clone()
  }

  #[inline]
  pub(crate) fn weight(&self) -> u64 {
    self.weight
  }

  #[inline]
  pub(crate) fn expiration(&self, tti: Option<Duration>) -> Option<Expiration> {
    self.timestamps.expiration(tti)
  }
}
