#![allow(dead_code)]

use cachet::{IndexedProvider, ProviderError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, Once};

static TRACING: Once = Once::new();

/// Installs a `tracing` subscriber once per test binary. Filter with `RUST_LOG`.
pub fn init_tracing() {
  TRACING.call_once(|| {
    let _ = tracing_subscriber::fmt()
      .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
      .with_test_writer()
      .try_init();
  });
}

/// An indexed provider over `0..len` that records every call it receives.
pub struct RecordingProvider {
  pub len: usize,
  pub single_calls: AtomicUsize,
  pub ranges: Mutex<Vec<(usize, usize)>>,
}

impl RecordingProvider {
  pub fn new(len: usize) -> Self {
    Self {
      len,
      single_calls: AtomicUsize::new(0),
      ranges: Mutex::new(Vec::new()),
    }
  }

  /// The value this provider produces for `index`.
  pub fn value_at(index: usize) -> String {
    format!("element-{}", index)
  }

  pub fn single_calls(&self) -> usize {
    self.single_calls.load(Ordering::SeqCst)
  }

  pub fn ranges(&self) -> Vec<(usize, usize)> {
    self.ranges.lock().unwrap().clone()
  }
}

impl IndexedProvider<String> for RecordingProvider {
  fn get(&self, index: usize) -> Result<String, ProviderError> {
    if index >= self.len {
      return Err(ProviderError::not_found(format!("no element {}", index)));
    }
    self.single_calls.fetch_add(1, Ordering::SeqCst);
    Ok(Self::value_at(index))
  }

  fn get_range(&self, start: usize, end: usize) -> Result<Vec<String>, ProviderError> {
    self.ranges.lock().unwrap().push((start, end));
    Ok((start..end.min(self.len)).map(Self::value_at).collect())
  }
}
