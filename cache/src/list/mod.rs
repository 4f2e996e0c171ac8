//! Indexed views over caches.
//!
//! [`CachedLazyList`] is a read-only sequence produced on demand by an
//! [`IndexedProvider`](crate::provider::IndexedProvider).
//! [`CachedReadWriteList`] stores elements by index in a named cache.

pub mod lazy;
pub mod read_write;

pub use lazy::{CachedLazyList, ListStats, MissStrategy, DEFAULT_SOFT_RETENTION_FACTOR};
pub use read_write::CachedReadWriteList;

use crate::error::{CacheError, Result};

use std::sync::Arc;

/// Common access to indexed lists.
///
/// The structural mutators fail with [`CacheError::Unsupported`] unless a list
/// overrides them, and a failed call leaves the list untouched.
pub trait IndexedList<V> {
  /// The element at `index`, or `None` if the list has no element there.
  fn get(&self, index: usize) -> Result<Option<Arc<V>>>;

  fn len(&self) -> usize;

  fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Replaces the element at `index`, returning the previous one.
  fn set(&self, _index: usize, _value: V) -> Result<Option<Arc<V>>> {
    Err(CacheError::Unsupported { operation: "set" })
  }

  /// Inserts an element at `index`, shifting later elements.
  fn insert(&self, _index: usize, _value: V) -> Result<()> {
    Err(CacheError::Unsupported { operation: "insert" })
  }

  fn push(&self, _value: V) -> Result<()> {
    Err(CacheError::Unsupported { operation: "push" })
  }

  /// Removes the element at `index`, returning it.
  fn remove(&self, _index: usize) -> Result<Option<Arc<V>>> {
    Err(CacheError::Unsupported { operation: "remove" })
  }
}
