//! Reclaimable ("soft") references.
//!
//! A [`SoftRef`] only holds a weak handle to its value. The strong handle lives in
//! a [`SoftHeap`], which plays the part of a memory manager: it keeps a bounded
//! number of values alive and reclaims the least-recently-touched ones when the
//! bound is exceeded, or on demand through [`SoftHeap::reclaim`] when the
//! application is under memory pressure. A value also stays reachable for as long
//! as a caller still holds an `Arc` to it, so a reclaimed `SoftRef` never
//! invalidates a value that is in use.
//!
//! Keys whose value was reclaimed are pushed onto a queue; owners drain it with
//! [`SoftHeap::drain_reclaimed`] to purge their stale entries.

use crate::lru_list::LruList;

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// A weak handle to a value retained by a [`SoftHeap`].
pub struct SoftRef<V> {
  weak: Weak<V>,
}

impl<V> SoftRef<V> {
  pub(crate) fn new(value: &Arc<V>) -> Self {
    Self {
      weak: Arc::downgrade(value),
    }
  }

  /// Returns the value if it has not been reclaimed.
  #[inline]
  pub fn get(&self) -> Option<Arc<V>> {
    self.weak.upgrade()
  }

  #[inline]
  pub fn is_reclaimed(&self) -> bool {
    self.weak.strong_count() == 0
  }
}

impl<V> Clone for SoftRef<V> {
  fn clone(&self) -> Self {
    Self {
      weak: self.weak.clone(),
    }
  }
}

impl<V> fmt::Debug for SoftRef<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SoftRef")
      .field("reclaimed", &self.is_reclaimed())
      .finish()
  }
}

struct HeapInner<K: Eq + Hash + Clone, V> {
  order: LruList<K>,
  retained: HashMap<K, Arc<V>>,
  queue: Vec<K>,
}

/// Owns the strong references behind a set of [`SoftRef`]s.
pub struct SoftHeap<K: Eq + Hash + Clone, V> {
  inner: Mutex<HeapInner<K, V>>,
  capacity: usize,
}

impl<K: Eq + Hash + Clone, V> fmt::Debug for SoftHeap<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SoftHeap")
      .field("capacity", &self.capacity)
      .field("retained", &self.len())
      .finish()
  }
}

impl<K: Eq + Hash + Clone, V> SoftHeap<K, V> {
  /// Creates a heap that keeps at most `capacity` values alive.
  pub fn new(capacity: usize) -> Self {
    Self {
      inner: Mutex::new(HeapInner {
        order: LruList::new(),
        retained: HashMap::new(),
        queue: Vec::new(),
      }),
      capacity,
    }
  }

  /// Creates a heap that only reclaims when asked to.
  pub fn unbounded() -> Self {
    Self::new(usize::MAX)
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  /// The number of values currently kept alive by the heap.
  pub fn len(&self) -> usize {
    self.inner.lock().order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Retains `value` and returns a soft handle to it.
  ///
  /// If this pushes the heap over capacity, the least-recently-touched values
  /// are reclaimed.
  pub fn retain(&self, key: K, value: Arc<V>) -> SoftRef<V> {
    let soft = SoftRef::new(&value);
    let mut dropped = Vec::new();
    {
      let mut inner = self.inner.lock();
      inner.order.push_front(key.clone(), 1);
      if let Some(previous) = inner.retained.insert(key, value) {
        dropped.push(previous);
      }
      while inner.order.len() > self.capacity {
        match inner.order.pop_back() {
          Some((victim, _)) => {
            if let Some(strong) = inner.retained.remove(&victim) {
              dropped.push(strong);
            }
            inner.queue.push(victim);
          }
          None => break,
        }
      }
    }
    // Values are dropped outside the lock.
    drop(dropped);
    soft
  }

  /// Marks `key` as recently used, postponing its reclamation.
  pub fn touch(&self, key: &K) {
    self.inner.lock().order.move_to_front(key);
  }

  /// Stops retaining `key` without queuing it as reclaimed, returning the strong reference.
  pub fn release(&self, key: &K) -> Option<Arc<V>> {
    let mut inner = self.inner.lock();
    inner.order.remove(key);
    inner.retained.remove(key)
  }

  /// Reclaims up to `count` least-recently-touched values. Returns how many were dropped.
  pub fn reclaim(&self, count: usize) -> usize {
    let mut dropped = Vec::new();
    {
      let mut inner = self.inner.lock();
      while dropped.len() < count {
        let Some((victim, _)) = inner.order.pop_back() else {
          break;
        };
        if let Some(strong) = inner.retained.remove(&victim) {
          dropped.push(strong);
        }
        inner.queue.push(victim);
      }
    }
    dropped.len()
  }

  /// Reclaims every retained value.
  pub fn reclaim_all(&self) -> usize {
    self.reclaim(usize::MAX)
  }

  /// Takes the keys reclaimed since the last call.
  pub fn drain_reclaimed(&self) -> Vec<K> {
    std::mem::take(&mut self.inner.lock().queue)
  }

  /// Drops every retained value without queuing anything.
  pub fn clear(&self) {
    let retained = {
      let mut inner = self.inner.lock();
      inner.order.clear();
      inner.queue.clear();
      std::mem::take(&mut inner.retained)
    };
    drop(retained);
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn retained_value_is_reachable() {
    let heap = SoftHeap::new(4);
    let soft = heap.retain(1, Arc::new("one"));
    assert_eq!(soft.get().as_deref(), Some(&"one"));
    assert!(heap.drain_reclaimed().is_empty());
  }

  #[test]
  fn overflow_reclaims_least_recently_touched() {
    let heap = SoftHeap::new(2);
    let a = heap.retain(1, Arc::new(10));
    let b = heap.retain(2, Arc::new(20));
    heap.touch(&1);
    let c = heap.retain(3, Arc::new(30));

    assert!(!a.is_reclaimed());
    assert!(b.is_reclaimed());
    assert!(!c.is_reclaimed());
    assert_eq!(heap.drain_reclaimed(), vec![2]);
    assert!(heap.drain_reclaimed().is_empty(), "queue is drained once");
  }

  #[test]
  fn value_held_by_caller_survives_reclamation() {
    let heap = SoftHeap::unbounded();
    let value = Arc::new(5);
    let soft = heap.retain("k", value.clone());
    assert_eq!(heap.reclaim_all(), 1);
    assert_eq!(soft.get(), Some(value.clone()));
    drop(value);
    assert!(soft.is_reclaimed());
  }

  #[test]
  fn release_does_not_queue() {
    let heap = SoftHeap::unbounded();
    let soft = heap.retain(1, Arc::new(1));
    let strong = heap.release(&1);
    assert!(strong.is_some());
    assert!(heap.is_empty());
    assert!(heap.drain_reclaimed().is_empty());
    drop(strong);
    assert!(soft.is_reclaimed());
  }
}
