use crate::delegate::{CacheDelegate, CacheType};
use crate::error::Result;

use std::marker::PhantomData;
use std::sync::Arc;

/// A cache that stores nothing and always misses.
///
/// Swapping it in disables caching without touching call sites.
#[derive(Debug)]
pub struct NoOpCache<K, V> {
  name: String,
  _marker: PhantomData<fn(K, V)>,
}

impl<K, V> NoOpCache<K, V> {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      _marker: PhantomData,
    }
  }
}

impl<K, V> CacheDelegate<K, V> for NoOpCache<K, V> {
  fn name(&self) -> &str {
    &self.name
  }

  fn insert(&self, _key: K, _value: Arc<V>) {}

  fn remove(&self, _key: &K) -> bool {
    false
  }

  fn get(&self, _key: &K) -> Result<Option<Arc<V>>> {
    Ok(None)
  }

  fn keys(&self) -> Vec<K> {
    Vec::new()
  }

  fn contains_key(&self, _key: &K) -> bool {
    false
  }

  fn close(&self) {}

  fn cache_type(&self) -> CacheType {
    CacheType::NoOp
  }
}
