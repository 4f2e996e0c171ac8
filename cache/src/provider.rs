//! Capabilities the cache layer consumes from its callers: value providers and
//! serialization proxies.

use crate::error::{CacheError, ProviderError, Result};

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Computes the value for a key on a cache miss.
pub trait ElementProvider<K, V>: Send + Sync {
  fn provide(&self, key: &K) -> Result<V, ProviderError>;
}

impl<K, V, F> ElementProvider<K, V> for F
where
  F: Fn(&K) -> Result<V, ProviderError> + Send + Sync,
{
  fn provide(&self, key: &K) -> Result<V, ProviderError> {
    self(key)
  }
}

/// Produces the elements of an indexed sequence, one at a time or by range.
pub trait IndexedProvider<V>: Send + Sync {
  fn get(&self, index: usize) -> Result<V, ProviderError>;

  /// Produces the elements of `[start, end)` in order.
  ///
  /// Override this when one round trip for a run is cheaper than one per element.
  fn get_range(&self, start: usize, end: usize) -> Result<Vec<V>, ProviderError> {
    (start..end).map(|index| self.get(index)).collect()
  }
}

impl<V, F> IndexedProvider<V> for F
where
  F: Fn(usize) -> Result<V, ProviderError> + Send + Sync,
{
  fn get(&self, index: usize) -> Result<V, ProviderError> {
    self(index)
  }
}

/// Adapts values to and from the representation a cache stores.
pub trait SerializationProxy<V, S>: Send + Sync {
  fn convert(&self, value: V) -> Result<S>;
  fn reverse_convert(&self, stored: Arc<S>) -> Result<Arc<V>>;
}

/// Stores values as they are.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityProxy;

impl<V: Send + Sync> SerializationProxy<V, V> for IdentityProxy {
  fn convert(&self, value: V) -> Result<V> {
    Ok(value)
  }

  fn reverse_convert(&self, stored: Arc<V>) -> Result<Arc<V>> {
    Ok(stored)
  }
}

/// Stores values as `bincode` bytes.
pub struct BincodeProxy<V> {
  _marker: PhantomData<fn() -> V>,
}

impl<V> BincodeProxy<V> {
  pub fn new() -> Self {
    Self {
      _marker: PhantomData,
    }
  }
}

impl<V> Default for BincodeProxy<V> {
  fn default() -> Self {
    Self::new()
  }
}

impl<V> SerializationProxy<V, Vec<u8>> for BincodeProxy<V>
where
  V: Serialize + DeserializeOwned,
{
  fn convert(&self, value: V) -> Result<Vec<u8>> {
    bincode::serialize(&value).map_err(|e| CacheError::Serialization(e.to_string()))
  }

  fn reverse_convert(&self, stored: Arc<Vec<u8>>) -> Result<Arc<V>> {
    bincode::deserialize(&stored)
      .map(Arc::new)
      .map_err(|e| CacheError::Serialization(e.to_string()))
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn default_range_fetch_calls_get_per_index() {
    let provider = |index: usize| -> Result<usize, ProviderError> { Ok(index * 2) };
    assert_eq!(provider.get_range(2, 5).unwrap(), vec![4, 6, 8]);
  }

  #[test]
  fn bincode_proxy_rejects_garbage() {
    let proxy = BincodeProxy::<String>::new();
    let stored = proxy.convert("abc".to_string()).unwrap();
    assert_eq!(*proxy.reverse_convert(Arc::new(stored)).unwrap(), "abc");
    assert!(matches!(
      proxy.reverse_convert(Arc::new(vec![0xff])),
      Err(CacheError::Serialization(_))
    ));
  }
}
