use crate::config::CacheConfig;
use crate::delegate::CacheDelegate;
use crate::error::Result;
use crate::list::IndexedList;
use crate::provider::{IdentityProxy, SerializationProxy};
use crate::registry::CacheRegistry;

use std::fmt;
use std::sync::Arc;
use std::vec;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

/// An indexed view over a cache keyed by position.
///
/// Elements pass through a [`SerializationProxy`] on every write and read, so the
/// cache can hold a different representation `S` than the list exposes. Indices
/// need not be contiguous: removing an element leaves a gap, and
/// [`len`](Self::len) counts the indices that currently hold a value.
pub struct CachedReadWriteList<V, S = V> {
  cache: Arc<dyn CacheDelegate<usize, S>>,
  proxy: Arc<dyn SerializationProxy<V, S>>,
}

impl<V, S> fmt::Debug for CachedReadWriteList<V, S> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CachedReadWriteList")
      .field("cache", &self.cache.name())
      .field("cache_type", &self.cache.cache_type())
      .finish_non_exhaustive()
  }
}

impl<V> CachedReadWriteList<V, V>
where
  V: Send + Sync + 'static,
{
  /// A list storing elements as they are.
  pub fn new(cache: Arc<dyn CacheDelegate<usize, V>>) -> Self {
    Self::with_proxy(cache, Arc::new(IdentityProxy))
  }
}

impl<V, S> CachedReadWriteList<V, S> {
  pub fn with_proxy(
    cache: Arc<dyn CacheDelegate<usize, S>>,
    proxy: Arc<dyn SerializationProxy<V, S>>,
  ) -> Self {
    Self { cache, proxy }
  }

  /// A list over the registry's cache called `name`, created from `config` if absent.
  pub fn open(
    registry: &CacheRegistry,
    name: &str,
    config: &CacheConfig,
    proxy: Arc<dyn SerializationProxy<V, S>>,
  ) -> Result<Self>
  where
    S: Serialize + DeserializeOwned + Send + Sync + 'static,
  {
    let cache = registry.get_or_create::<usize, S>(name, config)?;
    Ok(Self::with_proxy(cache, proxy))
  }

  /// The cache backing this list.
  pub fn cache(&self) -> &Arc<dyn CacheDelegate<usize, S>> {
    &self.cache
  }

  pub fn get(&self, index: usize) -> Result<Option<Arc<V>>> {
    self
      .cache
      .get(&index)?
      .map(|stored| self.proxy.reverse_convert(stored))
      .transpose()
  }

  /// Stores `value` at `index`, returning the element it replaced.
  ///
  /// A value the proxy cannot convert is rejected before anything is read or written.
  /// The previous element is only read when `index` is populated, and one that
  /// cannot be read back is reported as `None` without failing the write.
  pub fn set(&self, index: usize, value: V) -> Result<Option<Arc<V>>> {
    let stored = self.proxy.convert(value)?;
    let previous = if self.contains(index) {
      self.get(index).unwrap_or_else(|error| {
        warn!(cache = %self.cache.name(), index, %error, "overwriting unreadable element");
        None
      })
    } else {
      None
    };
    self.cache.put(index, Some(stored));
    Ok(previous)
  }

  /// Removes the element at `index`, returning it.
  pub fn remove(&self, index: usize) -> Result<Option<Arc<V>>> {
    let previous = self.get(index)?;
    self.cache.remove(&index);
    Ok(previous)
  }

  pub fn contains(&self, index: usize) -> bool {
    self.cache.contains_key(&index)
  }

  /// The number of indices currently holding a value.
  pub fn len(&self) -> usize {
    self.cache.len()
  }

  pub fn is_empty(&self) -> bool {
    self.cache.is_empty()
  }

  /// The populated indices in ascending order.
  pub fn indices(&self) -> Vec<usize> {
    let mut indices = self.cache.keys();
    indices.sort_unstable();
    indices
  }

  /// Iterates over the indices populated when the iterator is created, in
  /// ascending order. Indices added afterwards are not visited; indices removed
  /// afterwards are skipped.
  pub fn iter(&self) -> Iter<'_, V, S> {
    Iter {
      list: self,
      indices: self.indices().into_iter(),
    }
  }

  /// Removes every populated index.
  pub fn clear(&self) {
    for index in self.cache.keys() {
      self.cache.remove(&index);
    }
  }

  /// Closes the backing cache. The list cannot be used afterwards.
  pub fn close(self) {
    debug!(cache = %self.cache.name(), "closing read/write list");
    self.cache.close();
  }
}

impl<V, S> IndexedList<V> for CachedReadWriteList<V, S> {
  fn get(&self, index: usize) -> Result<Option<Arc<V>>> {
    CachedReadWriteList::get(self, index)
  }

  fn len(&self) -> usize {
    CachedReadWriteList::len(self)
  }

  fn set(&self, index: usize, value: V) -> Result<Option<Arc<V>>> {
    CachedReadWriteList::set(self, index, value)
  }

  fn remove(&self, index: usize) -> Result<Option<Arc<V>>> {
    CachedReadWriteList::remove(self, index)
  }
}

/// Iterator over a [`CachedReadWriteList`], see [`CachedReadWriteList::iter`].
pub struct Iter<'a, V, S> {
  list: &'a CachedReadWriteList<V, S>,
  indices: vec::IntoIter<usize>,
}

impl<'a, V, S> Iterator for Iter<'a, V, S> {
  type Item = Result<(usize, Arc<V>)>;

  fn next(&mut self) -> Option<Self::Item> {
    for index in self.indices.by_ref() {
      match self.list.get(index) {
        Ok(Some(value)) => return Some(Ok((index, value))),
        Ok(None) => continue,
        Err(e) => return Some(Err(e)),
      }
    }
    None
  }
}
