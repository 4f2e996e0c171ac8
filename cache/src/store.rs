use crate::entry::CacheEntry;

use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;

pub(crate) type Shard<K, V, H> = RwLock<HashMap<K, Arc<CacheEntry<V>>, H>>;

#[inline]
pub(crate) fn hash_key<K: Hash + ?Sized, H: BuildHasher>(hasher: &H, key: &K) -> u64 {
  let mut state = hasher.build_hasher();
  key.hash(&mut state);
  state.finish()
}

/// Entries spread over independently locked maps, picked by key hash.
///
/// Each lock sits on its own cache line so neighbouring shards do not false-share.
pub(crate) struct ShardedStore<K, V, H> {
  shards: Box<[CachePadded<Shard<K, V, H>>]>,
  mask: usize,
  hasher: H,
}

impl<K, V, H> fmt::Debug for ShardedStore<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ShardedStore")
      .field("shards", &self.shards.len())
      .finish()
  }
}

impl<K, V, H> ShardedStore<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  /// `shards` must be a non-zero power of two.
  pub(crate) fn new(shards: usize, hasher: H) -> Self {
    let shards: Box<[_]> = (0..shards)
      .map(|_| CachePadded::new(RwLock::new(HashMap::with_hasher(hasher.clone()))))
      .collect();
    Self {
      mask: shards.len() - 1,
      shards,
      hasher,
    }
  }

  #[inline]
  pub(crate) fn shard_for(&self, key: &K) -> &Shard<K, V, H> {
    let index = hash_key(&self.hasher, key) as usize & self.mask;
    &self.shards[index]
  }

  #[inline]
  pub(crate) fn shard_at(&self, index: usize) -> &Shard<K, V, H> {
    &self.shards[index]
  }

  pub(crate) fn len(&self) -> usize {
    self.shards.len()
  }

  pub(crate) fn shards(&self) -> impl Iterator<Item = &Shard<K, V, H>> {
    self.shards.iter().map(|shard| &**shard)
  }
}
