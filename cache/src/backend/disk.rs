use crate::config::DiskBound;
use crate::entry::{Expiration, Timestamps};
use crate::lru_list::LruList;

use std::collections::HashMap;
use std::fs;
use std::hash::Hash;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tracing::{debug, warn};

#[derive(Debug)]
struct DiskSlot {
  file_id: u64,
  timestamps: Timestamps,
}

/// The spill-over tier of a disk-overflow cache.
///
/// Every entry is one file inside a private temporary directory, which is deleted
/// when the tier is closed or dropped. The tier is not synchronized itself; its
/// owner keeps it behind the same lock as the memory tier.
#[derive(Debug)]
pub(crate) struct DiskTier<K: Eq + Hash + Clone> {
  dir: Option<TempDir>,
  slots: HashMap<K, DiskSlot>,
  order: LruList<K>,
  bound: DiskBound,
  next_file_id: u64,
}

impl<K: Eq + Hash + Clone> DiskTier<K> {
  /// Creates the tier's directory under `parent`, creating `parent` if needed.
  pub(crate) fn open(parent: &Path, cache_name: &str, bound: DiskBound) -> io::Result<Self> {
    fs::create_dir_all(parent)?;
    let prefix: String = cache_name
      .chars()
      .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
      .collect();
    let dir = tempfile::Builder::new()
      .prefix(&format!("{}-", prefix))
      .tempdir_in(parent)?;
    debug!(cache = %cache_name, path = ?dir.path(), "opened disk tier");

    Ok(Self {
      dir: Some(dir),
      slots: HashMap::new(),
      order: LruList::new(),
      bound,
      next_file_id: 0,
    })
  }

  pub(crate) fn path(&self) -> Option<&Path> {
    self.dir.as_ref().map(TempDir::path)
  }

  fn file_path(&self, file_id: u64) -> io::Result<PathBuf> {
    match &self.dir {
      Some(dir) => Ok(dir.path().join(format!("{:016x}.bin", file_id))),
      None => Err(io::Error::new(io::ErrorKind::NotFound, "disk tier is closed")),
    }
  }

  fn over_bound(&self) -> bool {
    match self.bound {
      DiskBound::Entries(max) => self.order.len() as u64 > max,
      DiskBound::Bytes(max) => self.order.total_weight() > max,
    }
  }

  pub(crate) fn contains(&self, key: &K) -> bool {
    self.slots.contains_key(key)
  }

  pub(crate) fn len(&self) -> usize {
    self.slots.len()
  }

  /// Bytes currently written to the tier.
  pub(crate) fn size_bytes(&self) -> u64 {
    self.order.total_weight()
  }

  /// Writes `bytes` for `key`, returning the keys pushed out of the tier to honour its bound.
  ///
  /// On a write error nothing is stored and any previous copy of `key` is gone.
  pub(crate) fn write(&mut self, key: K, bytes: &[u8], timestamps: Timestamps) -> io::Result<Vec<K>> {
    self.remove(&key);

    let file_id = self.next_file_id;
    self.next_file_id += 1;
    fs::write(self.file_path(file_id)?, bytes)?;

    self.order.push_front(key.clone(), bytes.len() as u64);
    self.slots.insert(key, DiskSlot { file_id, timestamps });

    let mut evicted = Vec::new();
    while self.over_bound() {
      let Some((victim, _)) = self.order.pop_back() else {
        break;
      };
      self.delete_slot(&victim);
      evicted.push(victim);
    }
    Ok(evicted)
  }

  /// Removes `key` from the tier and returns its bytes and timestamps.
  pub(crate) fn take(&mut self, key: &K) -> Option<io::Result<(Vec<u8>, Timestamps)>> {
    let slot = self.slots.remove(key)?;
    self.order.remove(key);

    let result = self.file_path(slot.file_id).and_then(|path| {
      let bytes = fs::read(&path)?;
      if let Err(e) = fs::remove_file(&path) {
        warn!(path = ?path, error = %e, "failed to delete disk entry after reading it");
      }
      Ok(bytes)
    });
    Some(result.map(|bytes| (bytes, slot.timestamps)))
  }

  pub(crate) fn expiration(&self, key: &K, tti: Option<Duration>) -> Option<Expiration> {
    self
      .slots
      .get(key)
      .and_then(|slot| slot.timestamps.expiration(tti))
  }

  /// Keys whose entries have expired.
  pub(crate) fn expired_keys(&self, tti: Option<Duration>) -> Vec<(K, Expiration)> {
    self
      .slots
      .iter()
      .filter_map(|(key, slot)| {
        slot
          .timestamps
          .expiration(tti)
          .map(|expiration| (key.clone(), expiration))
      })
      .collect()
  }

  pub(crate) fn remove(&mut self, key: &K) -> bool {
    if self.order.remove(key).is_some() {
      self.delete_slot(key);
      true
    } else {
      false
    }
  }

  fn delete_slot(&mut self, key: &K) {
    if let Some(slot) = self.slots.remove(key) {
      if let Ok(path) = self.file_path(slot.file_id) {
        if let Err(e) = fs::remove_file(&path) {
          warn!(path = ?path, error = %e, "failed to delete disk entry");
        }
      }
    }
  }

  /// Drops every entry and deletes the directory. Idempotent.
  pub(crate) fn close(&mut self) {
    self.slots.clear();
    self.order.clear();
    if let Some(dir) = self.dir.take() {
      let path = dir.path().to_path_buf();
      if let Err(e) = dir.close() {
        warn!(path = ?path, error = %e, "failed to remove disk tier directory");
      }
    }
  }
}

#[cfg(test)]
mod test {
  use super::*;

  #[test]
  fn write_take_round_trip() {
    let parent = tempfile::tempdir().unwrap();
    let mut tier = DiskTier::open(parent.path(), "arrays", DiskBound::Entries(10)).unwrap();

    tier.write(1u32, b"hello", Timestamps::new(None, None)).unwrap();
    assert!(tier.contains(&1));
    assert_eq!(tier.size_bytes(), 5);

    let (bytes, _) = tier.take(&1).unwrap().unwrap();
    assert_eq!(bytes, b"hello");
    assert!(!tier.contains(&1));
    assert!(tier.take(&1).is_none());
  }

  #[test]
  fn entry_bound_evicts_least_recent() {
    let parent = tempfile::tempdir().unwrap();
    let mut tier = DiskTier::open(parent.path(), "c", DiskBound::Entries(2)).unwrap();
    assert!(tier.write(1u32, b"a", Timestamps::new(None, None)).unwrap().is_empty());
    assert!(tier.write(2, b"b", Timestamps::new(None, None)).unwrap().is_empty());
    assert_eq!(tier.write(3, b"c", Timestamps::new(None, None)).unwrap(), vec![1]);
    assert_eq!(tier.len(), 2);
  }

  #[test]
  fn byte_bound_counts_written_bytes() {
    let parent = tempfile::tempdir().unwrap();
    let mut tier = DiskTier::open(parent.path(), "c", DiskBound::Bytes(8)).unwrap();
    tier.write(1u32, b"aaaa", Timestamps::new(None, None)).unwrap();
    tier.write(2, b"bbbb", Timestamps::new(None, None)).unwrap();
    assert_eq!(tier.write(3, b"cc", Timestamps::new(None, None)).unwrap(), vec![1]);
    assert_eq!(tier.size_bytes(), 6);
  }

  #[test]
  fn close_deletes_directory() {
    let parent = tempfile::tempdir().unwrap();
    let mut tier = DiskTier::open(parent.path(), "c", DiskBound::Entries(2)).unwrap();
    tier.write(1u32, b"a", Timestamps::new(None, None)).unwrap();
    let path = tier.path().unwrap().to_path_buf();
    assert!(path.exists());

    tier.close();
    tier.close();
    assert!(!path.exists());
    assert!(tier.write(2, b"b", Timestamps::new(None, None)).is_err());
  }
}
