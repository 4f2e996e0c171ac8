use std::collections::HashMap;
use std::hash::Hash;

use generational_arena::{Arena, Index};

#[derive(Debug)]
struct Link<K> {
  key: K,
  weight: u64,
  newer: Option<Index>,
  older: Option<Index>,
}

/// A weighted recency list: the front is the most recently used key, the back
/// the least.
///
/// Links live in a generational arena so relinking is O(1) without unsafe pointers.
#[derive(Debug)]
pub(crate) struct LruList<K: Eq + Hash + Clone> {
  links: Arena<Link<K>>,
  index: HashMap<K, Index>,
  front: Option<Index>,
  back: Option<Index>,
  total_weight: u64,
}

impl<K: Eq + Hash + Clone> Default for LruList<K> {
  fn default() -> Self {
    Self::new()
  }
}

impl<K: Eq + Hash + Clone> LruList<K> {
  pub(crate) fn new() -> Self {
    Self {
      links: Arena::new(),
      index: HashMap::new(),
      front: None,
      back: None,
      total_weight: 0,
    }
  }

  pub(crate) fn len(&self) -> usize {
    self.index.len()
  }

  pub(crate) fn total_weight(&self) -> u64 {
    self.total_weight
  }

  // Detaches a link from its neighbours, leaving it in the arena.
  fn detach(&mut self, at: Index) {
    let (newer, older) = {
      let link = &self.links[at];
      (link.newer, link.older)
    };
    match newer {
      Some(newer) => self.links[newer].older = older,
      None => self.front = older,
    }
    match older {
      Some(older) => self.links[older].newer = newer,
      None => self.back = newer,
    }
  }

  // Attaches a detached link at the front.
  fn attach_front(&mut self, at: Index) {
    let previous_front = self.front.replace(at);
    let link = &mut self.links[at];
    link.newer = None;
    link.older = previous_front;
    match previous_front {
      Some(previous) => self.links[previous].newer = Some(at),
      None => self.back = Some(at),
    }
  }

  /// Inserts `key` at the front, or moves it there and updates its weight.
  pub(crate) fn push_front(&mut self, key: K, weight: u64) {
    match self.index.get(&key).copied() {
      Some(at) => {
        let link = &mut self.links[at];
        self.total_weight = self.total_weight - link.weight + weight;
        link.weight = weight;
        self.detach(at);
        self.attach_front(at);
      }
      None => {
        let at = self.links.insert(Link {
          key: key.clone(),
          weight,
          newer: None,
          older: None,
        });
        self.index.insert(key, at);
        self.total_weight += weight;
        self.attach_front(at);
      }
    }
  }

  pub(crate) fn move_to_front(&mut self, key: &K) {
    if let Some(&at) = self.index.get(key) {
      if self.front != Some(at) {
        self.detach(at);
        self.attach_front(at);
      }
    }
  }

  /// Removes the least recently used key, returning it with its weight.
  pub(crate) fn pop_back(&mut self) -> Option<(K, u64)> {
    let back = self.back?;
    let key = self.links[back].key.clone();
    self.remove(&key).map(|weight| (key, weight))
  }

  /// Removes `key`, returning its weight.
  pub(crate) fn remove(&mut self, key: &K) -> Option<u64> {
    let at = self.index.remove(key)?;
    self.detach(at);
    let link = self.links.remove(at)?;
    self.total_weight -= link.weight;
    Some(link.weight)
  }

  pub(crate) fn clear(&mut self) {
    self.links.clear();
    self.index.clear();
    self.front = None;
    self.back = None;
    self.total_weight = 0;
  }

  #[cfg(test)]
  fn keys(&self) -> Vec<K> {
    let mut keys = Vec::with_capacity(self.len());
    let mut cursor = self.front;
    while let Some(at) = cursor {
      keys.push(self.links[at].key.clone());
      cursor = self.links[at].older;
    }
    keys
  }
}
