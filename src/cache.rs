//! Bounded in-memory record cache with oldest-first eviction.

use std::collections::HashMap;
use tracing::debug;

use crate::record::Record;

/// Default maximum number of cached entries.
pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Bounded id-to-record map.
///
/// Entries are stamped when inserted or refreshed; inserting past the
/// capacity evicts the entry with the oldest stamp, one at a time, until the
/// map is back at the bound. A plain `get` does not refresh an entry's
/// stamp: recency tracks writes, not reads.
///
/// Pure in-memory bookkeeping; there is no side channel to the remote
/// service.
#[derive(Debug)]
pub struct EntityCache<E> {
  capacity: usize,
  entries: HashMap<String, CacheEntry<E>>,
  stamp: u64,
}

#[derive(Debug)]
struct CacheEntry<E> {
  record: E,
  inserted_at: u64,
}

impl<E: Record> EntityCache<E> {
  /// Create a cache bounded to `capacity` entries (minimum 1).
  pub fn new(capacity: usize) -> Self {
    let capacity = capacity.max(1);
    Self {
      capacity,
      entries: HashMap::with_capacity(capacity),
      stamp: 0,
    }
  }

  /// Insert or refresh the entry for the record's id, marking it
  /// most-recently written. Evicts the oldest entries if the bound is
  /// exceeded.
  pub fn put(&mut self, record: E) {
    self.stamp += 1;
    self.entries.insert(
      record.id().to_string(),
      CacheEntry {
        record,
        inserted_at: self.stamp,
      },
    );

    while self.entries.len() > self.capacity {
      self.evict_oldest();
    }
  }

  /// Look up a record. Absence is a cache miss, not an error.
  pub fn get(&self, id: &str) -> Option<&E> {
    self.entries.get(id).map(|entry| &entry.record)
  }

  /// Remove and return the entry for `id`.
  pub fn remove(&mut self, id: &str) -> Option<E> {
    self.entries.remove(id).map(|entry| entry.record)
  }

  /// Drop every entry.
  pub fn clear(&mut self) {
    self.entries.clear();
    self.stamp = 0;
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn contains(&self, id: &str) -> bool {
    self.entries.contains_key(id)
  }

  fn evict_oldest(&mut self) {
    let oldest = self
      .entries
      .iter()
      .min_by_key(|(_, entry)| entry.inserted_at)
      .map(|(id, _)| id.clone());

    if let Some(id) = oldest {
      debug!(%id, "cache over capacity, evicting oldest entry");
      self.entries.remove(&id);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::note::{Note, NoteDraft};
  use crate::record::Record;
  use chrono::Utc;

  fn note(id: &str) -> Note {
    Note::from_draft(
      "u1",
      &NoteDraft {
        title: Some(format!("note {id}")),
        ..Default::default()
      },
      id.to_string(),
      Utc::now(),
    )
  }

  #[test]
  fn insert_past_capacity_evicts_first_inserted() {
    let capacity = 100;
    let mut cache = EntityCache::new(capacity);
    for i in 0..=capacity {
      cache.put(note(&i.to_string()));
    }

    assert_eq!(cache.len(), capacity);
    assert!(!cache.contains("0"));
    assert!(cache.contains("1"));
    assert!(cache.contains(&capacity.to_string()));
  }

  #[test]
  fn refresh_bumps_recency() {
    let mut cache = EntityCache::new(2);
    cache.put(note("a"));
    cache.put(note("b"));
    cache.put(note("a")); // refresh: "b" is now the oldest
    cache.put(note("c"));

    assert!(cache.contains("a"));
    assert!(!cache.contains("b"));
    assert!(cache.contains("c"));
  }

  #[test]
  fn get_does_not_bump_recency() {
    let mut cache = EntityCache::new(2);
    cache.put(note("a"));
    cache.put(note("b"));
    let _ = cache.get("a");
    cache.put(note("c"));

    // "a" was only read, so it is still the oldest entry.
    assert!(!cache.contains("a"));
    assert!(cache.contains("b"));
    assert!(cache.contains("c"));
  }

  #[test]
  fn remove_and_clear() {
    let mut cache = EntityCache::new(10);
    cache.put(note("a"));
    cache.put(note("b"));

    let removed = cache.remove("a");
    assert_eq!(removed.map(|n| n.id().to_string()), Some("a".to_string()));
    assert_eq!(cache.len(), 1);

    cache.clear();
    assert!(cache.is_empty());
  }

  #[test]
  fn get_miss_is_none() {
    let cache: EntityCache<Note> = EntityCache::new(10);
    assert!(cache.get("missing").is_none());
  }
}
