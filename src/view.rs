//! Ordered collection view for the active scope.

use chrono::{DateTime, Utc};
use std::collections::HashSet;

use crate::record::Record;

/// The single current collection the store holds for a scope.
///
/// Entries are unique by id. `expected_count` is a drift-detection aid:
/// immediately after any successful fetch or mutation it equals
/// `entities.len()`; a mismatch observed later signals a missed
/// synchronization from another client.
#[derive(Debug, Clone)]
pub struct CollectionView<E> {
  pub scope: String,
  entities: Vec<E>,
  pub last_fetch_at: Option<DateTime<Utc>>,
  pub expected_count: Option<usize>,
}

impl<E: Record> CollectionView<E> {
  /// Create an empty view for `scope`, as on first use of a scope.
  pub fn empty(scope: &str) -> Self {
    Self {
      scope: scope.to_string(),
      entities: Vec::new(),
      last_fetch_at: None,
      expected_count: None,
    }
  }

  pub fn entities(&self) -> &[E] {
    &self.entities
  }

  pub fn len(&self) -> usize {
    self.entities.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entities.is_empty()
  }

  pub fn contains(&self, id: &str) -> bool {
    self.position(id).is_some()
  }

  pub fn position(&self, id: &str) -> Option<usize> {
    self.entities.iter().position(|e| e.id() == id)
  }

  pub fn find(&self, id: &str) -> Option<&E> {
    self.entities.iter().find(|e| e.id() == id)
  }

  /// Replace the whole list. Duplicate ids collapse to their first
  /// occurrence, so the view never holds two entries with one id.
  pub fn replace_all(&mut self, entities: Vec<E>) {
    let mut seen = HashSet::new();
    self.entities = entities
      .into_iter()
      .filter(|e| seen.insert(e.id().to_string()))
      .collect();
  }

  /// Insert at the front. Any existing entry with the same id is dropped
  /// first.
  pub fn insert_front(&mut self, record: E) {
    self.insert_at(0, record);
  }

  /// Insert at `index` (clamped to the list length). Any existing entry
  /// with the same id is dropped first.
  pub fn insert_at(&mut self, index: usize, record: E) {
    if let Some(pos) = self.position(record.id()) {
      self.entities.remove(pos);
    }
    let index = index.min(self.entities.len());
    self.entities.insert(index, record);
  }

  /// Replace the entry holding `id` in place, keeping its position. The
  /// replacement may carry a different id (temp id confirmed by the
  /// server); any other entry already holding that id is dropped so ids
  /// stay unique. Returns false if `id` is not in the view.
  pub fn replace(&mut self, id: &str, record: E) -> bool {
    if self.position(id).is_none() {
      return false;
    }
    let new_id = record.id().to_string();
    if new_id != id {
      if let Some(dup) = self.position(&new_id) {
        self.entities.remove(dup);
      }
    }
    match self.position(id) {
      Some(pos) => {
        self.entities[pos] = record;
        true
      }
      None => false,
    }
  }

  /// Remove the entry for `id`, returning it with its original position
  /// for rollback.
  pub fn remove(&mut self, id: &str) -> Option<(usize, E)> {
    let pos = self.position(id)?;
    Some((pos, self.entities.remove(pos)))
  }

  /// Record a successful synchronization with the remote service.
  pub fn mark_synced(&mut self, now: DateTime<Utc>) {
    self.last_fetch_at = Some(now);
    self.expected_count = Some(self.entities.len());
  }

  pub fn clear(&mut self) {
    self.entities.clear();
    self.last_fetch_at = None;
    self.expected_count = None;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::note::{Note, NoteDraft};
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

  fn ids(view: &CollectionView<Note>) -> Vec<&str> {
    view.entities().iter().map(|n| n.id.as_str()).collect()
  }

  #[test]
  fn replace_all_collapses_duplicate_ids() {
    let mut view = CollectionView::empty("u1");
    view.replace_all(vec![note("a"), note("b"), note("a")]);
    assert_eq!(ids(&view), vec!["a", "b"]);
  }

  #[test]
  fn insert_front_drops_existing_entry_with_same_id() {
    let mut view = CollectionView::empty("u1");
    view.replace_all(vec![note("a"), note("b")]);
    view.insert_front(note("b"));
    assert_eq!(ids(&view), vec!["b", "a"]);
  }

  #[test]
  fn replace_keeps_position_and_swaps_id() {
    let mut view = CollectionView::empty("u1");
    view.replace_all(vec![note("local-1-0"), note("b")]);

    assert!(view.replace("local-1-0", note("42")));
    assert_eq!(ids(&view), vec!["42", "b"]);
  }

  #[test]
  fn replace_with_already_present_id_stays_unique() {
    let mut view = CollectionView::empty("u1");
    view.replace_all(vec![note("local-1-0"), note("42")]);

    // The server confirmed the temp record under an id a concurrent fetch
    // already brought in. The list must end with a single "42".
    assert!(view.replace("local-1-0", note("42")));
    assert_eq!(ids(&view), vec!["42"]);
  }

  #[test]
  fn replace_missing_id_is_rejected() {
    let mut view = CollectionView::empty("u1");
    view.replace_all(vec![note("a")]);
    assert!(!view.replace("missing", note("x")));
    assert_eq!(ids(&view), vec!["a"]);
  }

  #[test]
  fn remove_reports_original_position() {
    let mut view = CollectionView::empty("u1");
    view.replace_all(vec![note("a"), note("b"), note("c")]);

    let (pos, removed) = view.remove("b").unwrap();
    assert_eq!(pos, 1);
    assert_eq!(removed.id, "b");

    view.insert_at(pos, removed);
    assert_eq!(ids(&view), vec!["a", "b", "c"]);
  }

  #[test]
  fn insert_at_clamps_out_of_range_positions() {
    let mut view = CollectionView::empty("u1");
    view.replace_all(vec![note("a")]);
    view.insert_at(10, note("b"));
    assert_eq!(ids(&view), vec!["a", "b"]);
  }

  #[test]
  fn mark_synced_sets_count_and_timestamp() {
    let mut view = CollectionView::empty("u1");
    view.replace_all(vec![note("a"), note("b")]);

    let now = Utc::now();
    view.mark_synced(now);
    assert_eq!(view.expected_count, Some(2));
    assert_eq!(view.last_fetch_at, Some(now));
  }
}
