//! Core trait for records managed by the store.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Trait for records the store can cache and mutate.
///
/// Implementors expose a unique id, the owning scope (e.g. a user id) and a
/// last-modified timestamp. The store treats every other field as opaque
/// payload data.
pub trait Record: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Payload for creating a new record. Fields the caller omits get defaults.
  type Draft: Clone + Send + Sync;

  /// Partial update applied over an existing record (shallow merge).
  type Patch: Clone + Send + Sync;

  /// Unique identifier for this record.
  fn id(&self) -> &str;

  /// The scope (owner) this record belongs to.
  fn owner(&self) -> &str;

  /// Last modification timestamp.
  fn updated_at(&self) -> DateTime<Utc>;

  /// Build a provisional record from a draft under a synthesized local id,
  /// filling defaults for anything the draft omits. Used for the optimistic
  /// insert before the remote call settles.
  fn from_draft(scope: &str, draft: &Self::Draft, temp_id: String, now: DateTime<Utc>) -> Self;

  /// Apply a patch over this record (shallow merge) and refresh the
  /// modification time.
  fn apply_patch(&self, patch: &Self::Patch, now: DateTime<Utc>) -> Self;

  /// Text fields scanned by the local search fallback.
  fn search_text(&self) -> Vec<&str>;

  /// Record type name for storage organization (e.g. "note").
  fn record_type() -> &'static str;
}

/// Prefix carried by locally synthesized ids. Server ids never use it, so a
/// provisional record can always be told apart from a confirmed one.
pub const LOCAL_ID_PREFIX: &str = "local-";

static LOCAL_ID_SEQ: AtomicU64 = AtomicU64::new(0);

/// Synthesize a temporary id for an optimistically created record.
///
/// Combines the creation timestamp with a process-wide counter so two
/// creates in the same millisecond still get distinct ids.
pub fn temp_id(now: DateTime<Utc>) -> String {
  let seq = LOCAL_ID_SEQ.fetch_add(1, Ordering::Relaxed);
  format!("{}{}-{}", LOCAL_ID_PREFIX, now.timestamp_millis(), seq)
}

/// Whether `id` was synthesized locally and never confirmed by the server.
pub fn is_temp_id(id: &str) -> bool {
  id.starts_with(LOCAL_ID_PREFIX)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn temp_ids_are_distinct() {
    let now = Utc::now();
    let a = temp_id(now);
    let b = temp_id(now);
    assert_ne!(a, b);
  }

  #[test]
  fn temp_ids_are_recognizable() {
    let id = temp_id(Utc::now());
    assert!(is_temp_id(&id));
    assert!(!is_temp_id("42"));
  }
}
