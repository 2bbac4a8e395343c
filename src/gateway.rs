//! Remote record service gateway contract.

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::record::Record;

/// The store's only boundary: request/response calls against the
/// authoritative record service.
///
/// Each call is a single round trip with no streaming and no partial
/// results. The store never retries a failed call; retry policy belongs to
/// the caller.
#[async_trait]
pub trait RecordGateway<E: Record>: Send + Sync {
  /// Fetch the full collection owned by `scope`.
  async fn fetch_list(&self, scope: &str) -> Result<Vec<E>, RemoteError>;

  /// Fetch a single record by id.
  async fn fetch_one(&self, id: &str) -> Result<E, RemoteError>;

  /// Insert a new record; the service assigns the real id.
  async fn insert(&self, scope: &str, draft: &E::Draft) -> Result<E, RemoteError>;

  /// Apply a partial update; returns the authoritative record.
  async fn update(&self, id: &str, patch: &E::Patch) -> Result<E, RemoteError>;

  /// Delete a record by id.
  async fn delete(&self, id: &str) -> Result<(), RemoteError>;

  /// Full-text search over the collection owned by `scope`.
  async fn search(&self, scope: &str, query: &str) -> Result<Vec<E>, RemoteError>;
}
