//! Error types for store operations.

use thiserror::Error;

/// Errors returned by the remote record service gateway.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
  /// The record does not exist upstream.
  #[error("record {id} not found upstream")]
  NotFound { id: String },

  /// The service could not be reached.
  #[error("record service unavailable: {message}")]
  Unavailable { message: String },

  /// The service rejected the request (validation, permissions, conflicts).
  #[error("record service rejected the request: {message}")]
  Rejected { message: String },
}

/// Errors surfaced by the store facade.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
  /// The record is absent both locally and remotely.
  #[error("record {id} not found")]
  NotFound { id: String },

  /// A gateway call failed. Any optimistic change has already been rolled
  /// back when this is returned from a mutation.
  #[error(transparent)]
  Remote(#[from] RemoteError),

  /// The persistence backend failed.
  #[error("persistence failed: {reason}")]
  Persist { reason: String },

  /// The configuration file is missing or malformed.
  #[error("invalid configuration: {reason}")]
  Config { reason: String },

  /// The store lock was poisoned by a panicking thread.
  #[error("store lock poisoned")]
  LockPoisoned,
}
