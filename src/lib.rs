//! Client-side record store with optimistic mutations and staleness control.
//!
//! The store keeps a local, possibly-stale copy of records held by a remote
//! record service and keeps it consistent under concurrent reads, concurrent
//! in-flight fetches and speculative local writes the service may reject.
//!
//! - [`RecordStore`] is the operation surface collaborators call: fetch,
//!   create, update, delete, get-by-id, search, invalidate.
//! - [`RecordGateway`] is the request/response seam to the remote service.
//! - [`Record`] describes what the store needs from an entity; [`Note`] is
//!   the shipped implementation.
//! - [`PersistBackend`] is an optional port for snapshotting the held
//!   collection across process restarts.
//!
//! Mutations are optimistic: the local change is visible immediately, then
//! either confirmed with the authoritative record or rolled back to the
//! pre-mutation snapshot when the remote call fails.

pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod note;
pub mod persist;
pub mod record;
pub mod staleness;
pub mod store;
pub mod view;

pub use cache::EntityCache;
pub use config::{SortOrder, StoreConfig};
pub use error::{RemoteError, StoreError};
pub use gateway::RecordGateway;
pub use note::{Note, NoteDraft, NotePatch};
pub use persist::{NoopPersist, PersistBackend, Snapshot, SqlitePersist};
pub use record::Record;
pub use staleness::StalenessPolicy;
pub use store::RecordStore;
pub use view::CollectionView;
