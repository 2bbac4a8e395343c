//! Store facade: fetch coordination, optimistic mutations, lookup, search
//! and invalidation.

use chrono::Utc;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::cache::EntityCache;
use crate::config::{SortOrder, StoreConfig};
use crate::error::{RemoteError, StoreError};
use crate::gateway::RecordGateway;
use crate::persist::{NoopPersist, PersistBackend, Snapshot};
use crate::record::{is_temp_id, temp_id, Record};
use crate::staleness::StalenessPolicy;
use crate::view::CollectionView;

/// Mutable store state guarded by a single lock.
///
/// The cache map, the collection view and the flight slot are updated
/// together and must never be observed half-updated, so one mutex covers
/// all three. The lock is never held across an await; every remote call
/// happens between two lock scopes.
struct StoreState<E> {
  cache: EntityCache<E>,
  view: Option<CollectionView<E>>,
  flight: Option<Flight>,
}

/// An in-flight full-collection fetch.
struct Flight {
  scope: String,
  done: watch::Receiver<FlightOutcome>,
}

/// How an in-flight fetch settled, broadcast to waiting callers.
#[derive(Debug, Clone, PartialEq, Eq)]
enum FlightOutcome {
  Pending,
  Success,
  Failed(RemoteError),
}

enum FetchDecision<E> {
  /// The held collection is fresh; serve it without a remote call.
  Fresh(Vec<E>),
  /// Another fetch is in flight; await its outcome.
  Wait {
    scope_matches: bool,
    done: watch::Receiver<FlightOutcome>,
  },
  /// This call owns the flight slot and performs the remote fetch.
  Start(watch::Sender<FlightOutcome>),
}

/// The public operation surface over the record cache.
///
/// Composes the bounded cache, the staleness policy, the fetch coordinator
/// and the optimistic mutation engine. External collaborators never touch
/// the cache or the view directly; all mutation goes through these
/// operations.
pub struct RecordStore<E, G> {
  gateway: G,
  persist: Box<dyn PersistBackend<E>>,
  staleness: StalenessPolicy,
  sort: SortOrder,
  state: Mutex<StoreState<E>>,
}

impl<E: Record, G: RecordGateway<E>> RecordStore<E, G> {
  /// Create a store with no persistence.
  pub fn new(gateway: G, config: &StoreConfig) -> Self {
    Self {
      gateway,
      persist: Box::new(NoopPersist),
      staleness: StalenessPolicy::new(config.stale_after()),
      sort: config.sort,
      state: Mutex::new(StoreState {
        cache: EntityCache::new(config.cache_capacity),
        view: None,
        flight: None,
      }),
    }
  }

  /// Create a store backed by a persistence port.
  ///
  /// Any persisted snapshot is loaded eagerly and the record cache is
  /// rebuilt from the persisted collection.
  pub fn with_persistence(
    gateway: G,
    config: &StoreConfig,
    persist: Box<dyn PersistBackend<E>>,
  ) -> Result<Self, StoreError> {
    let snapshot = persist.load()?;
    let mut store = Self::new(gateway, config);
    store.persist = persist;

    if let Some(snapshot) = snapshot {
      let state = store.state.get_mut().map_err(|_| StoreError::LockPoisoned)?;
      let records: Vec<E> = snapshot
        .records
        .into_iter()
        .map(|(_, record)| record)
        .collect();
      for record in &records {
        state.cache.put(record.clone());
      }
      let mut view = CollectionView::empty(&snapshot.scope);
      view.replace_all(records);
      view.last_fetch_at = snapshot.last_fetch_at;
      view.expected_count = Some(view.len());
      state.view = Some(view);
    }

    Ok(store)
  }

  /// The gateway this store calls into.
  pub fn gateway(&self) -> &G {
    &self.gateway
  }

  /// Fetch the collection for `scope`.
  ///
  /// Serves from memory when the held collection is fresh. At most one
  /// remote `fetch_list` is in flight at a time; overlapping calls await
  /// that flight and observe its outcome instead of issuing their own
  /// call. With `force_refresh` the staleness check is skipped and a fresh
  /// fetch always runs, after any in-flight one settles.
  pub async fn fetch(&self, scope: &str, force_refresh: bool) -> Result<Vec<E>, StoreError> {
    loop {
      let decision = {
        let mut state = self.state()?;
        let (held_scope, last_fetch_at) = match &state.view {
          Some(view) => (Some(view.scope.clone()), view.last_fetch_at),
          None => (None, None),
        };

        if let Some(flight) = &state.flight {
          FetchDecision::Wait {
            scope_matches: flight.scope == scope,
            done: flight.done.clone(),
          }
        } else if !force_refresh
          && !self
            .staleness
            .should_refetch(held_scope.as_deref(), last_fetch_at, scope, Utc::now())
        {
          // should_refetch is false only when the held view is this scope's
          debug!(%scope, "serving collection from memory");
          let entities = state
            .view
            .as_ref()
            .map(|view| view.entities().to_vec())
            .unwrap_or_default();
          FetchDecision::Fresh(entities)
        } else {
          let (tx, rx) = watch::channel(FlightOutcome::Pending);
          state.flight = Some(Flight {
            scope: scope.to_string(),
            done: rx,
          });
          FetchDecision::Start(tx)
        }
      };

      match decision {
        FetchDecision::Fresh(entities) => return Ok(entities),

        FetchDecision::Wait {
          scope_matches,
          mut done,
        } => {
          if done.changed().await.is_err() {
            // The owning call vanished without settling; release the slot
            // so someone can take over.
            let mut state = self.state()?;
            let stuck = state
              .flight
              .as_ref()
              .is_some_and(|flight| flight.done.has_changed().is_err());
            if stuck {
              state.flight = None;
            }
            continue;
          }

          let outcome = done.borrow().clone();
          if scope_matches && !force_refresh {
            match outcome {
              FlightOutcome::Success => {
                let state = self.state()?;
                if let Some(view) = &state.view {
                  if view.scope == scope {
                    return Ok(view.entities().to_vec());
                  }
                }
                // The view moved on to another scope already; try again.
              }
              FlightOutcome::Failed(err) => return Err(err.into()),
              FlightOutcome::Pending => {}
            }
          }
          // Forced refresh, a different scope, or a superseded view: take
          // the slot on the next pass.
        }

        FetchDecision::Start(tx) => {
          let result = self.gateway.fetch_list(scope).await;

          let (outcome, settled) = {
            let mut state = self.state()?;
            state.flight = None;

            match result {
              Ok(mut entities) => {
                self.sort_entities(&mut entities);
                let now = Utc::now();
                for entity in &entities {
                  state.cache.put(entity.clone());
                }
                let mut view = CollectionView::empty(scope);
                view.replace_all(entities);
                view.mark_synced(now);
                let list = view.entities().to_vec();
                state.view = Some(view);
                self.save_checkpoint(&state);
                (FlightOutcome::Success, Ok(list))
              }
              Err(err) => {
                debug!(%scope, error = %err, "collection fetch failed; keeping previous view");
                (FlightOutcome::Failed(err.clone()), Err(err.into()))
              }
            }
          };

          let _ = tx.send(outcome);
          return settled;
        }
      }
    }
  }

  /// Create a record optimistically.
  ///
  /// The provisional record is visible at the front of the view from the
  /// moment this call first suspends; the gateway result replaces it
  /// (success) or removes it (failure) before the returned future
  /// resolves. On failure no trace of the temporary id survives.
  pub async fn create(&self, scope: &str, draft: &E::Draft) -> Result<E, StoreError> {
    let now = Utc::now();
    let temp = temp_id(now);
    let provisional = E::from_draft(scope, draft, temp.clone(), now);

    {
      let mut state = self.state()?;
      state.cache.put(provisional.clone());
      let view = state
        .view
        .get_or_insert_with(|| CollectionView::empty(scope));
      if view.scope == scope {
        view.insert_front(provisional);
        view.expected_count = Some(view.len());
      }
    }

    match self.gateway.insert(scope, draft).await {
      Ok(record) => {
        let mut state = self.state()?;
        state.cache.remove(&temp);
        state.cache.put(record.clone());
        if let Some(view) = state.view.as_mut() {
          if view.scope == scope {
            if !view.replace(&temp, record.clone()) {
              view.insert_front(record.clone());
            }
            Self::check_drift(view);
            view.mark_synced(Utc::now());
          }
        }
        self.save_checkpoint(&state);
        Ok(record)
      }
      Err(err) => {
        let mut state = self.state()?;
        state.cache.remove(&temp);
        if let Some(view) = state.view.as_mut() {
          if view.remove(&temp).is_some() {
            view.expected_count = Some(view.len());
          }
        }
        Err(err.into())
      }
    }
  }

  /// Update a record optimistically with a shallow-merged patch.
  ///
  /// A record unknown both to the view and the cache fails with
  /// [`StoreError::NotFound`] without a remote call. On remote failure the
  /// exact pre-mutation snapshot is restored.
  pub async fn update(&self, id: &str, patch: &E::Patch) -> Result<E, StoreError> {
    let now = Utc::now();

    let snapshot = {
      let mut state = self.state()?;
      let current = state.cache.get(id).cloned().or_else(|| {
        state
          .view
          .as_ref()
          .and_then(|view| view.find(id).cloned())
      });
      let Some(current) = current else {
        return Err(StoreError::NotFound { id: id.to_string() });
      };

      let provisional = current.apply_patch(patch, now);
      state.cache.put(provisional.clone());
      if let Some(view) = state.view.as_mut() {
        view.replace(id, provisional);
      }
      current
    };

    match self.gateway.update(id, patch).await {
      Ok(record) => {
        let mut state = self.state()?;
        state.cache.put(record.clone());
        if let Some(view) = state.view.as_mut() {
          if view.scope == record.owner() {
            if !view.replace(id, record.clone()) {
              // Lost a race against a delete of the same id; the later
              // settling call wins and the record comes back.
              warn!(%id, "update reconciliation reinstated a record missing from the view");
              view.insert_front(record.clone());
            }
            Self::check_drift(view);
            view.mark_synced(Utc::now());
          }
        }
        self.save_checkpoint(&state);
        Ok(record)
      }
      Err(err) => {
        let mut state = self.state()?;
        state.cache.put(snapshot.clone());
        if let Some(view) = state.view.as_mut() {
          view.replace(id, snapshot);
        }
        Err(err.into())
      }
    }
  }

  /// Delete a record optimistically.
  ///
  /// The record disappears from the view and the cache immediately; on
  /// remote failure it is reinserted at its original position.
  pub async fn delete(&self, id: &str) -> Result<(), StoreError> {
    let (from_view, from_cache) = {
      let mut state = self.state()?;
      let from_view = state.view.as_mut().and_then(|view| view.remove(id));
      let from_cache = state.cache.remove(id);
      if from_view.is_none() && from_cache.is_none() {
        return Err(StoreError::NotFound { id: id.to_string() });
      }
      if from_view.is_some() {
        if let Some(view) = state.view.as_mut() {
          view.expected_count = Some(view.len());
        }
      }
      (from_view, from_cache)
    };

    match self.gateway.delete(id).await {
      Ok(()) => {
        let mut state = self.state()?;
        if let Some(view) = state.view.as_mut() {
          Self::check_drift(view);
          view.expected_count = Some(view.len());
        }
        self.save_checkpoint(&state);
        Ok(())
      }
      Err(err) => {
        let mut state = self.state()?;
        if let Some((position, record)) = from_view {
          if let Some(view) = state.view.as_mut() {
            view.insert_at(position, record.clone());
            view.expected_count = Some(view.len());
          }
        }
        if let Some(record) = from_cache {
          state.cache.put(record);
        }
        Err(err.into())
      }
    }
  }

  /// Cache-first single-record lookup.
  ///
  /// A miss falls through to one `fetch_one` call whose result is cached.
  /// Absence both locally and remotely is [`StoreError::NotFound`].
  pub async fn get_by_id(&self, id: &str) -> Result<E, StoreError> {
    {
      let state = self.state()?;
      if let Some(record) = state.cache.get(id) {
        return Ok(record.clone());
      }
    }

    match self.gateway.fetch_one(id).await {
      Ok(record) => {
        let mut state = self.state()?;
        state.cache.put(record.clone());
        if let Some(view) = state.view.as_mut() {
          view.replace(id, record.clone());
        }
        Ok(record)
      }
      Err(RemoteError::NotFound { id }) => Err(StoreError::NotFound { id }),
      Err(err) => Err(err.into()),
    }
  }

  /// Full-text search.
  ///
  /// Tries the remote service first; on failure logs the error and falls
  /// back to a case-insensitive substring match over the cached
  /// collection's indexed fields. The fallback never fails.
  pub async fn search(&self, scope: &str, query: &str) -> Result<Vec<E>, StoreError> {
    match self.gateway.search(scope, query).await {
      Ok(records) => {
        let mut state = self.state()?;
        for record in &records {
          state.cache.put(record.clone());
        }
        Ok(records)
      }
      Err(err) => {
        warn!(%scope, error = %err, "remote search failed; filtering the cached collection");
        let state = self.state()?;
        let needle = query.to_lowercase();
        let matches = state
          .view
          .as_ref()
          .filter(|view| view.scope == scope)
          .map(|view| {
            view
              .entities()
              .iter()
              .filter(|record| {
                record
                  .search_text()
                  .iter()
                  .any(|field| field.to_lowercase().contains(&needle))
              })
              .cloned()
              .collect()
          })
          .unwrap_or_default();
        Ok(matches)
      }
    }
  }

  /// Drop staleness state.
  ///
  /// With a scope, only that scope's fetch timestamp is forgotten, so the
  /// next fetch goes remote. With no scope, the entire cache and the held
  /// view are cleared as well.
  pub fn invalidate(&self, scope: Option<&str>) -> Result<(), StoreError> {
    let mut state = self.state()?;
    match scope {
      Some(scope) => {
        if let Some(view) = state.view.as_mut() {
          if view.scope == scope {
            view.last_fetch_at = None;
          }
        }
      }
      None => {
        state.cache.clear();
        state.view = None;
      }
    }
    Ok(())
  }

  /// Entities of the currently held collection, if any.
  pub fn current_entities(&self) -> Result<Vec<E>, StoreError> {
    let state = self.state()?;
    Ok(
      state
        .view
        .as_ref()
        .map(|view| view.entities().to_vec())
        .unwrap_or_default(),
    )
  }

  /// Scope of the currently held collection.
  pub fn current_scope(&self) -> Result<Option<String>, StoreError> {
    let state = self.state()?;
    Ok(state.view.as_ref().map(|view| view.scope.clone()))
  }

  fn state(&self) -> Result<MutexGuard<'_, StoreState<E>>, StoreError> {
    self.state.lock().map_err(|_| StoreError::LockPoisoned)
  }

  fn sort_entities(&self, entities: &mut [E]) {
    match self.sort {
      SortOrder::Descending => entities.sort_by(|a, b| b.updated_at().cmp(&a.updated_at())),
      SortOrder::Ascending => entities.sort_by(|a, b| a.updated_at().cmp(&b.updated_at())),
    }
  }

  /// ConflictingState detection: a count that drifted from the list length
  /// means a remote change was missed. Logged, never fatal.
  fn check_drift(view: &CollectionView<E>) {
    if let Some(expected) = view.expected_count {
      if expected != view.len() {
        warn!(
          expected,
          actual = view.len(),
          scope = %view.scope,
          "collection count drifted; a remote change may have been missed"
        );
      }
    }
  }

  /// Best-effort snapshot save; failures are logged, never surfaced.
  /// Provisional records still awaiting confirmation are left out so a
  /// reload never resurrects a temp id.
  fn save_checkpoint(&self, state: &StoreState<E>) {
    let Some(view) = &state.view else { return };
    let snapshot = Snapshot {
      scope: view.scope.clone(),
      records: view
        .entities()
        .iter()
        .filter(|record| !is_temp_id(record.id()))
        .map(|record| (record.id().to_string(), record.clone()))
        .collect(),
      last_fetch_at: view.last_fetch_at,
    };
    if let Err(err) = self.persist.save(&snapshot) {
      warn!(error = %err, "failed to persist store snapshot");
    }
  }
}
