//! Aggregate repository: projects journal entries into per-guid state.
//!
//! A [`Repository`] is an [`Observer`]. For every entry it decodes the event
//! envelope, skips topics its aggregate does not own, loads the current
//! projection for the event's guid (or a zero value), applies the event and
//! stores the result under `[A::AGGREGATE_TYPE, guid]`.
//!
//! Because the journal feeds observers synchronously, a projection is
//! up to date as soon as `append` returns.

use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::aggregate::{Aggregate, decode_domain_event};
use crate::entry::{Entry, Index};
use crate::error::{RepositoryError, StoreError};
use crate::event::{Event, Guid};
use crate::journal::Observer;
use crate::store::{Key, MemoryStore, Store};

/// Stored form of one projected aggregate.
///
/// Serialized to JSON as `{ "guid", "version", "index", "state" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projected<A> {
    pub guid: Guid,
    /// Number of events applied to this guid.
    pub version: u64,
    /// Journal index of the last applied entry.
    pub index: Index,
    pub state: A,
}

/// Outcome of [`Repository::apply_entry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// The event was applied; `version` is the aggregate's new version.
    Updated { guid: Guid, version: u64 },
    /// The topic does not belong to this aggregate.
    Skipped { topic: String },
    /// The projection already reflects this entry (replay over a durable
    /// store).
    Stale { guid: Guid, index: Index },
}

/// Projects one aggregate type out of the journal into a [`Store`].
pub struct Repository<A: Aggregate, S: Store = MemoryStore> {
    store: S,
    factory: fn(&Guid) -> A,
    /// Serializes read-modify-write of projections.
    write: Mutex<()>,
}

impl<A: Aggregate, S: Store> std::fmt::Debug for Repository<A, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("aggregate_type", &A::AGGREGATE_TYPE)
            .finish_non_exhaustive()
    }
}

fn default_factory<A: Default>(_: &Guid) -> A {
    A::default()
}

impl<A: Aggregate + Default, S: Store> Repository<A, S> {
    /// Create a repository whose zero values are `A::default()`.
    pub fn new(store: S) -> Self {
        Self::with_factory(store, default_factory::<A>)
    }
}

impl<A: Aggregate, S: Store> Repository<A, S> {
    /// Create a repository with an explicit zero-value constructor.
    ///
    /// # Arguments
    ///
    /// * `store` - Where projections are kept.
    /// * `factory` - Builds the state an unseen guid starts from.
    pub fn with_factory(store: S, factory: fn(&Guid) -> A) -> Self {
        Self {
            store,
            factory,
            write: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn key(guid: &Guid) -> Result<Key, StoreError> {
        Key::composite(2)
            .bind(A::AGGREGATE_TYPE)
            .bind(guid.as_bytes())
            .complete()
    }

    fn load(&self, guid: &Guid) -> Result<Option<Projected<A>>, RepositoryError> {
        let bytes = match self.store.get(&Self::key(guid)?) {
            Ok(bytes) => bytes,
            Err(StoreError::NotFound) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(RepositoryError::Serialization)
    }

    /// Apply one journal entry to the projection it addresses.
    ///
    /// # Returns
    ///
    /// [`Applied::Updated`] with the new version,
    /// [`Applied::Skipped`] when the topic is not one of `A::TOPICS`, or
    /// [`Applied::Stale`] when the stored projection already includes this
    /// entry.
    ///
    /// # Errors
    ///
    /// - [`RepositoryError::Decode`] if the payload is not an event envelope
    ///   or a known topic carries a malformed payload.
    /// - [`RepositoryError::InvalidTransition`] if the aggregate rejects the
    ///   event. The stored projection is left untouched.
    /// - [`RepositoryError::Store`] / [`RepositoryError::Serialization`] if
    ///   the projection cannot be loaded or saved.
    pub fn apply_entry(&self, entry: &Entry) -> Result<Applied, RepositoryError> {
        let event = Event::decode(entry.payload())?;
        let Some(domain_event) = decode_domain_event::<A>(&event)? else {
            return Ok(Applied::Skipped { topic: event.topic });
        };
        let Event { topic, guid, .. } = event;

        let _guard = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        let (state, version) = match self.load(&guid)? {
            Some(current) if current.index >= entry.index() => {
                return Ok(Applied::Stale {
                    guid,
                    index: current.index,
                });
            }
            Some(current) => (current.state, current.version),
            None => ((self.factory)(&guid), 0),
        };

        let state = state.apply(&guid, version, &domain_event)?;
        let projected = Projected {
            guid,
            version: version + 1,
            index: entry.index(),
            state,
        };
        let bytes = serde_json::to_vec(&projected).map_err(RepositoryError::Serialization)?;
        self.store.put(&Self::key(&projected.guid)?, bytes)?;

        tracing::debug!(
            aggregate_type = A::AGGREGATE_TYPE,
            guid = %projected.guid,
            topic = %topic,
            version = projected.version,
            index = %entry.index(),
            "applied event"
        );
        Ok(Applied::Updated {
            guid: projected.guid,
            version: projected.version,
        })
    }

    /// The current state of `guid`.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::NotFound`] if no event for `guid` has been
    /// applied.
    pub fn get_by_guid(&self, guid: &Guid) -> Result<A, RepositoryError> {
        self.get_projected(guid).map(|projected| projected.state)
    }

    /// The current state of `guid` together with its version and index.
    pub fn get_projected(&self, guid: &Guid) -> Result<Projected<A>, RepositoryError> {
        self.load(guid)?
            .ok_or_else(|| RepositoryError::NotFound(guid.clone()))
    }

    pub fn contains(&self, guid: &Guid) -> Result<bool, RepositoryError> {
        Ok(self.load(guid)?.is_some())
    }

    /// Every projection of this aggregate type, ordered by guid bytes.
    pub fn all(&self) -> Result<Vec<Projected<A>>, RepositoryError> {
        self.store
            .scan(&Key::composite(2).bind(A::AGGREGATE_TYPE))?
            .into_iter()
            .map(|(_, bytes)| {
                serde_json::from_slice(&bytes).map_err(RepositoryError::Serialization)
            })
            .collect()
    }
}

impl<A: Aggregate, S: Store> Observer for Repository<A, S> {
    fn on_entry(&self, entry: &Entry) {
        match self.apply_entry(entry) {
            Ok(Applied::Updated { .. }) => {}
            Ok(Applied::Skipped { topic }) => {
                tracing::warn!(
                    aggregate_type = A::AGGREGATE_TYPE,
                    index = %entry.index(),
                    topic = %topic,
                    "skipping event with unknown topic"
                );
            }
            Ok(Applied::Stale { guid, index }) => {
                tracing::debug!(
                    aggregate_type = A::AGGREGATE_TYPE,
                    guid = %guid,
                    projected_index = %index,
                    index = %entry.index(),
                    "projection already up to date"
                );
            }
            Err(e) => {
                tracing::warn!(
                    aggregate_type = A::AGGREGATE_TYPE,
                    index = %entry.index(),
                    error = %e,
                    "failed to project entry"
                );
            }
        }
    }
}
