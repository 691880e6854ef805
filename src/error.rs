//! Crate-level error types for the journal, the store, and projections.

use std::io;

use crate::entry::Index;
use crate::event::Guid;

/// Error returned by journal writes, reads and replay.
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// The offered entry does not extend the journal's tip.
    ///
    /// Recoverable: the caller can fetch the entries after `tip` and retry.
    /// Journal state is untouched.
    #[error("missing parent: entry {index} names parent {parent} but the tip is {tip}")]
    MissingParent {
        /// Index of the rejected entry.
        index: Index,
        /// Parent index the rejected entry declared.
        parent: Index,
        /// The journal's tip at the time of rejection.
        tip: Index,
    },

    /// Disk I/O failure while persisting or reading entries.
    ///
    /// Fatal to the current call only; the tip has not moved and observers
    /// were not notified.
    #[error("persistence failure: {0}")]
    Persistence(#[from] io::Error),

    /// The key/value backend rejected a read or write.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    /// A persisted record could not be decoded.
    #[error("undecodable entry at {location}: {source}")]
    Decode {
        /// Where the record lives (byte offset or store key).
        location: String,
        #[source]
        source: DecodeError,
    },

    /// No entry is stored at the requested index.
    #[error("entry {0} not found")]
    NotFound(Index),

    /// Replay was requested on a journal that already holds entries.
    #[error("journal already primed up to {tip}; replay needs an empty journal")]
    AlreadyPrimed {
        /// The tip at the time replay was requested.
        tip: Index,
    },

    /// The backend holds entries the journal has not replayed yet, so its
    /// tip is not known. Call [`Journal::replay`](crate::Journal::replay)
    /// before writing.
    #[error("journal has persisted entries that were not replayed")]
    NotPrimed,

    /// The backend already holds an entry at this index. Persisted entries
    /// are never overwritten.
    #[error("entry {0} is already persisted")]
    AlreadyPersisted(Index),

    /// The index space is exhausted.
    #[error("index overflow after {0}")]
    IndexOverflow(Index),
}

impl JournalError {
    /// Returns `true` for the recoverable ordering error.
    pub fn is_missing_parent(&self) -> bool {
        matches!(self, JournalError::MissingParent { .. })
    }
}

/// Error returned by [`Store`](crate::Store) implementations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No value is stored under the key.
    #[error("key not found")]
    NotFound,

    /// A composite key was used before all of its parts were bound.
    #[error("incomplete key: {bound} of {arity} parts bound")]
    IncompleteKey {
        /// Number of parts bound so far.
        bound: usize,
        /// Number of parts the key requires.
        arity: usize,
    },
}

/// Error decoding an entry record or an event envelope.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// The record names an index that cannot hold an entry.
    #[error("invalid entry index {0}")]
    InvalidIndex(u64),

    /// The record ended before its terminating newline.
    #[error("record is missing its terminating newline")]
    Unterminated,
}

/// An event that the addressed aggregate cannot accept in its current state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition: {topic} on {guid}: {reason}")]
pub struct TransitionError {
    /// Topic of the rejected event.
    pub topic: String,
    /// The aggregate the event addressed.
    pub guid: Guid,
    /// Why the aggregate refused it.
    pub reason: String,
}

/// Error returned by the aggregate repository.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// No aggregate has been projected for this guid.
    #[error("aggregate {0} not found")]
    NotFound(Guid),

    /// An event addressed an aggregate that cannot accept it.
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),

    /// The entry payload is not a decodable event.
    #[error("undecodable event: {0}")]
    Decode(#[from] DecodeError),

    /// The backing store failed.
    #[error("store failure: {0}")]
    Store(#[from] StoreError),

    /// A projected aggregate could not be (de)serialized.
    #[error("projection serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),
}

/// Error returned by [`InstanceService`](crate::InstanceService) writes.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// The event could not be encoded.
    #[error("event encoding failed: {0}")]
    Encode(#[source] serde_json::Error),
}

impl ServiceError {
    /// Returns `true` when the addressed instance does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ServiceError::Repository(RepositoryError::NotFound(_))
                | ServiceError::Repository(RepositoryError::InvalidTransition(_))
        )
    }
}
