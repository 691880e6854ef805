//! A durable, strictly ordered journal and the aggregate projections built
//! on top of it.
//!
//! Writers [`append`](Journal::append) opaque payloads to a [`Journal`].
//! Every committed entry is handed synchronously to each subscribed
//! [`Observer`]; a [`Repository`] is the observer that decodes entries as
//! [`Event`]s and folds them into per-guid [`Aggregate`] state. On restart,
//! [`Journal::replay`] feeds the persisted log through the same path, so
//! projections rebuilt from disk equal the ones built live.

mod aggregate;
mod backend;
mod codec;
mod entry;
mod error;
mod event;
mod instance;
mod journal;
mod repository;
mod service;
mod store;

pub use aggregate::{Aggregate, decode_domain_event};
pub use backend::{FileBackend, JournalBackend, StoreBackend};
pub use codec::{ReadSummary, decode_record, encode_line, encode_record, read_lines};
pub use entry::{Entry, Index};
pub use error::{
    DecodeError, JournalError, RepositoryError, ServiceError, StoreError, TransitionError,
};
pub use event::{Event, Guid};
pub use instance::{Instance, InstanceEvent};
pub use journal::{Journal, JournalBuilder, Observer, Subscription};
pub use repository::{Applied, Projected, Repository};
pub use service::InstanceService;
pub use store::{Key, MemoryStore, PartialKey, Store};
