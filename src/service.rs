//! Write path for [`Instance`] aggregates.
//!
//! [`InstanceService`] turns create / update / remove requests into events,
//! appends them to the journal and reads the resulting projection back. It
//! is what an HTTP layer would sit on top of.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::error::{RepositoryError, ServiceError, TransitionError};
use crate::event::{Event, Guid};
use crate::instance::{Instance, InstanceEvent};
use crate::journal::Journal;
use crate::repository::Repository;
use crate::store::{MemoryStore, Store};

/// Creates, updates and removes instances on behalf of one owner.
///
/// The repository must be subscribed to the journal; writes rely on the
/// journal's synchronous notification to read their own result.
#[derive(Debug)]
pub struct InstanceService<S: Store = MemoryStore> {
    journal: Arc<Journal>,
    repository: Arc<Repository<Instance, S>>,
    owner_id: String,
}

impl<S: Store + 'static> InstanceService<S> {
    pub fn new(
        journal: Arc<Journal>,
        repository: Arc<Repository<Instance, S>>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            journal,
            repository,
            owner_id: owner_id.into(),
        }
    }

    pub fn journal(&self) -> &Arc<Journal> {
        &self.journal
    }

    pub fn repository(&self) -> &Arc<Repository<Instance, S>> {
        &self.repository
    }

    fn append(&self, guid: &Guid, event: &InstanceEvent) -> Result<(), ServiceError> {
        let payload = Event::from_domain(guid.clone(), event)
            .and_then(|envelope| envelope.encode())
            .map_err(ServiceError::Encode)?;
        let index = self.journal.append(payload)?;
        tracing::debug!(
            guid = %guid,
            topic = event.topic(),
            index = %index,
            "instance event appended"
        );
        Ok(())
    }

    fn require_existing(&self, guid: &Guid, topic: &str) -> Result<(), ServiceError> {
        if self.repository.contains(guid)? {
            return Ok(());
        }
        Err(RepositoryError::from(TransitionError {
            topic: topic.to_owned(),
            guid: guid.clone(),
            reason: "instance does not exist".to_owned(),
        })
        .into())
    }

    /// Create a new instance with a fresh UUID v4 id.
    ///
    /// # Returns
    ///
    /// The projected instance.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::Journal`] if the append fails.
    pub fn create(
        &self,
        kind: impl Into<String>,
        payload: Value,
    ) -> Result<Instance, ServiceError> {
        let guid = Guid::from(uuid::Uuid::new_v4().to_string());
        let now = Utc::now();
        let event = InstanceEvent::Created {
            owner_id: self.owner_id.clone(),
            kind: kind.into(),
            created: now,
            updated: now,
            payload,
        };
        self.append(&guid, &event)?;
        Ok(self.repository.get_by_guid(&guid)?)
    }

    /// Replace an instance's payload.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::InvalidTransition`] (wrapped) without
    /// appending anything if the instance does not exist.
    pub fn update(&self, id: &Guid, payload: Value) -> Result<Instance, ServiceError> {
        let event = InstanceEvent::Updated {
            updated: Utc::now(),
            payload,
        };
        self.require_existing(id, event.topic())?;
        self.append(id, &event)?;
        Ok(self.repository.get_by_guid(id)?)
    }

    /// Tombstone an instance. The record stays readable with
    /// `removed == true`.
    pub fn remove(&self, id: &Guid) -> Result<Instance, ServiceError> {
        let event = InstanceEvent::Removed {
            updated: Utc::now(),
        };
        self.require_existing(id, event.topic())?;
        self.append(id, &event)?;
        Ok(self.repository.get_by_guid(id)?)
    }

    pub fn get(&self, id: &Guid) -> Result<Instance, ServiceError> {
        Ok(self.repository.get_by_guid(id)?)
    }
}
