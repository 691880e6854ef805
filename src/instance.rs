//! The built-in `Instance` aggregate: a typed, owned JSON document with
//! create / update / remove-as-tombstone semantics.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregate::Aggregate;
use crate::error::TransitionError;
use crate::event::Guid;

/// Projected state of one instance.
///
/// A removed instance keeps its last payload; `removed` is a tombstone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub owner_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub removed: bool,
    pub payload: Value,
}

/// Events applied to an [`Instance`].
///
/// Timestamps travel inside the events so replay reproduces them exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "topic", content = "payload")]
pub enum InstanceEvent {
    /// Initializes the instance, replacing any earlier record for the guid.
    Created {
        owner_id: String,
        #[serde(rename = "type")]
        kind: String,
        created: DateTime<Utc>,
        updated: DateTime<Utc>,
        payload: Value,
    },
    /// Replaces the payload of an existing instance.
    Updated {
        updated: DateTime<Utc>,
        payload: Value,
    },
    /// Marks an existing instance as removed.
    Removed { updated: DateTime<Utc> },
}

impl InstanceEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            InstanceEvent::Created { .. } => "Created",
            InstanceEvent::Updated { .. } => "Updated",
            InstanceEvent::Removed { .. } => "Removed",
        }
    }
}

impl Aggregate for Instance {
    const AGGREGATE_TYPE: &'static str = "instance";
    const TOPICS: &'static [&'static str] = &["Created", "Updated", "Removed"];

    type DomainEvent = InstanceEvent;

    fn apply(
        mut self,
        guid: &Guid,
        version: u64,
        event: &InstanceEvent,
    ) -> Result<Self, TransitionError> {
        match event {
            InstanceEvent::Created {
                owner_id,
                kind,
                created,
                updated,
                payload,
            } => Ok(Instance {
                id: guid.to_string(),
                owner_id: owner_id.clone(),
                kind: kind.clone(),
                created: *created,
                updated: *updated,
                removed: false,
                payload: payload.clone(),
            }),
            _ if version == 0 => Err(TransitionError {
                topic: event.topic().to_owned(),
                guid: guid.clone(),
                reason: "instance does not exist".to_owned(),
            }),
            InstanceEvent::Updated { updated, payload } => {
                self.updated = *updated;
                self.payload = payload.clone();
                Ok(self)
            }
            InstanceEvent::Removed { updated } => {
                self.updated = *updated;
                self.removed = true;
                Ok(self)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::decode_domain_event;
    use crate::event::Event;
    use chrono::TimeZone;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    fn created(payload: Value) -> InstanceEvent {
        InstanceEvent::Created {
            owner_id: "owner".to_owned(),
            kind: "note".to_owned(),
            created: at(10),
            updated: at(10),
            payload,
        }
    }

    #[test]
    fn created_initializes_from_the_guid() {
        let guid = Guid::from("g1");
        let instance = Instance::default()
            .apply(&guid, 0, &created(json!({"a": 1})))
            .expect("create");
        assert_eq!(instance.id, "g1");
        assert_eq!(instance.kind, "note");
        assert_eq!(instance.created, at(10));
        assert!(!instance.removed);
        assert_eq!(instance.payload, json!({"a": 1}));
    }

    #[test]
    fn update_and_remove_require_an_existing_instance() {
        let guid = Guid::from("g2");
        for event in [
            InstanceEvent::Updated {
                updated: at(20),
                payload: json!(null),
            },
            InstanceEvent::Removed { updated: at(20) },
        ] {
            let err = Instance::default().apply(&guid, 0, &event).unwrap_err();
            assert_eq!(err.topic, event.topic());
            assert_eq!(err.guid, guid);
        }
    }

    #[test]
    fn removal_is_a_tombstone_that_keeps_the_payload() {
        let guid = Guid::from("g1");
        let instance = Instance::default()
            .apply(&guid, 0, &created(json!({"a": 1})))
            .and_then(|i| {
                i.apply(
                    &guid,
                    1,
                    &InstanceEvent::Updated {
                        updated: at(20),
                        payload: json!({"a": 2}),
                    },
                )
            })
            .and_then(|i| i.apply(&guid, 2, &InstanceEvent::Removed { updated: at(30) }))
            .expect("valid sequence");

        assert!(instance.removed);
        assert_eq!(instance.payload, json!({"a": 2}));
        assert_eq!(instance.created, at(10));
        assert_eq!(instance.updated, at(30));
    }

    #[test]
    fn created_again_reinitializes() {
        let guid = Guid::from("g1");
        let instance = Instance::default()
            .apply(&guid, 0, &created(json!(1)))
            .and_then(|i| i.apply(&guid, 1, &InstanceEvent::Removed { updated: at(20) }))
            .and_then(|i| i.apply(&guid, 2, &created(json!(2))))
            .expect("valid sequence");
        assert!(!instance.removed);
        assert_eq!(instance.payload, json!(2));
    }

    #[test]
    fn instance_serializes_kind_as_type() {
        let instance = Instance {
            kind: "note".to_owned(),
            ..Instance::default()
        };
        let json = serde_json::to_value(&instance).expect("serialize");
        assert_eq!(json["type"], json!("note"));
        assert!(json.get("kind").is_none());
    }

    #[test]
    fn events_travel_through_the_envelope() {
        let event = created(json!({"body": "hi"}));
        let envelope = Event::from_domain("g1", &event).expect("encode");
        assert_eq!(envelope.topic, "Created");
        assert_eq!(envelope.payload["type"], json!("note"));

        let decoded = decode_domain_event::<Instance>(&envelope).expect("decode");
        assert_eq!(decoded, Some(event));
    }
}
