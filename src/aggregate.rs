//! Aggregate trait and topic-gated event decoding.

use serde::{Serialize, de::DeserializeOwned};

use crate::error::{DecodeError, TransitionError};
use crate::event::{Event, Guid};

/// Projected state of one entity, built by applying its events in journal
/// order.
///
/// The implementing type itself is the state. A zero value is produced by
/// the repository's factory for a guid it has never seen, then folded
/// through [`apply`](Aggregate::apply).
///
/// # Contract
///
/// - `DomainEvent` uses adjacently tagged serde,
///   `#[serde(tag = "topic", content = "payload")]`, so the envelope topic
///   selects the variant.
/// - [`TOPICS`](Aggregate::TOPICS) lists every topic the aggregate
///   understands. Events with other topics are skipped, not rejected, so an
///   older build can still replay a newer log.
/// - [`apply`](Aggregate::apply) must be deterministic and free of side
///   effects: replaying the same events must give identical state. Read
///   timestamps from the event, never from the clock.
pub trait Aggregate: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Identifies this aggregate kind (e.g. `"instance"`). Used as the first
    /// part of the repository's storage keys.
    const AGGREGATE_TYPE: &'static str;

    /// Topics this aggregate decodes.
    const TOPICS: &'static [&'static str];

    /// The set of events this aggregate applies.
    type DomainEvent: DeserializeOwned;

    /// Apply one event to produce the next state.
    ///
    /// `version` is the number of events already applied to this guid;
    /// `0` means `self` is a freshly constructed zero value.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError`] if the event is not valid for the
    /// current state (e.g. an update before the entity was created).
    fn apply(
        self,
        guid: &Guid,
        version: u64,
        event: &Self::DomainEvent,
    ) -> Result<Self, TransitionError>;
}

/// Decode the envelope's payload into `A::DomainEvent`.
///
/// The envelope's topic and payload are recombined into the adjacently
/// tagged form (`{"topic": .., "payload": ..}`) and handed to serde.
///
/// # Returns
///
/// - `Ok(None)` if the topic is not one of `A::TOPICS`.
/// - `Ok(Some(event))` if the topic is known and the payload fits it.
///
/// # Errors
///
/// Returns [`DecodeError::Json`] if the topic is known but the payload does
/// not match its shape.
pub fn decode_domain_event<A: Aggregate>(
    event: &Event,
) -> Result<Option<A::DomainEvent>, DecodeError> {
    if !A::TOPICS.contains(&event.topic.as_str()) {
        return Ok(None);
    }

    let tagged = if event.payload.is_null() {
        // Unit variant: just `{"topic": "Name"}`.
        serde_json::json!({ "topic": event.topic })
    } else {
        serde_json::json!({
            "topic": event.topic,
            "payload": event.payload,
        })
    };

    Ok(Some(serde_json::from_value(tagged)?))
}


#[cfg(test)]
mod tests {
    use super::test_fixtures::{Counter, CounterEvent};
    use super::*;
    use serde_json::json;

    #[test]
    fn known_topic_with_payload_decodes() {
        let event = Event::new("Added", "c-1", json!({"amount": 5}));
        let decoded = decode_domain_event::<Counter>(&event).expect("decode");
        assert_eq!(decoded, Some(CounterEvent::Added { amount: 5 }));
    }

    #[test]
    fn unit_topic_decodes_from_null_payload() {
        let event = Event::new("Incremented", "c-1", serde_json::Value::Null);
        let decoded = decode_domain_event::<Counter>(&event).expect("decode");
        assert_eq!(decoded, Some(CounterEvent::Incremented));
    }

    #[test]
    fn unknown_topic_is_skipped() {
        // A topic introduced by a newer writer must not break older readers.
        let event = Event::new("Renamed", "c-1", json!({"name": "x"}));
        assert_eq!(decode_domain_event::<Counter>(&event).expect("decode"), None);
    }

    #[test]
    fn malformed_known_topic_is_an_error() {
        let event = Event::new("Added", "c-1", json!({"amount": "five"}));
        let err = decode_domain_event::<Counter>(&event).unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn apply_on_zero_value_respects_version() {
        let guid = Guid::from("c-1");
        let err = Counter::default()
            .apply(&guid, 0, &CounterEvent::Incremented)
            .unwrap_err();
        assert_eq!(err.topic, "Incremented");

        let counter = Counter::default()
            .apply(&guid, 0, &CounterEvent::Opened)
            .and_then(|c| c.apply(&guid, 1, &CounterEvent::Added { amount: 4 }))
            .and_then(|c| c.apply(&guid, 2, &CounterEvent::Incremented))
            .expect("valid sequence");
        assert_eq!(counter.value, 5);
    }
}
