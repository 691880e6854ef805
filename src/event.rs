//! Event envelope carried in entry payloads.
//!
//! An entry payload is a JSON object `{"topic": .., "guid": .., "payload": ..}`.
//! Decoding the envelope only commits to `topic` and `guid`; the inner
//! payload stays an untyped [`serde_json::Value`] until the aggregate that
//! owns the topic decodes it. No I/O happens here.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::DecodeError;

/// Identifier of an aggregate instance.
///
/// A raw byte string. Equality, ordering and hashing are byte-wise, which
/// is also how repositories key their projections. Serialized as standard
/// base64.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Guid(Vec<u8>);

impl Guid {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Guid {
    fn from(value: &str) -> Self {
        Self(value.as_bytes().to_vec())
    }
}

impl From<String> for Guid {
    fn from(value: String) -> Self {
        Self(value.into_bytes())
    }
}

impl From<Vec<u8>> for Guid {
    fn from(value: Vec<u8>) -> Self {
        Self(value)
    }
}

impl From<&[u8]> for Guid {
    fn from(value: &[u8]) -> Self {
        Self(value.to_vec())
    }
}

// Text guids print as themselves; anything else as base64.
impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(text) => f.write_str(text),
            Err(_) => f.write_str(&STANDARD.encode(&self.0)),
        }
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({self})")
    }
}

impl Serialize for Guid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Guid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map(Guid)
            .map_err(serde::de::Error::custom)
    }
}

/// A decoded application-level event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Selects the handling logic (e.g. `"Created"`).
    pub topic: String,
    /// The aggregate instance the event applies to.
    pub guid: Guid,
    /// Topic-specific body, decoded by the owning aggregate.
    #[serde(default)]
    pub payload: Value,
}

impl Event {
    pub fn new(topic: impl Into<String>, guid: impl Into<Guid>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            guid: guid.into(),
            payload,
        }
    }

    /// Build an envelope from an adjacently tagged domain event.
    ///
    /// The domain event must serialize as `{"topic": .., "payload": ..}`
    /// (`#[serde(tag = "topic", content = "payload")]`). Unit variants carry
    /// a `null` payload.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if the event does not serialize to an
    /// object with a string `topic` field.
    pub fn from_domain<E: Serialize>(guid: impl Into<Guid>, event: &E) -> serde_json::Result<Self> {
        use serde::ser::Error as _;

        let value = serde_json::to_value(event)?;
        let Value::Object(mut object) = value else {
            return Err(serde_json::Error::custom(
                "domain event must serialize to a JSON object",
            ));
        };
        let topic = match object.remove("topic") {
            Some(Value::String(topic)) => topic,
            _ => {
                return Err(serde_json::Error::custom(
                    "domain event must carry a string `topic` tag",
                ));
            }
        };
        let payload = object.remove("payload").unwrap_or(Value::Null);

        Ok(Self {
            topic,
            guid: guid.into(),
            payload,
        })
    }

    /// Serialize the envelope into journal payload bytes.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Parse the envelope out of journal payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Json`] if the bytes are not an object with a
    /// string `topic` and a base64 `guid`.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
