//! Trigger events: "an object landed in a watched container".

use serde::{Deserialize, Serialize};

/// At-least-once notification that `key` was created in `container`.
///
/// Storage notifications name these fields `bucket` and `name`; both spellings
/// are accepted when deserialising.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    #[serde(alias = "bucket")]
    pub container: String,
    #[serde(alias = "name")]
    pub key: String,
}

impl TriggerEvent {
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
        }
    }

    /// Parse a JSON trigger payload.
    ///
    /// Accepts the bare event object as well as an envelope carrying it under `data`
    /// (the shape cloud-event deliveries use).
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Payload {
            Envelope { data: TriggerEvent },
            Bare(TriggerEvent),
        }

        match serde_json::from_str::<Payload>(raw)? {
            Payload::Envelope { data } => Ok(data),
            Payload::Bare(event) => Ok(event),
        }
    }
}
