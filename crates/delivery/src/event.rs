//! Chat-platform events carried by the pipeline
//!
//! Events are produced by an upstream chat client and handed to the
//! [`DeliveryClient`](crate::DeliveryClient) untouched. The pipeline only
//! looks at the event type and routing key; the payload is opaque.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of lifecycle notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    MessageCreate,
    MessageUpdate,
    MessageDelete,
    MessageReactionAdd,
    MessageReactionRemove,
    ThreadCreate,
    ThreadDelete,
    ThreadUpdate,
}

impl EventType {
    /// All event types, in declaration order
    pub const ALL: [EventType; 8] = [
        EventType::MessageCreate,
        EventType::MessageUpdate,
        EventType::MessageDelete,
        EventType::MessageReactionAdd,
        EventType::MessageReactionRemove,
        EventType::ThreadCreate,
        EventType::ThreadDelete,
        EventType::ThreadUpdate,
    ];

    /// Wire name of the event type
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageCreate => "message_create",
            Self::MessageUpdate => "message_update",
            Self::MessageDelete => "message_delete",
            Self::MessageReactionAdd => "message_reaction_add",
            Self::MessageReactionRemove => "message_reaction_remove",
            Self::ThreadCreate => "thread_create",
            Self::ThreadDelete => "thread_delete",
            Self::ThreadUpdate => "thread_update",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown event type name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type: {0}")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

/// A single upstream event
///
/// On the wire the routing key is named `channelId`, which is what the
/// downstream tool expects; `routingKey` is accepted when reading events.
/// Payload fields are flattened next to the envelope fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub event_type: EventType,

    /// Partition key for rate limiting (the channel id)
    #[serde(rename = "channelId", alias = "routingKey")]
    pub routing_key: String,

    pub timestamp: DateTime<Utc>,

    #[serde(flatten)]
    payload: Map<String, Value>,
}

/// Envelope keys a payload field may not shadow
const RESERVED_FIELDS: [&str; 4] = ["eventType", "channelId", "routingKey", "timestamp"];

fn is_reserved(key: &str) -> bool {
    RESERVED_FIELDS.contains(&key)
}

impl Event {
    /// Create an event with an empty payload, timestamped now
    pub fn new(event_type: EventType, routing_key: impl Into<String>) -> Self {
        Self {
            event_type,
            routing_key: routing_key.into(),
            timestamp: Utc::now(),
            payload: Map::new(),
        }
    }

    /// Set the event timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Add a payload field
    ///
    /// Envelope keys (`eventType`, `channelId`, `routingKey`, `timestamp`)
    /// are ignored; set those through the constructor instead.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if !is_reserved(&key) {
            self.payload.insert(key, value.into());
        }
        self
    }

    /// Replace the whole payload, dropping any envelope keys
    pub fn with_payload(mut self, mut payload: Map<String, Value>) -> Self {
        payload.retain(|key, _| !is_reserved(key));
        self.payload = payload;
        self
    }

    /// Fields carried alongside the envelope
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }
}
