//! Message types for MuxQ
//!
//! Defines the core Message struct and its wire envelope.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    /// Create a new random MessageId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message delivered on a channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier
    pub id: MessageId,

    /// Message body (raw bytes)
    pub body: Bytes,

    /// Custom attributes/headers
    #[serde(default)]
    pub attributes: HashMap<String, String>,

    /// When the message was created
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a new message with the given body
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            id: MessageId::new(),
            body: body.into(),
            attributes: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Add an attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Get the body as a string (if valid UTF-8)
    pub fn body_as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Encode into the wire envelope understood by [`Message::from_wire`]
    pub fn to_wire(&self) -> Result<Bytes, serde_json::Error> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    /// Decode a wire payload into a message.
    ///
    /// Payloads produced by [`Message::to_wire`] decode losslessly; any
    /// other payload becomes a fresh message carrying it as the opaque body,
    /// so the delivery path never fails on foreign bytes.
    pub fn from_wire(payload: Bytes) -> Self {
        match serde_json::from_slice(&payload) {
            Ok(message) => message,
            Err(_) => Self::new(payload),
        }
    }
}
