//! Wire messages
//!
//! On the wire every message is a JSON object of the form
//! `{"type": "get"|"on"|"off"|"ping"|"pong"|"update", "key"?: [..], "data"?: any}`.
//! [`RawMessage`] mirrors that loose shape; [`Message`] is the validated form
//! in which only `ping` and `pong` lack a key.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::key::Key;
use crate::error::ProtocolError;

/// Message kind, as carried in the `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Get,
    On,
    Off,
    Update,
    Ping,
    Pong,
}

impl MessageKind {
    /// Wire name of this kind
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Get => "get",
            MessageKind::On => "on",
            MessageKind::Off => "off",
            MessageKind::Update => "update",
            MessageKind::Ping => "ping",
            MessageKind::Pong => "pong",
        }
    }

    /// Parse a wire name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "get" => Some(MessageKind::Get),
            "on" => Some(MessageKind::On),
            "off" => Some(MessageKind::Off),
            "update" => Some(MessageKind::Update),
            "ping" => Some(MessageKind::Ping),
            "pong" => Some(MessageKind::Pong),
            _ => None,
        }
    }

    /// Whether messages of this kind must carry a key
    pub fn requires_key(self) -> bool {
        !matches!(self, MessageKind::Ping | MessageKind::Pong)
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unvalidated wire form of a message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Key>,

    /// `None` only when the field is absent; `"data": null` is `Some(Null)`
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Value>,
}

/// Wrap any present value, `null` included, so that only a missing field
/// falls back to the `None` default.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// A validated protocol message
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Request the current value of a key
    Get { key: Key },
    /// Add a key to the sender's watch list
    On { key: Key },
    /// Remove a key from the sender's watch list
    Off { key: Key },
    /// New value for a key. `data` is `None` when the field is absent,
    /// which in a server reply means the key has no value yet; a stored
    /// JSON `null` is `Some(Value::Null)`.
    Update { key: Key, data: Option<Value> },
    /// Liveness check (server to client)
    Ping,
    /// Liveness reply (client to server)
    Pong,
}

impl Message {
    /// Create an update message carrying a value
    pub fn update(key: Key, data: Value) -> Self {
        Message::Update {
            key,
            data: Some(data),
        }
    }

    /// Kind of this message
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Get { .. } => MessageKind::Get,
            Message::On { .. } => MessageKind::On,
            Message::Off { .. } => MessageKind::Off,
            Message::Update { .. } => MessageKind::Update,
            Message::Ping => MessageKind::Ping,
            Message::Pong => MessageKind::Pong,
        }
    }

    /// Key carried by this message, if its kind has one
    pub fn key(&self) -> Option<&Key> {
        match self {
            Message::Get { key }
            | Message::On { key }
            | Message::Off { key }
            | Message::Update { key, .. } => Some(key),
            Message::Ping | Message::Pong => None,
        }
    }

    /// Parse and validate a text frame
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let raw: RawMessage = serde_json::from_str(text)?;
        Message::try_from(raw)
    }

    /// Serialize to a text frame
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(&RawMessage::from(self.clone()))?)
    }
}

impl TryFrom<RawMessage> for Message {
    type Error = ProtocolError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        let name = raw.kind.ok_or(ProtocolError::MissingType)?;
        let kind =
            MessageKind::from_name(&name).ok_or_else(|| ProtocolError::UnknownType(name))?;

        if !kind.requires_key() {
            return Ok(match kind {
                MessageKind::Ping => Message::Ping,
                _ => Message::Pong,
            });
        }

        let key = raw.key.ok_or(ProtocolError::MissingKey(kind.as_str()))?;
        if key.is_empty() {
            return Err(ProtocolError::EmptyKey(kind.as_str()));
        }

        Ok(match kind {
            MessageKind::Get => Message::Get { key },
            MessageKind::On => Message::On { key },
            MessageKind::Off => Message::Off { key },
            _ => Message::Update {
                key,
                data: raw.data,
            },
        })
    }
}

impl From<Message> for RawMessage {
    fn from(message: Message) -> Self {
        let kind = Some(message.kind().as_str().to_string());
        match message {
            Message::Get { key } | Message::On { key } | Message::Off { key } => RawMessage {
                kind,
                key: Some(key),
                data: None,
            },
            Message::Update { key, data } => RawMessage {
                kind,
                key: Some(key),
                data,
            },
            Message::Ping | Message::Pong => RawMessage {
                kind,
                ..Default::default()
            },
        }
    }
}
