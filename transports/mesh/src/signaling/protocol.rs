//! Relay channel wire frames
//!
//! Frames are JSON objects tagged by `type`. Inbound frames (relay → session)
//! and outbound frames (session → relay) are separate enums so a session can
//! never emit a server-only frame.

use crate::config::IceServer;
use crate::peer::PeerId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Message kind used for negotiation payloads
pub const NEGOTIATION_KIND: &str = "negotiation";

/// Kind tag of a point-to-point relay message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    /// Connection-negotiation payload, consumed by the orchestrator
    Negotiation,
    /// Any other kind, surfaced to subscribers untouched
    Other(String),
}

impl MessageKind {
    /// Wire representation
    pub fn as_str(&self) -> &str {
        match self {
            MessageKind::Negotiation => NEGOTIATION_KIND,
            MessageKind::Other(kind) => kind,
        }
    }
}

impl From<String> for MessageKind {
    fn from(kind: String) -> Self {
        if kind == NEGOTIATION_KIND {
            MessageKind::Negotiation
        } else {
            MessageKind::Other(kind)
        }
    }
}

impl From<&str> for MessageKind {
    fn from(kind: &str) -> Self {
        MessageKind::from(kind.to_string())
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        match kind {
            MessageKind::Negotiation => NEGOTIATION_KIND.to_string(),
            MessageKind::Other(kind) => kind,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-to-point message delivered by the relay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    /// Sending peer
    #[serde(rename = "id")]
    pub from: PeerId,

    /// Message kind
    pub kind: MessageKind,

    /// Opaque payload
    pub payload: serde_json::Value,
}

/// Frame received from the relay channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayInbound {
    /// Handshake: room roster and optional transport-relay servers
    Ready {
        /// Peers already present in the room
        #[serde(default)]
        peers: Vec<PeerId>,
        /// Transport-relay servers to use for new handles
        #[serde(
            default,
            rename = "relayServers",
            skip_serializing_if = "Option::is_none"
        )]
        relay_servers: Option<Vec<IceServer>>,
    },

    /// Point-to-point message from another peer
    Message(RelayMessage),

    /// Room-wide message
    Broadcast {
        /// Opaque payload
        payload: serde_json::Value,
    },

    /// A peer joined the room after us
    PeerJoined {
        /// Joining peer
        id: PeerId,
    },
}

/// Frame sent to the relay channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RelayOutbound {
    /// Join `room` as `id`
    Join {
        /// Room name
        room: String,
        /// Local peer id
        id: PeerId,
    },

    /// Point-to-point message to `to`
    Message {
        /// Target peer
        #[serde(rename = "id")]
        to: PeerId,
        /// Message kind
        kind: MessageKind,
        /// Opaque payload
        payload: serde_json::Value,
    },

    /// Room-wide message
    Broadcast {
        /// Opaque payload
        payload: serde_json::Value,
    },
}

impl RelayInbound {
    /// Parse a frame from JSON
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to deserialize relay frame: {}", e))
        })
    }

    /// Convert frame to JSON
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to serialize relay frame: {}", e))
        })
    }

    /// Frame type name
    pub fn frame_type(&self) -> &'static str {
        match self {
            RelayInbound::Ready { .. } => "ready",
            RelayInbound::Message(_) => "message",
            RelayInbound::Broadcast { .. } => "broadcast",
            RelayInbound::PeerJoined { .. } => "peer-joined",
        }
    }
}

impl RelayOutbound {
    /// Convert frame to JSON
    pub fn to_json(&self) -> crate::Result<String> {
        serde_json::to_string(self).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to serialize relay frame: {}", e))
        })
    }

    /// Parse a frame from JSON
    pub fn from_json(json: &str) -> crate::Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            crate::Error::SerializationError(format!("Failed to deserialize relay frame: {}", e))
        })
    }
}
