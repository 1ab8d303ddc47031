//! Peer tracking and connection orchestration
//!
//! Holds the registry of known peers and the state machine that decides
//! when, and in which role, a connection handle is built for each of them.

pub mod orchestrator;
pub mod registry;

pub use orchestrator::{Orchestrator, ReinitiationReport, SendStats};
pub use registry::{HandleSlot, PeerRecord, PeerRegistry};

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Opaque peer identifier, unique within a room
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Generate a random peer id (`peer-<uuid>`)
    pub fn generate() -> Self {
        Self(format!("peer-{}", uuid::Uuid::new_v4()))
    }

    /// Borrow as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for PeerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Role a connection handle was constructed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// No handle has been constructed
    #[default]
    Unset,
    /// Originates negotiation
    Initiator,
    /// Answers a remote initiator
    Responder,
}

/// Per-peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "role")]
pub enum PeerState {
    /// Announced, no handle yet
    Known,
    /// Handle constructed, negotiation in flight
    Connecting(Role),
    /// Transport acknowledged the link
    Connected,
    /// Handle torn down
    Closed,
}

/// Snapshot of a tracked peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Peer identifier
    pub peer_id: PeerId,

    /// Role of the current handle
    pub role: Role,

    /// Connection state
    pub state: PeerState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_are_unique() {
        let a = PeerId::generate();
        let b = PeerId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("peer-"));
    }

    #[test]
    fn test_peer_id_is_transparent_in_json() {
        let id = PeerId::from("alice");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"alice\"");
    }

    #[test]
    fn test_peer_state_serialization() {
        let json = serde_json::to_value(PeerState::Connecting(Role::Responder)).unwrap();
        assert_eq!(json["state"], "connecting");
        assert_eq!(json["role"], "responder");
    }
}
