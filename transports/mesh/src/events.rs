//! Session event surface
//!
//! Every notification a session raises is a [`MeshEvent`] variant delivered
//! over a `tokio::sync::broadcast` channel; any number of subscribers may
//! listen.

use crate::media::MediaStream;
use crate::peer::PeerId;
use crate::signaling::RelayMessage;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// Notification raised by a mesh session
#[derive(Debug, Clone, PartialEq)]
pub enum MeshEvent {
    /// Roster and relay-server configuration applied
    Ready,

    /// A peer entered the registry
    PeerJoined(PeerId),

    /// Inbound media attached for a peer
    Stream {
        /// Sending peer
        peer_id: PeerId,
        /// Remote stream handle
        stream: Arc<MediaStream>,
    },

    /// Inbound application message
    Data {
        /// Sending peer
        peer_id: PeerId,
        /// Decoded payload
        payload: serde_json::Value,
    },

    /// A handle reached Connected
    Connect(PeerId),

    /// A handle reached Closed and the peer record was removed
    Close(PeerId),

    /// Relay-wide message, not interpreted by the session
    Broadcast(serde_json::Value),

    /// Point-to-point relay message of a non-negotiation kind
    Message(RelayMessage),
}

impl MeshEvent {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            MeshEvent::Ready => "ready",
            MeshEvent::PeerJoined(_) => "peer-joined",
            MeshEvent::Stream { .. } => "stream",
            MeshEvent::Data { .. } => "data",
            MeshEvent::Connect(_) => "connect",
            MeshEvent::Close(_) => "close",
            MeshEvent::Broadcast(_) => "broadcast",
            MeshEvent::Message(_) => "message",
        }
    }

    /// Peer the event concerns, if any
    pub fn peer_id(&self) -> Option<&PeerId> {
        match self {
            MeshEvent::PeerJoined(id) | MeshEvent::Connect(id) | MeshEvent::Close(id) => Some(id),
            MeshEvent::Stream { peer_id, .. } | MeshEvent::Data { peer_id, .. } => Some(peer_id),
            MeshEvent::Message(message) => Some(&message.from),
            MeshEvent::Ready | MeshEvent::Broadcast(_) => None,
        }
    }
}

/// Sending side of the event surface
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<MeshEvent>,
}

impl EventEmitter {
    /// Create an emitter buffering up to `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Deliver an event to every current subscriber
    pub fn emit(&self, event: MeshEvent) {
        trace!("Emitting {} event", event.name());
        // Err only means nobody is subscribed
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.tx.subscribe()
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
