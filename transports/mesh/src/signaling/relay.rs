//! Bridge between the relay channel and the orchestrator

use super::protocol::{MessageKind, RelayInbound, RelayOutbound};
use super::RelayChannel;
use crate::config::IceServer;
use crate::events::MeshEvent;
use crate::peer::PeerId;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, info};

/// Where an inbound relay frame has to go
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    /// Roster handshake for the orchestrator
    Roster {
        /// Peers present in the room, local id excluded
        peers: Vec<PeerId>,
        /// Transport-relay servers, if the relay sent any
        relay_servers: Option<Vec<IceServer>>,
    },

    /// Ad-hoc join notification for the orchestrator
    PeerJoined(PeerId),

    /// Negotiation payload for the orchestrator
    Negotiation {
        /// Sending peer
        from: PeerId,
        /// Opaque payload
        payload: serde_json::Value,
    },

    /// Event for subscribers, passed through untouched
    Surface(MeshEvent),

    /// Frame about ourselves, nothing to do
    Ignored,
}

/// Session side of the relay channel
#[derive(Clone)]
pub struct SignalingRelay {
    channel: Arc<dyn RelayChannel>,
    room: String,
    local_id: PeerId,
}

impl SignalingRelay {
    /// Bind a relay channel to `room` as `local_id`
    pub fn new(channel: Arc<dyn RelayChannel>, room: String, local_id: PeerId) -> Self {
        Self {
            channel,
            room,
            local_id,
        }
    }

    /// Room this relay is bound to
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Announce the local id to the room
    pub async fn announce(&self) -> Result<()> {
        info!("Joining room {} as {}", self.room, self.local_id);
        self.channel
            .send(RelayOutbound::Join {
                room: self.room.clone(),
                id: self.local_id.clone(),
            })
            .await
    }

    /// Forward a locally produced negotiation payload to `to`
    pub async fn forward_negotiation(&self, to: &PeerId, payload: serde_json::Value) -> Result<()> {
        debug!("Forwarding negotiation payload to {}", to);
        self.send_message(to, MessageKind::Negotiation, payload).await
    }

    /// Send a point-to-point message of any kind
    pub async fn send_message(
        &self,
        to: &PeerId,
        kind: MessageKind,
        payload: serde_json::Value,
    ) -> Result<()> {
        self.channel
            .send(RelayOutbound::Message {
                to: to.clone(),
                kind,
                payload,
            })
            .await
    }

    /// Send a room-wide message
    pub async fn broadcast(&self, payload: serde_json::Value) -> Result<()> {
        self.channel.send(RelayOutbound::Broadcast { payload }).await
    }

    /// Leave the room
    pub async fn close(&self) -> Result<()> {
        info!("Leaving room {}", self.room);
        self.channel.close().await
    }

    /// Classify an inbound frame
    pub fn route(&self, frame: RelayInbound) -> Routed {
        match frame {
            RelayInbound::Ready {
                peers,
                relay_servers,
            } => Routed::Roster {
                peers: peers
                    .into_iter()
                    .filter(|id| *id != self.local_id)
                    .collect(),
                relay_servers,
            },
            RelayInbound::PeerJoined { id } if id == self.local_id => Routed::Ignored,
            RelayInbound::PeerJoined { id } => Routed::PeerJoined(id),
            RelayInbound::Message(message) if message.from == self.local_id => Routed::Ignored,
            RelayInbound::Message(message) => match message.kind {
                MessageKind::Negotiation => Routed::Negotiation {
                    from: message.from,
                    payload: message.payload,
                },
                MessageKind::Other(_) => Routed::Surface(MeshEvent::Message(message)),
            },
            RelayInbound::Broadcast { payload } => Routed::Surface(MeshEvent::Broadcast(payload)),
        }
    }
}
