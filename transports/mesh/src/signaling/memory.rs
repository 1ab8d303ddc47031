//! In-process relay hub
//!
//! Behaves like a room server: a `join` answers with the current roster and
//! notifies everyone already present, messages are routed by target id and
//! broadcasts reach every other member of the room.

use super::protocol::{RelayInbound, RelayMessage, RelayOutbound};
use super::{RelayChannel, RelayInboundRx};
use crate::config::IceServer;
use crate::peer::PeerId;
use crate::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

type Members = HashMap<PeerId, mpsc::UnboundedSender<RelayInbound>>;

#[derive(Default)]
struct HubState {
    rooms: HashMap<String, Members>,
    relay_servers: Option<Vec<IceServer>>,
}

/// Shared in-process relay
#[derive(Clone, Default)]
pub struct MemoryRelayHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryRelayHub {
    /// Create a hub without transport-relay servers
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a hub that hands `servers` out in every `ready` frame
    pub fn with_relay_servers(servers: Vec<IceServer>) -> Self {
        Self {
            state: Arc::new(Mutex::new(HubState {
                rooms: HashMap::new(),
                relay_servers: Some(servers),
            })),
        }
    }

    /// Open a new channel to the hub
    pub fn connect(&self) -> (Arc<MemoryRelay>, RelayInboundRx) {
        let (tx, rx) = mpsc::unbounded_channel();
        let relay = MemoryRelay {
            state: Arc::clone(&self.state),
            tx,
            membership: Mutex::new(None),
        };
        (Arc::new(relay), rx)
    }

    /// Ids currently joined to `room`
    pub async fn members(&self, room: &str) -> Vec<PeerId> {
        self.state
            .lock()
            .await
            .rooms
            .get(room)
            .map(|members| members.keys().cloned().collect())
            .unwrap_or_default()
    }
}

/// One participant's channel to a [`MemoryRelayHub`]
pub struct MemoryRelay {
    state: Arc<Mutex<HubState>>,
    tx: mpsc::UnboundedSender<RelayInbound>,
    membership: Mutex<Option<(String, PeerId)>>,
}

impl MemoryRelay {
    async fn membership(&self) -> Result<(String, PeerId)> {
        self.membership
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::SignalingError("not joined to a room".to_string()))
    }
}

#[async_trait]
impl RelayChannel for MemoryRelay {
    async fn send(&self, frame: RelayOutbound) -> Result<()> {
        match frame {
            RelayOutbound::Join { room, id } => {
                let mut state = self.state.lock().await;
                let relay_servers = state.relay_servers.clone();
                let members = state.rooms.entry(room.clone()).or_default();

                let roster: Vec<PeerId> = members.keys().cloned().collect();
                for member in members.values() {
                    let _ = member.send(RelayInbound::PeerJoined { id: id.clone() });
                }
                members.insert(id.clone(), self.tx.clone());

                debug!("{} joined room {} ({} already present)", id, room, roster.len());
                *self.membership.lock().await = Some((room, id));

                self.tx
                    .send(RelayInbound::Ready {
                        peers: roster,
                        relay_servers,
                    })
                    .map_err(|_| Error::SignalingError("receiver dropped".to_string()))
            }
            RelayOutbound::Message { to, kind, payload } => {
                let (room, from) = self.membership().await?;
                let state = self.state.lock().await;
                match state.rooms.get(&room).and_then(|members| members.get(&to)) {
                    Some(target) => {
                        let _ = target.send(RelayInbound::Message(RelayMessage {
                            from,
                            kind,
                            payload,
                        }));
                    }
                    None => debug!("Dropping {} message for absent peer {}", kind, to),
                }
                Ok(())
            }
            RelayOutbound::Broadcast { payload } => {
                let (room, from) = self.membership().await?;
                let state = self.state.lock().await;
                if let Some(members) = state.rooms.get(&room) {
                    for (id, member) in members {
                        if *id != from {
                            let _ = member.send(RelayInbound::Broadcast {
                                payload: payload.clone(),
                            });
                        }
                    }
                }
                Ok(())
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let membership = self.membership.lock().await.take();
        if let Some((room, id)) = membership {
            let mut state = self.state.lock().await;
            if let Some(members) = state.rooms.get_mut(&room) {
                members.remove(&id);
                if members.is_empty() {
                    state.rooms.remove(&room);
                }
            }
            debug!("{} left room {}", id, room);
        }
        Ok(())
    }
}
