//! Mesh session
//!
//! A [`MeshSession`] is a cheap, cloneable handle to one session task. The
//! task owns the [`Orchestrator`] and serializes everything that touches it:
//! commands from the handle, inbound relay frames and handle events.

use crate::config::MeshConfig;
use crate::events::{EventEmitter, MeshEvent};
use crate::media::MediaStream;
use crate::peer::{Orchestrator, PeerId, PeerInfo, ReinitiationReport, SendStats};
use crate::signaling::{RelayChannel, RelayInboundRx, Routed, SignalingRelay, WebSocketRelay};
use crate::transport::{HandleEnvelope, PeerTransport};
use crate::{Error, Result};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

/// Request processed by the session task
enum Command {
    Initiate {
        peer_id: PeerId,
        reply: oneshot::Sender<Result<()>>,
    },
    ReinitiateAll {
        reply: oneshot::Sender<ReinitiationReport>,
    },
    SendToPeer {
        peer_id: PeerId,
        payload: serde_json::Value,
        reply: oneshot::Sender<Result<()>>,
    },
    SendToAll {
        payload: serde_json::Value,
        reply: oneshot::Sender<SendStats>,
    },
    Broadcast {
        payload: serde_json::Value,
        reply: oneshot::Sender<Result<()>>,
    },
    ListPeers {
        reply: oneshot::Sender<Vec<PeerId>>,
    },
    PeerInfo {
        peer_id: PeerId,
        reply: oneshot::Sender<Option<PeerInfo>>,
    },
    Peers {
        reply: oneshot::Sender<Vec<PeerInfo>>,
    },
    SetLocalStream {
        stream: Option<Weak<MediaStream>>,
        reply: oneshot::Sender<()>,
    },
    Destroy {
        reply: oneshot::Sender<Vec<Error>>,
    },
}

/// Handle to a running mesh session
///
/// Clones talk to the same session. The session is torn down by
/// [`MeshSession::destroy_session`], or once every clone has been dropped.
#[derive(Clone)]
pub struct MeshSession {
    local_id: PeerId,
    room: String,
    commands: mpsc::UnboundedSender<Command>,
    events: EventEmitter,
}

impl MeshSession {
    /// Connect to the WebSocket relay at `config.signaling_url` and start
    pub async fn connect(
        config: MeshConfig,
        transport: Arc<dyn PeerTransport>,
    ) -> Result<(Self, broadcast::Receiver<MeshEvent>)> {
        config.validate()?;
        let (relay, inbound) = WebSocketRelay::connect(&config.signaling_url).await?;
        Self::start(config, relay, inbound, transport).await
    }

    /// Start a session over an already open relay channel
    ///
    /// Announces the local id to `config.room` and spawns the session task.
    /// The returned receiver is subscribed before the announcement, so it
    /// observes the `Ready` event.
    pub async fn start(
        config: MeshConfig,
        relay: Arc<dyn RelayChannel>,
        inbound: RelayInboundRx,
        transport: Arc<dyn PeerTransport>,
    ) -> Result<(Self, broadcast::Receiver<MeshEvent>)> {
        config.validate()?;

        let local_id = config.resolve_peer_id();
        info!("Starting mesh session {} in room {}", local_id, config.room);

        let events = EventEmitter::new(config.event_capacity);
        let receiver = events.subscribe();

        let relay = SignalingRelay::new(relay, config.room.clone(), local_id.clone());
        relay.announce().await?;

        let (handle_tx, handle_rx) = mpsc::unbounded_channel();
        let orchestrator = Orchestrator::new(
            &config,
            local_id.clone(),
            transport,
            relay,
            events.clone(),
            handle_tx,
        );

        let (commands, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(
            orchestrator,
            events.clone(),
            command_rx,
            inbound,
            handle_rx,
        ));

        let session = Self {
            local_id,
            room: config.room,
            commands,
            events,
        };

        Ok((session, receiver))
    }

    /// Local peer id
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Room the session joined
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.events.subscribe()
    }

    /// Connect to `peer_id` as Initiator
    ///
    /// Upgrades an existing Responder link; no-op when already initiating.
    pub async fn initiate(&self, peer_id: impl Into<PeerId>) -> Result<()> {
        let peer_id = peer_id.into();
        self.request(|reply| Command::Initiate { peer_id, reply })
            .await?
    }

    /// Re-initiate every tracked peer
    pub async fn reinitiate_all(&self) -> Result<ReinitiationReport> {
        self.request(|reply| Command::ReinitiateAll { reply }).await
    }

    /// Send a JSON payload to one connected peer
    ///
    /// Fails with [`Error::UnknownPeerTarget`] when the peer has no connected
    /// handle; nothing is sent and the session is unaffected.
    pub async fn send_to_peer(
        &self,
        peer_id: impl Into<PeerId>,
        payload: serde_json::Value,
    ) -> Result<()> {
        let peer_id = peer_id.into();
        self.request(|reply| Command::SendToPeer {
            peer_id,
            payload,
            reply,
        })
        .await?
    }

    /// Send a JSON payload to every connected peer
    pub async fn send_to_all(&self, payload: serde_json::Value) -> Result<SendStats> {
        self.request(|reply| Command::SendToAll { payload, reply })
            .await
    }

    /// Send a room-wide message through the relay
    pub async fn broadcast(&self, payload: serde_json::Value) -> Result<()> {
        self.request(|reply| Command::Broadcast { payload, reply })
            .await?
    }

    /// Ids of every tracked peer, unordered
    pub async fn list_peers(&self) -> Result<Vec<PeerId>> {
        self.request(|reply| Command::ListPeers { reply }).await
    }

    /// Snapshot of one peer
    pub async fn peer_info(&self, peer_id: impl Into<PeerId>) -> Result<Option<PeerInfo>> {
        let peer_id = peer_id.into();
        self.request(|reply| Command::PeerInfo { peer_id, reply })
            .await
    }

    /// Snapshot of every tracked peer
    pub async fn peers(&self) -> Result<Vec<PeerInfo>> {
        self.request(|reply| Command::Peers { reply }).await
    }

    /// Replace the borrowed local stream, or clear it with `None`
    pub async fn set_local_stream(&self, stream: Option<&Arc<MediaStream>>) -> Result<()> {
        let stream = stream.map(Arc::downgrade);
        self.request(|reply| Command::SetLocalStream { stream, reply })
            .await
    }

    /// Destroy every handle and close the relay channel
    ///
    /// Per-peer teardown failures are returned; the session is gone either
    /// way and further calls fail with [`Error::SessionClosed`].
    pub async fn destroy_session(&self) -> Result<Vec<Error>> {
        self.request(|reply| Command::Destroy { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)
    }
}

/// Session task
///
/// Handle events go first so a peer's state is current before the next relay
/// frame or command is looked at.
async fn run(
    mut orchestrator: Orchestrator,
    events: EventEmitter,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut inbound: RelayInboundRx,
    mut handle_events: mpsc::UnboundedReceiver<HandleEnvelope>,
) {
    let mut relay_open = true;

    loop {
        tokio::select! {
            biased;

            Some(envelope) = handle_events.recv() => {
                orchestrator.handle_event(envelope).await;
            }

            frame = inbound.recv(), if relay_open => match frame {
                Some(frame) => {
                    debug!("Relay frame: {}", frame.frame_type());
                    match orchestrator.relay().route(frame) {
                        Routed::Roster { peers, relay_servers } => {
                            orchestrator.handle_roster(peers, relay_servers).await
                        }
                        Routed::PeerJoined(id) => orchestrator.handle_peer_joined(id),
                        Routed::Negotiation { from, payload } => {
                            orchestrator.handle_negotiation(from, payload).await
                        }
                        Routed::Surface(event) => events.emit(event),
                        Routed::Ignored => {}
                    }
                }
                None => {
                    warn!("Relay channel closed, no further signalling");
                    relay_open = false;
                }
            },

            command = commands.recv() => match command {
                Some(Command::Destroy { reply }) => {
                    let failures = orchestrator.destroy_all().await;
                    let _ = reply.send(failures);
                    break;
                }
                Some(command) => execute(&mut orchestrator, command).await,
                None => {
                    debug!("All session handles dropped");
                    orchestrator.destroy_all().await;
                    break;
                }
            },
        }
    }

    debug!("Session task for {} terminated", orchestrator.local_id());
}

async fn execute(orchestrator: &mut Orchestrator, command: Command) {
    // A dropped reply receiver only means the caller stopped waiting
    match command {
        Command::Initiate { peer_id, reply } => {
            let _ = reply.send(orchestrator.initiate(&peer_id).await);
        }
        Command::ReinitiateAll { reply } => {
            let _ = reply.send(orchestrator.reinitiate_all().await);
        }
        Command::SendToPeer {
            peer_id,
            payload,
            reply,
        } => {
            let _ = reply.send(orchestrator.send_to_peer(&peer_id, &payload).await);
        }
        Command::SendToAll { payload, reply } => {
            let _ = reply.send(orchestrator.send_to_all(&payload).await);
        }
        Command::Broadcast { payload, reply } => {
            let _ = reply.send(orchestrator.broadcast(payload).await);
        }
        Command::ListPeers { reply } => {
            let _ = reply.send(orchestrator.list_peers());
        }
        Command::PeerInfo { peer_id, reply } => {
            let _ = reply.send(orchestrator.peer_info(peer_id.as_str()));
        }
        Command::Peers { reply } => {
            let _ = reply.send(orchestrator.peers());
        }
        Command::SetLocalStream { stream, reply } => {
            orchestrator.set_local_stream(stream).await;
            let _ = reply.send(());
        }
        Command::Destroy { reply } => {
            let _ = reply.send(orchestrator.destroy_all().await);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NegotiationPolicy;
    use crate::signaling::MemoryRelayHub;
    use crate::transport::memory::MemoryTransport;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn config(id: &str) -> MeshConfig {
        MeshConfig::new("ws://localhost:8080", "r")
            .with_peer_id(id)
            .with_policy(NegotiationPolicy {
                autoconnect: false,
                ..Default::default()
            })
    }

    async fn start(
        hub: &MemoryRelayHub,
        transport: &MemoryTransport,
        id: &str,
    ) -> (MeshSession, broadcast::Receiver<MeshEvent>) {
        let (relay, inbound) = hub.connect();
        MeshSession::start(config(id), relay, inbound, Arc::new(transport.clone()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_start_rejects_invalid_config() {
        let hub = MemoryRelayHub::new();
        let (relay, inbound) = hub.connect();
        let result = MeshSession::start(
            MeshConfig::new("http://nope", "r"),
            relay,
            inbound,
            Arc::new(MemoryTransport::new()),
        )
        .await;

        assert!(matches!(result, Err(Error::InvalidConfig(_))));
        assert!(hub.members("r").await.is_empty());
    }

    #[tokio::test]
    async fn test_start_announces_and_emits_ready() {
        let hub = MemoryRelayHub::new();
        let transport = MemoryTransport::new();
        let (session, mut events) = start(&hub, &transport, "a").await;

        let event = timeout(Duration::from_secs(1), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event, MeshEvent::Ready);
        assert_eq!(session.local_id().as_str(), "a");
        assert_eq!(session.room(), "r");
        assert_eq!(hub.members("r").await, vec![PeerId::from("a")]);
    }

    #[tokio::test]
    async fn test_send_to_unknown_peer_keeps_session_alive() {
        let hub = MemoryRelayHub::new();
        let transport = MemoryTransport::new();
        let (session, _events) = start(&hub, &transport, "a").await;

        let err = tokio_test::assert_err!(session.send_to_peer("ghost", json!(1)).await);
        assert!(matches!(err, Error::UnknownPeerTarget(_)));

        let peers = tokio_test::assert_ok!(session.list_peers().await);
        assert!(peers.is_empty());
        assert_eq!(session.send_to_all(json!(1)).await.unwrap().total_peers, 0);
    }

    #[tokio::test]
    async fn test_calls_after_destroy_fail_with_session_closed() {
        let hub = MemoryRelayHub::new();
        let transport = MemoryTransport::new();
        let (session, _events) = start(&hub, &transport, "a").await;

        let failures = session.destroy_session().await.unwrap();
        assert!(failures.is_empty());
        assert!(hub.members("r").await.is_empty());

        assert!(matches!(
            session.list_peers().await,
            Err(Error::SessionClosed)
        ));
        assert!(matches!(
            session.destroy_session().await,
            Err(Error::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn test_dropping_every_handle_leaves_room() {
        let hub = MemoryRelayHub::new();
        let transport = MemoryTransport::new();
        let (session, _events) = start(&hub, &transport, "a").await;
        let clone = session.clone();
        session.list_peers().await.unwrap();

        drop(session);
        drop(clone);

        timeout(Duration::from_secs(1), async {
            while !hub.members("r").await.is_empty() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_broadcast_and_message_reach_subscribers() {
        let hub = MemoryRelayHub::new();
        let transport = MemoryTransport::new();
        let (a, _a_events) = start(&hub, &transport, "a").await;
        let (_b, mut b_events) = start(&hub, &transport, "b").await;

        a.broadcast(json!({"type": "hello"})).await.unwrap();

        let event = timeout(Duration::from_secs(1), async {
            loop {
                match b_events.recv().await.unwrap() {
                    MeshEvent::Broadcast(payload) => return payload,
                    _ => continue,
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(event, json!({"type": "hello"}));
    }
}
