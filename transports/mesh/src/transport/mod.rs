//! Peer-to-peer transport capability
//!
//! The mesh consumes, never implements, the direct transport. A
//! [`PeerTransport`] constructs one [`PeerHandle`] per peer link and the
//! handle reports its lifecycle through a [`HandleEventSink`].

pub mod memory;

use crate::config::IceServer;
use crate::media::MediaStream;
use crate::peer::{PeerId, Role};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Generation id of a constructed handle, unique within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub u64);

/// Media requested from the remote side during negotiation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NegotiationFlags {
    /// Ask the remote peer to send audio
    pub offer_to_receive_audio: bool,

    /// Ask the remote peer to send video
    pub offer_to_receive_video: bool,
}

impl NegotiationFlags {
    /// Request both audio and video
    pub fn request_media() -> Self {
        Self {
            offer_to_receive_audio: true,
            offer_to_receive_video: true,
        }
    }
}

/// Options a handle is constructed with
#[derive(Debug, Clone)]
pub struct HandleOptions {
    /// Local peer identifier
    pub local_id: PeerId,

    /// Remote peer identifier
    pub peer_id: PeerId,

    /// Initiator or Responder
    pub role: Role,

    /// Local stream to publish on this link
    pub stream: Option<Arc<MediaStream>>,

    /// Transport-relay servers received from the relay handshake
    pub relay_servers: Option<Vec<IceServer>>,

    /// Remote media requested when initiating
    pub negotiation: Option<NegotiationFlags>,

    /// Application options passed through untouched
    pub transport_options: HashMap<String, serde_json::Value>,
}

impl HandleOptions {
    /// Bare options for a link between `local_id` and `peer_id`
    pub fn new(local_id: PeerId, peer_id: PeerId, role: Role) -> Self {
        Self {
            local_id,
            peer_id,
            role,
            stream: None,
            relay_servers: None,
            negotiation: None,
            transport_options: HashMap::new(),
        }
    }

    /// Whether the handle originates negotiation
    pub fn is_initiator(&self) -> bool {
        self.role == Role::Initiator
    }
}

/// Lifecycle notification raised by a handle
#[derive(Debug, Clone)]
pub enum HandleEvent {
    /// Negotiation payload to forward to the remote peer
    Signal(serde_json::Value),

    /// Remote media stream attached
    Stream(Arc<MediaStream>),

    /// Link established
    Connected,

    /// Application data received
    Data(Bytes),

    /// Link closed
    Closed,

    /// Transport error
    Error(String),
}

impl HandleEvent {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            HandleEvent::Signal(_) => "signal",
            HandleEvent::Stream(_) => "stream",
            HandleEvent::Connected => "connected",
            HandleEvent::Data(_) => "data",
            HandleEvent::Closed => "closed",
            HandleEvent::Error(_) => "error",
        }
    }
}

/// A handle event tagged with the link it came from
#[derive(Debug, Clone)]
pub struct HandleEnvelope {
    /// Remote peer of the emitting handle
    pub peer_id: PeerId,

    /// Generation id of the emitting handle
    pub handle_id: HandleId,

    /// The event
    pub event: HandleEvent,
}

/// Channel end a handle reports its events through
#[derive(Debug, Clone)]
pub struct HandleEventSink {
    peer_id: PeerId,
    handle_id: HandleId,
    tx: mpsc::UnboundedSender<HandleEnvelope>,
}

impl HandleEventSink {
    /// Sink tagging every event with `peer_id` and `handle_id`
    pub fn new(
        peer_id: PeerId,
        handle_id: HandleId,
        tx: mpsc::UnboundedSender<HandleEnvelope>,
    ) -> Self {
        Self {
            peer_id,
            handle_id,
            tx,
        }
    }

    /// Remote peer of the owning handle
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Generation id of the owning handle
    pub fn handle_id(&self) -> HandleId {
        self.handle_id
    }

    /// Report an event
    ///
    /// Returns `false` once the session has stopped listening.
    pub fn emit(&self, event: HandleEvent) -> bool {
        self.tx
            .send(HandleEnvelope {
                peer_id: self.peer_id.clone(),
                handle_id: self.handle_id,
                event,
            })
            .is_ok()
    }
}

/// One direct link to a remote peer
#[async_trait]
pub trait PeerHandle: Send + Sync {
    /// Apply a negotiation payload produced by the remote handle
    async fn apply_payload(&self, payload: serde_json::Value) -> Result<()>;

    /// Send application data over the link
    async fn send(&self, data: Bytes) -> Result<()>;

    /// Publish a local stream on the link
    async fn attach_stream(&self, stream: Arc<MediaStream>) -> Result<()>;

    /// Tear the link down; completes once teardown has finished
    async fn destroy(&self) -> Result<()>;
}

/// Factory for peer handles
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Construct a handle for `options.peer_id`
    async fn construct(
        &self,
        options: HandleOptions,
        events: HandleEventSink,
    ) -> Result<Box<dyn PeerHandle>>;
}
