//! In-process transport
//!
//! Pairs handles living in the same process through a shared fabric. An
//! initiator registers a link and emits an `offer` payload naming it; the
//! responder that applies the offer joins the link and answers. Data,
//! streams and closure then flow between the two endpoints directly.
//!
//! Used by the integration tests and the `mesh_demo` binary.

use super::{HandleEvent, HandleEventSink, HandleOptions, PeerHandle, PeerTransport};
use crate::media::MediaStream;
use crate::peer::{PeerId, Role};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Negotiation payloads exchanged by memory handles
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MemorySignal {
    Offer {
        link: String,
        #[serde(default)]
        offer_to_receive_audio: bool,
        #[serde(default)]
        offer_to_receive_video: bool,
    },
    Answer {
        link: String,
    },
}

struct Endpoint {
    sink: HandleEventSink,
    stream: Option<Arc<MediaStream>>,
}

struct Link {
    initiator: Option<Endpoint>,
    responder: Option<Endpoint>,
    answered: bool,
}

impl Link {
    fn endpoint_mut(&mut self, role: Role) -> Option<&mut Endpoint> {
        match role {
            Role::Initiator => self.initiator.as_mut(),
            Role::Responder => self.responder.as_mut(),
            Role::Unset => None,
        }
    }

    fn remote(&self, role: Role) -> Option<&Endpoint> {
        match role {
            Role::Initiator => self.responder.as_ref(),
            Role::Responder => self.initiator.as_ref(),
            Role::Unset => None,
        }
    }
}

#[derive(Default)]
struct Fabric {
    links: HashMap<String, Link>,
    constructed: Vec<HandleOptions>,
    failing_teardown: HashSet<(PeerId, PeerId)>,
}

/// Transport pairing handles through a shared in-process fabric
///
/// Clones share the fabric, so every session of a test should be given a
/// clone of the same instance.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    fabric: Arc<Mutex<Fabric>>,
}

impl MemoryTransport {
    /// Create a transport with an empty fabric
    pub fn new() -> Self {
        Self::default()
    }

    /// Options of every handle constructed so far, in construction order
    pub async fn constructed(&self) -> Vec<HandleOptions> {
        self.fabric.lock().await.constructed.clone()
    }

    /// Options of handles constructed by the session of `local_id`
    pub async fn constructed_by(&self, local_id: &str) -> Vec<HandleOptions> {
        self.fabric
            .lock()
            .await
            .constructed
            .iter()
            .filter(|options| options.local_id.as_str() == local_id)
            .cloned()
            .collect()
    }

    /// Make teardown of `local_id`'s handle towards `peer_id` fail
    pub async fn fail_teardown(&self, local_id: &str, peer_id: &str) {
        self.fabric
            .lock()
            .await
            .failing_teardown
            .insert((PeerId::from(local_id), PeerId::from(peer_id)));
    }

    /// Number of links currently registered
    pub async fn link_count(&self) -> usize {
        self.fabric.lock().await.links.len()
    }
}

#[async_trait]
impl PeerTransport for MemoryTransport {
    async fn construct(
        &self,
        options: HandleOptions,
        events: HandleEventSink,
    ) -> Result<Box<dyn PeerHandle>> {
        let mut fabric = self.fabric.lock().await;
        fabric.constructed.push(options.clone());

        let link = if options.is_initiator() {
            let link_id = uuid::Uuid::new_v4().to_string();
            fabric.links.insert(
                link_id.clone(),
                Link {
                    initiator: Some(Endpoint {
                        sink: events.clone(),
                        stream: options.stream.clone(),
                    }),
                    responder: None,
                    answered: false,
                },
            );

            let flags = options.negotiation.unwrap_or_default();
            let offer = MemorySignal::Offer {
                link: link_id.clone(),
                offer_to_receive_audio: flags.offer_to_receive_audio,
                offer_to_receive_video: flags.offer_to_receive_video,
            };
            events.emit(HandleEvent::Signal(serde_json::to_value(&offer)?));
            Some(link_id)
        } else {
            None
        };

        debug!(
            "Memory handle {} -> {} constructed as {:?}",
            options.local_id, options.peer_id, options.role
        );

        Ok(Box::new(MemoryHandle {
            local_id: options.local_id,
            peer_id: options.peer_id,
            role: options.role,
            sink: events,
            link: Mutex::new(link),
            stream: Mutex::new(options.stream),
            destroyed: AtomicBool::new(false),
            fabric: Arc::clone(&self.fabric),
        }))
    }
}

struct MemoryHandle {
    local_id: PeerId,
    peer_id: PeerId,
    role: Role,
    sink: HandleEventSink,
    link: Mutex<Option<String>>,
    stream: Mutex<Option<Arc<MediaStream>>>,
    destroyed: AtomicBool,
    fabric: Arc<Mutex<Fabric>>,
}

impl MemoryHandle {
    fn reject(&self, reason: impl Into<String>) -> Error {
        Error::NegotiationApplyFailure {
            peer_id: self.peer_id.clone(),
            reason: reason.into(),
        }
    }

    async fn accept_offer(&self, link_id: String) -> Result<()> {
        if self.role != Role::Responder {
            return Err(self.reject("offer received by an initiator"));
        }

        let mut own_link = self.link.lock().await;
        if own_link.is_some() {
            return Err(self.reject("offer received after negotiation completed"));
        }

        let mut fabric = self.fabric.lock().await;
        let link = fabric
            .links
            .get_mut(&link_id)
            .ok_or_else(|| self.reject(format!("unknown link {}", link_id)))?;
        if link.responder.is_some() {
            return Err(self.reject(format!("link {} already answered", link_id)));
        }

        let stream = self.stream.lock().await.clone();
        link.responder = Some(Endpoint {
            sink: self.sink.clone(),
            stream,
        });
        let remote_stream = link.initiator.as_ref().and_then(|e| e.stream.clone());
        *own_link = Some(link_id.clone());

        let answer = MemorySignal::Answer { link: link_id };
        self.sink
            .emit(HandleEvent::Signal(serde_json::to_value(&answer)?));
        self.sink.emit(HandleEvent::Connected);
        if let Some(stream) = remote_stream {
            self.sink.emit(HandleEvent::Stream(stream));
        }

        Ok(())
    }

    async fn accept_answer(&self, link_id: String) -> Result<()> {
        if self.role != Role::Initiator {
            return Err(self.reject("answer received by a responder"));
        }

        let own_link = self.link.lock().await;
        if own_link.as_deref() != Some(link_id.as_str()) {
            return Err(self.reject(format!("answer for foreign link {}", link_id)));
        }

        let mut fabric = self.fabric.lock().await;
        let link = fabric
            .links
            .get_mut(&link_id)
            .ok_or_else(|| self.reject(format!("link {} is gone", link_id)))?;
        if link.answered {
            return Err(self.reject("duplicate answer"));
        }
        let remote_stream = match link.responder.as_ref() {
            Some(responder) => responder.stream.clone(),
            None => return Err(self.reject("answer before the responder joined")),
        };
        link.answered = true;

        self.sink.emit(HandleEvent::Connected);
        if let Some(stream) = remote_stream {
            self.sink.emit(HandleEvent::Stream(stream));
        }

        Ok(())
    }
}

#[async_trait]
impl PeerHandle for MemoryHandle {
    async fn apply_payload(&self, payload: serde_json::Value) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(self.reject("handle destroyed"));
        }

        let signal: MemorySignal = serde_json::from_value(payload)
            .map_err(|e| self.reject(format!("malformed payload: {}", e)))?;

        match signal {
            MemorySignal::Offer { link, .. } => self.accept_offer(link).await,
            MemorySignal::Answer { link } => self.accept_answer(link).await,
        }
    }

    async fn send(&self, data: Bytes) -> Result<()> {
        let link_id = self
            .link
            .lock()
            .await
            .clone()
            .ok_or_else(|| Error::TransportError(format!("no link to {}", self.peer_id)))?;

        let fabric = self.fabric.lock().await;
        let remote = fabric
            .links
            .get(&link_id)
            .and_then(|link| link.remote(self.role))
            .ok_or_else(|| Error::TransportError(format!("link to {} is down", self.peer_id)))?;

        if !remote.sink.emit(HandleEvent::Data(data)) {
            return Err(Error::TransportError(format!(
                "{} stopped receiving",
                self.peer_id
            )));
        }

        Ok(())
    }

    async fn attach_stream(&self, stream: Arc<MediaStream>) -> Result<()> {
        {
            let mut own = self.stream.lock().await;
            if own.as_ref().map(|s| s.id()) == Some(stream.id()) {
                return Ok(());
            }
            *own = Some(Arc::clone(&stream));
        }

        let Some(link_id) = self.link.lock().await.clone() else {
            return Ok(());
        };

        let mut fabric = self.fabric.lock().await;
        if let Some(link) = fabric.links.get_mut(&link_id) {
            if let Some(endpoint) = link.endpoint_mut(self.role) {
                endpoint.stream = Some(Arc::clone(&stream));
            }
            if let Some(remote) = link.remote(self.role) {
                remote.sink.emit(HandleEvent::Stream(stream));
            }
        }

        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Ok(());
        }

        let failing = self
            .fabric
            .lock()
            .await
            .failing_teardown
            .contains(&(self.local_id.clone(), self.peer_id.clone()));
        if failing {
            return Err(Error::TeardownFailure {
                peer_id: self.peer_id.clone(),
                reason: "simulated teardown failure".to_string(),
            });
        }

        self.destroyed.store(true, Ordering::SeqCst);

        let link_id = self.link.lock().await.take();
        if let Some(link_id) = link_id {
            if let Some(link) = self.fabric.lock().await.links.remove(&link_id) {
                if let Some(remote) = link.remote(self.role) {
                    remote.sink.emit(HandleEvent::Closed);
                }
            }
        }

        info!("Memory handle {} -> {} destroyed", self.local_id, self.peer_id);
        self.sink.emit(HandleEvent::Closed);

        Ok(())
    }
}
