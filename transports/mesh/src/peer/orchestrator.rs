//! Connection orchestration
//!
//! The orchestrator owns the peer registry and is the only place handles
//! are constructed or torn down. All of its methods run on the session task,
//! one at a time, so registry updates never interleave.
//!
//! ```text
//!  Unknown ──roster / peer-joined──▶ Known ──initiate──▶ Connecting(Initiator)
//!                                      │                        │
//!                                      └─negotiation─▶ Connecting(Responder)
//!                                                               │ connected
//!                                                               ▼
//!                            record removed ◀──closed── Connected
//! ```

use super::registry::{HandleSlot, PeerRegistry};
use super::{PeerId, PeerInfo, PeerState, Role};
use crate::config::{IceServer, MeshConfig, NegotiationPolicy};
use crate::events::{EventEmitter, MeshEvent};
use crate::media::MediaStream;
use crate::signaling::SignalingRelay;
use crate::transport::{
    HandleEnvelope, HandleEvent, HandleEventSink, HandleId, HandleOptions, NegotiationFlags,
    PeerTransport,
};
use crate::{Error, Result};
use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Outcome of [`Orchestrator::reinitiate_all`]
#[derive(Debug, Default)]
pub struct ReinitiationReport {
    /// Peers now connecting as Initiator
    pub reinitiated: Vec<PeerId>,

    /// Peers that could not be reinitiated, with the reason
    pub skipped: Vec<(PeerId, Error)>,
}

impl ReinitiationReport {
    /// Whether every tracked peer was reinitiated
    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Statistics from sending data to every connected peer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendStats {
    /// Number of connected peers targeted
    pub total_peers: usize,

    /// Number of successful transmissions
    pub sent_count: usize,

    /// Peers the transport failed to deliver to
    pub failed_peers: Vec<PeerId>,
}

/// Per-peer connection state machine
pub struct Orchestrator {
    local_id: PeerId,
    policy: NegotiationPolicy,
    transport_options: HashMap<String, serde_json::Value>,
    local_stream: Option<Weak<MediaStream>>,
    relay_servers: Option<Vec<IceServer>>,
    registry: PeerRegistry,
    transport: Arc<dyn PeerTransport>,
    relay: SignalingRelay,
    events: EventEmitter,
    handle_events: mpsc::UnboundedSender<HandleEnvelope>,
    next_handle_id: u64,
}

impl Orchestrator {
    /// Create an orchestrator for `local_id`
    ///
    /// Handles report through `handle_events`; the session task feeds the
    /// receiving end back into [`Orchestrator::handle_event`].
    pub fn new(
        config: &MeshConfig,
        local_id: PeerId,
        transport: Arc<dyn PeerTransport>,
        relay: SignalingRelay,
        events: EventEmitter,
        handle_events: mpsc::UnboundedSender<HandleEnvelope>,
    ) -> Self {
        Self {
            local_id,
            policy: config.policy,
            transport_options: config.transport_options.clone(),
            local_stream: config.local_stream.clone(),
            relay_servers: None,
            registry: PeerRegistry::new(),
            transport,
            relay,
            events,
            handle_events,
            next_handle_id: 0,
        }
    }

    /// Local peer id
    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Peer registry
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Signalling relay
    pub fn relay(&self) -> &SignalingRelay {
        &self.relay
    }

    /// Transport-relay servers applied to new handles
    pub fn relay_servers(&self) -> Option<&[IceServer]> {
        self.relay_servers.as_deref()
    }

    /// Local stream, if the application still holds it
    pub fn local_stream(&self) -> Option<Arc<MediaStream>> {
        self.local_stream.as_ref().and_then(Weak::upgrade)
    }

    /// Tracked peer ids
    pub fn list_peers(&self) -> Vec<PeerId> {
        self.registry.list_ids()
    }

    /// Snapshot of one peer
    pub fn peer_info(&self, id: &str) -> Option<PeerInfo> {
        self.registry.get(id).map(|record| record.info())
    }

    /// Snapshot of every tracked peer
    pub fn peers(&self) -> Vec<PeerInfo> {
        self.registry.records().map(|record| record.info()).collect()
    }

    fn has_handle(&self, id: &PeerId) -> bool {
        self.registry
            .get(id.as_str())
            .is_some_and(|record| record.handle().is_some())
    }

    fn track(&mut self, id: &PeerId) {
        if self.registry.ensure(id) {
            self.events.emit(MeshEvent::PeerJoined(id.clone()));
        }
    }

    /// Apply the relay handshake
    ///
    /// Every roster id gets a record; the relay-server list replaces the
    /// previous one and applies to handles constructed from now on.
    pub async fn handle_roster(
        &mut self,
        peers: Vec<PeerId>,
        relay_servers: Option<Vec<IceServer>>,
    ) {
        info!(
            "Roster received: {} peers, relay servers: {}",
            peers.len(),
            relay_servers.as_ref().map_or(0, Vec::len)
        );
        self.relay_servers = relay_servers;

        let mut roster = Vec::with_capacity(peers.len());
        let mut seen = HashSet::new();
        for id in peers {
            if id == self.local_id || !seen.insert(id.clone()) {
                continue;
            }
            self.track(&id);
            roster.push(id);
        }

        self.events.emit(MeshEvent::Ready);

        if self.policy.autoconnect {
            for id in roster {
                if self.has_handle(&id) {
                    debug!("Autoconnect skipping {}: link already present", id);
                    continue;
                }
                if let Err(e) = self.initiate(&id).await {
                    warn!("Autoconnect to {} failed: {}", id, e);
                }
            }
        }
    }

    /// Record an ad-hoc join notification
    pub fn handle_peer_joined(&mut self, id: PeerId) {
        if id == self.local_id {
            return;
        }
        debug!("Peer joined: {}", id);
        self.track(&id);
    }

    /// Connect to `id` as Initiator
    ///
    /// A Responder handle is upgraded: it is destroyed, its teardown awaited,
    /// and a fresh Initiator handle takes its place. An existing Initiator
    /// handle makes this a no-op. If the Responder handle fails to tear down
    /// it stays in place and no Initiator handle is built.
    pub async fn initiate(&mut self, id: &PeerId) -> Result<()> {
        if *id == self.local_id {
            debug!("Ignoring initiate towards the local peer");
            return Ok(());
        }
        self.track(id);

        let role = self.registry.get(id.as_str()).map_or(Role::Unset, |r| r.role());
        match role {
            Role::Initiator => {
                debug!("Already initiating towards {}", id);
                return Ok(());
            }
            Role::Responder => {
                info!("Upgrading inbound-only link with {} to initiator", id);
                if let Err(e) = self.teardown_handle(id).await {
                    warn!("Keeping responder link with {}: {}", id, e);
                    return Ok(());
                }
            }
            Role::Unset => {}
        }

        if let Err(e) = self.construct_handle(id, Role::Initiator).await {
            warn!("Failed to construct initiator handle for {}: {}", id, e);
        }

        Ok(())
    }

    /// Tear down and re-initiate every tracked peer
    ///
    /// The existing handle is destroyed before the local stream is checked,
    /// so a peer skipped for lack of a stream is left without a handle. A
    /// peer whose handle fails to tear down keeps it and is skipped.
    pub async fn reinitiate_all(&mut self) -> ReinitiationReport {
        let mut report = ReinitiationReport::default();

        for id in self.registry.list_ids() {
            if let Err(e) = self.teardown_handle(&id).await {
                warn!("Cannot reinitiate {}: {}", id, e);
                report.skipped.push((id, e));
                continue;
            }

            if self.local_stream().is_none() {
                warn!("Cannot reinitiate {}: no local stream", id);
                report
                    .skipped
                    .push((id.clone(), Error::NoLocalStreamAvailable(id)));
                continue;
            }

            match self.construct_handle(&id, Role::Initiator).await {
                Ok(_) => report.reinitiated.push(id),
                Err(e) => {
                    warn!("Failed to reinitiate {}: {}", id, e);
                    report.skipped.push((id, e));
                }
            }
        }

        info!(
            "Reinitiation finished: {} reinitiated, {} skipped",
            report.reinitiated.len(),
            report.skipped.len()
        );
        report
    }

    /// Apply an inbound negotiation payload from `from`
    ///
    /// Unknown senders get a record, and peers without a handle get a
    /// Responder handle, before the payload is applied.
    pub async fn handle_negotiation(&mut self, from: PeerId, payload: serde_json::Value) {
        if from == self.local_id {
            return;
        }
        self.track(&from);

        if !self.has_handle(&from) {
            if let Err(e) = self.construct_handle(&from, Role::Responder).await {
                warn!("Failed to construct responder handle for {}: {}", from, e);
                return;
            }
        }

        let Some(slot) = self.registry.get(from.as_str()).and_then(|r| r.handle()) else {
            return;
        };
        if let Err(e) = slot.handle.apply_payload(payload).await {
            warn!("Negotiation payload from {} rejected: {}", from, e);
        }
    }

    /// Process a lifecycle event from a handle
    ///
    /// Events from a handle that is no longer the peer's current handle are
    /// discarded.
    pub async fn handle_event(&mut self, envelope: HandleEnvelope) {
        let HandleEnvelope {
            peer_id,
            handle_id,
            event,
        } = envelope;

        let current = self
            .registry
            .get(peer_id.as_str())
            .and_then(|record| record.handle_id());
        if current != Some(handle_id) {
            debug!(
                "Discarding {} event from stale handle {:?} of {}",
                event.name(),
                handle_id,
                peer_id
            );
            return;
        }

        match event {
            HandleEvent::Signal(payload) => {
                if let Err(e) = self.relay.forward_negotiation(&peer_id, payload).await {
                    warn!("Failed to forward negotiation payload to {}: {}", peer_id, e);
                }
            }
            HandleEvent::Stream(stream) => {
                debug!("Stream {} received from {}", stream.id(), peer_id);
                self.events.emit(MeshEvent::Stream { peer_id, stream });
            }
            HandleEvent::Connected => {
                if let Some(record) = self.registry.get_mut(peer_id.as_str()) {
                    record.set_state(PeerState::Connected);
                }
                info!("Connected to {}", peer_id);
                self.events.emit(MeshEvent::Connect(peer_id));
            }
            HandleEvent::Data(data) => match serde_json::from_slice(&data) {
                Ok(payload) => self.events.emit(MeshEvent::Data { peer_id, payload }),
                Err(e) => warn!("Undecodable data from {}: {}", peer_id, e),
            },
            HandleEvent::Closed => {
                if let Some(mut record) = self.registry.remove(&peer_id) {
                    record.set_state(PeerState::Closed);
                }
                info!("Connection to {} closed", peer_id);
                self.events.emit(MeshEvent::Close(peer_id));
            }
            HandleEvent::Error(reason) => {
                warn!("Transport error on link to {}: {}", peer_id, reason);
            }
        }
    }

    /// Send `payload` to one connected peer
    ///
    /// Returns [`Error::UnknownPeerTarget`] when `id` has no connected handle;
    /// nothing is sent in that case. Transport failures are logged.
    pub async fn send_to_peer(&self, id: &PeerId, payload: &serde_json::Value) -> Result<()> {
        let slot = match self.registry.get(id.as_str()) {
            Some(record) if record.is_connected() => record.handle(),
            _ => None,
        };
        let Some(slot) = slot else {
            debug!("No connected handle for {}, dropping message", id);
            return Err(Error::UnknownPeerTarget(id.clone()));
        };

        let data = Bytes::from(serde_json::to_vec(payload)?);
        if let Err(e) = slot.handle.send(data).await {
            warn!("Failed to send data to {}: {}", id, e);
        }

        Ok(())
    }

    /// Send `payload` to every connected peer
    pub async fn send_to_all(&self, payload: &serde_json::Value) -> SendStats {
        let mut stats = SendStats::default();

        let data = match serde_json::to_vec(payload) {
            Ok(data) => Bytes::from(data),
            Err(e) => {
                warn!("Failed to encode payload: {}", e);
                return stats;
            }
        };

        for record in self.registry.records().filter(|r| r.is_connected()) {
            let Some(slot) = record.handle() else {
                continue;
            };
            stats.total_peers += 1;
            match slot.handle.send(data.clone()).await {
                Ok(()) => stats.sent_count += 1,
                Err(e) => {
                    warn!("Failed to send data to {}: {}", record.id(), e);
                    stats.failed_peers.push(record.id().clone());
                }
            }
        }

        debug!(
            "Sent to {}/{} connected peers",
            stats.sent_count, stats.total_peers
        );
        stats
    }

    /// Send a room-wide message through the relay
    pub async fn broadcast(&self, payload: serde_json::Value) -> Result<()> {
        self.relay.broadcast(payload).await
    }

    /// Replace the borrowed local stream
    ///
    /// Live handles whose role shares media under the policy get the new
    /// stream attached.
    pub async fn set_local_stream(&mut self, stream: Option<Weak<MediaStream>>) {
        self.local_stream = stream;
        let Some(stream) = self.local_stream() else {
            debug!("Local stream cleared");
            return;
        };

        for record in self.registry.records() {
            let Some(slot) = record.handle() else {
                continue;
            };
            let share = match record.role() {
                Role::Initiator => self.policy.share_when_initiating,
                Role::Responder => self.policy.share_when_requested,
                Role::Unset => false,
            };
            if share {
                if let Err(e) = slot.handle.attach_stream(Arc::clone(&stream)).await {
                    warn!("Failed to attach stream for {}: {}", record.id(), e);
                }
            }
        }
    }

    /// Destroy every handle and leave the room
    ///
    /// Best-effort: a failing teardown is logged and returned, and the
    /// remaining peers are still torn down.
    pub async fn destroy_all(&mut self) -> Vec<Error> {
        let mut failures = Vec::new();

        for (id, slot) in self.registry.drain() {
            if let Err(e) = slot.handle.destroy().await {
                let err = Self::teardown_error(&id, e);
                warn!("{}", err);
                failures.push(err);
            }
        }

        if let Err(e) = self.relay.close().await {
            warn!("Failed to close relay channel: {}", e);
        }

        info!("Session {} destroyed", self.local_id);
        failures
    }

    /// Construction options for a new handle towards `id`
    pub fn handle_options(&self, id: &PeerId, role: Role) -> HandleOptions {
        let stream = self.local_stream();
        let mut options = HandleOptions::new(self.local_id.clone(), id.clone(), role);

        match role {
            Role::Initiator => {
                if self.policy.share_when_initiating {
                    options.stream = stream;
                }
                if self.policy.request_media_when_initiating {
                    options.negotiation = Some(NegotiationFlags::request_media());
                }
            }
            Role::Responder => {
                if self.policy.share_when_requested {
                    options.stream = stream;
                }
            }
            Role::Unset => {}
        }

        options.relay_servers = self.relay_servers.clone();
        options.transport_options = self.transport_options.clone();
        options
    }

    #[instrument(skip(self, id), fields(peer_id = %id))]
    async fn construct_handle(&mut self, id: &PeerId, role: Role) -> Result<HandleId> {
        let options = self.handle_options(id, role);

        self.next_handle_id += 1;
        let handle_id = HandleId(self.next_handle_id);
        let sink = HandleEventSink::new(id.clone(), handle_id, self.handle_events.clone());

        info!(
            "Constructing {:?} handle {:?} (stream: {}, relay servers: {})",
            role,
            handle_id,
            options.stream.is_some(),
            options.relay_servers.is_some()
        );
        let handle = self.transport.construct(options, sink).await?;

        self.registry.set_handle(
            id,
            HandleSlot {
                id: handle_id,
                handle,
            },
            role,
        );
        Ok(handle_id)
    }

    /// The slot is cleared only once `destroy` succeeds.
    async fn teardown_handle(&mut self, id: &PeerId) -> Result<()> {
        let Some(slot) = self.registry.get(id.as_str()).and_then(|r| r.handle()) else {
            return Ok(());
        };
        debug!("Tearing down handle {:?} of {}", slot.id, id);
        slot.handle
            .destroy()
            .await
            .map_err(|e| Self::teardown_error(id, e))?;

        self.registry.clear(id);
        Ok(())
    }

    fn teardown_error(id: &PeerId, err: Error) -> Error {
        match err {
            Error::TeardownFailure { .. } => err,
            other => Error::TeardownFailure {
                peer_id: id.clone(),
                reason: other.to_string(),
            },
        }
    }
}
