//! Peer registry
//!
//! Single source of truth for the peers known to a session. The registry
//! stores records and handles but never decides when a handle may be
//! replaced; that ordering belongs to the orchestrator.

use super::{PeerId, PeerInfo, PeerState, Role};
use crate::transport::{HandleId, PeerHandle};
use std::collections::HashMap;
use tracing::debug;

/// A live connection handle together with its generation id
pub struct HandleSlot {
    /// Generation id used to discard events from replaced handles
    pub id: HandleId,

    /// The transport handle
    pub handle: Box<dyn PeerHandle>,
}

impl std::fmt::Debug for HandleSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleSlot").field("id", &self.id).finish()
    }
}

/// Everything the session knows about one peer
#[derive(Debug)]
pub struct PeerRecord {
    id: PeerId,
    handle: Option<HandleSlot>,
    role: Role,
    state: PeerState,
}

impl PeerRecord {
    fn new(id: PeerId) -> Self {
        Self {
            id,
            handle: None,
            role: Role::Unset,
            state: PeerState::Known,
        }
    }

    /// Peer identifier
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Role of the current handle (`Unset` without one)
    pub fn role(&self) -> Role {
        self.role
    }

    /// Connection state
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Current handle, if any
    pub fn handle(&self) -> Option<&HandleSlot> {
        self.handle.as_ref()
    }

    /// Generation id of the current handle
    pub fn handle_id(&self) -> Option<HandleId> {
        self.handle.as_ref().map(|slot| slot.id)
    }

    /// Whether the current handle has reached Connected
    pub fn is_connected(&self) -> bool {
        self.handle.is_some() && self.state == PeerState::Connected
    }

    pub(crate) fn set_state(&mut self, state: PeerState) {
        if self.state != state {
            debug!(
                "Peer {} state transition: {:?} -> {:?}",
                self.id, self.state, state
            );
            self.state = state;
        }
    }

    /// Snapshot for external consumers
    pub fn info(&self) -> PeerInfo {
        PeerInfo {
            peer_id: self.id.clone(),
            role: self.role,
            state: self.state,
        }
    }
}

/// Map of peer id to peer record
#[derive(Debug, Default)]
pub struct PeerRegistry {
    peers: HashMap<PeerId, PeerRecord>,
}

impl PeerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record for `id` unless one exists
    ///
    /// Returns `true` when a new record was created.
    pub fn ensure(&mut self, id: &PeerId) -> bool {
        if self.peers.contains_key(id) {
            return false;
        }

        debug!("Tracking new peer: {}", id);
        self.peers.insert(id.clone(), PeerRecord::new(id.clone()));
        true
    }

    /// Install a handle constructed with `role`
    ///
    /// The caller guarantees any previous handle has finished teardown. The
    /// record is created if it does not exist yet.
    pub fn set_handle(&mut self, id: &PeerId, slot: HandleSlot, role: Role) {
        self.ensure(id);
        if let Some(record) = self.peers.get_mut(id) {
            debug!("Installing handle {:?} for {} as {:?}", slot.id, id, role);
            record.handle = Some(slot);
            record.role = role;
            record.set_state(PeerState::Connecting(role));
        }
    }

    /// Take the handle out of a record, leaving the record tracked
    pub fn clear(&mut self, id: &PeerId) -> Option<HandleSlot> {
        let record = self.peers.get_mut(id)?;
        let slot = record.handle.take();
        record.role = Role::Unset;
        if slot.is_some() {
            record.set_state(PeerState::Closed);
        }
        slot
    }

    /// Stop tracking a peer
    pub fn remove(&mut self, id: &PeerId) -> Option<PeerRecord> {
        self.peers.remove(id)
    }

    /// Look up a record
    pub fn get(&self, id: &str) -> Option<&PeerRecord> {
        self.peers.get(id)
    }

    /// Look up a record mutably
    pub fn get_mut(&mut self, id: &str) -> Option<&mut PeerRecord> {
        self.peers.get_mut(id)
    }

    /// Unordered snapshot of tracked ids
    pub fn list_ids(&self) -> Vec<PeerId> {
        self.peers.keys().cloned().collect()
    }

    /// Iterate over every tracked record
    pub fn records(&self) -> impl Iterator<Item = &PeerRecord> {
        self.peers.values()
    }

    /// Number of tracked peers
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peer is tracked
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Remove every record, handing back the live handles
    pub fn drain(&mut self) -> Vec<(PeerId, HandleSlot)> {
        self.peers
            .drain()
            .filter_map(|(id, record)| record.handle.map(|slot| (id, slot)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryTransport;
    use crate::transport::{HandleEventSink, HandleOptions, PeerTransport};
    use tokio::sync::mpsc;

    async fn test_slot(transport: &MemoryTransport, id: u64, peer: &str, role: Role) -> HandleSlot {
        let (tx, _rx) = mpsc::unbounded_channel();
        let options = HandleOptions::new(PeerId::from("local"), PeerId::from(peer), role);
        let sink = HandleEventSink::new(PeerId::from(peer), HandleId(id), tx);
        let handle = transport.construct(options, sink).await.unwrap();
        HandleSlot {
            id: HandleId(id),
            handle,
        }
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let mut registry = PeerRegistry::new();
        let id = PeerId::from("peer-1");

        assert!(registry.ensure(&id));
        assert!(!registry.ensure(&id));
        assert!(!registry.ensure(&id));

        assert_eq!(registry.len(), 1);
        let record = registry.get("peer-1").unwrap();
        assert_eq!(record.role(), Role::Unset);
        assert_eq!(record.state(), PeerState::Known);
        assert!(record.handle().is_none());
    }

    #[tokio::test]
    async fn test_set_handle_and_clear() {
        let transport = MemoryTransport::new();
        let mut registry = PeerRegistry::new();
        let id = PeerId::from("peer-1");
        registry.ensure(&id);

        let slot = test_slot(&transport, 1, "peer-1", Role::Initiator).await;
        registry.set_handle(&id, slot, Role::Initiator);

        let record = registry.get("peer-1").unwrap();
        assert_eq!(record.role(), Role::Initiator);
        assert_eq!(record.state(), PeerState::Connecting(Role::Initiator));
        assert_eq!(record.handle_id(), Some(HandleId(1)));

        let slot = registry.clear(&id).unwrap();
        assert_eq!(slot.id, HandleId(1));

        let record = registry.get("peer-1").unwrap();
        assert_eq!(record.role(), Role::Unset);
        assert_eq!(record.state(), PeerState::Closed);
        assert!(registry.clear(&id).is_none());
    }

    #[test]
    fn test_list_ids_excludes_removed() {
        let mut registry = PeerRegistry::new();
        for id in ["a", "b", "c"] {
            registry.ensure(&PeerId::from(id));
        }
        registry.remove(&PeerId::from("b"));

        let mut ids = registry.list_ids();
        ids.sort();
        assert_eq!(ids, vec![PeerId::from("a"), PeerId::from("c")]);
    }

    #[tokio::test]
    async fn test_drain_returns_only_live_handles() {
        let transport = MemoryTransport::new();
        let mut registry = PeerRegistry::new();
        registry.ensure(&PeerId::from("idle"));
        let slot = test_slot(&transport, 7, "busy", Role::Responder).await;
        registry.set_handle(&PeerId::from("busy"), slot, Role::Responder);

        let drained = registry.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0, PeerId::from("busy"));
        assert!(registry.is_empty());
    }
}
