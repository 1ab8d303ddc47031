//! Room-scoped peer mesh orchestration for RemoteMedia
//!
//! This crate tracks the peers present in a relay room and decides, per peer,
//! when a direct connection handle is built, in which role, and with which
//! media. The direct transport itself is an external capability plugged in
//! through [`PeerTransport`](transport::PeerTransport).
//!
//! # Features
//!
//! - **Peer registry**: exactly one record per peer id, idempotent under
//!   replayed rosters and duplicate join notifications
//! - **Initiator/Responder negotiation**: self-healing responder creation and
//!   responder-to-initiator upgrade with awaited teardown
//! - **Negotiation policy**: per-role media sharing and remote media requests
//! - **Signalling relay**: JSON frames over WebSocket, or an in-process hub
//! - **Typed events**: [`MeshEvent`] over a `tokio::sync::broadcast` channel
//! - **Presence**: nickname directory layered on room-wide broadcasts
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  MeshSession (cloneable handle)                        │
//! │  ↓ commands                                            │
//! │  session task                                          │
//! │  ├─ SignalingRelay (RelayChannel: WebSocket / memory)  │
//! │  ├─ Orchestrator (per-peer state machine)              │
//! │  │   ├─ PeerRegistry (id → record, handle, role)       │
//! │  │   └─ NegotiationPolicy                              │
//! │  └─ EventEmitter → MeshEvent subscribers               │
//! │     ↓                                                   │
//! │  PeerTransport → PeerHandle (one per remote peer)      │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use remotemedia_mesh::{MeshConfig, NegotiationPolicy};
//!
//! let config = MeshConfig::new("ws://localhost:8080", "lobby")
//!     .with_peer_id("alice")
//!     .with_policy(NegotiationPolicy {
//!         autoconnect: false,
//!         ..Default::default()
//!     });
//!
//! assert!(config.validate().is_ok());
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use remotemedia_mesh::transport::memory::MemoryTransport;
//! use remotemedia_mesh::{MeshConfig, MeshEvent, MeshSession};
//! use std::sync::Arc;
//!
//! # async fn example() -> remotemedia_mesh::Result<()> {
//! let config = MeshConfig::new("ws://localhost:8080", "lobby");
//! let (session, mut events) = MeshSession::connect(config, Arc::new(MemoryTransport::new())).await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let MeshEvent::PeerJoined(peer_id) = event {
//!         session.initiate(peer_id).await?;
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod events;
pub mod media;
pub mod peer;
pub mod presence;
pub mod session;
pub mod signaling;
pub mod transport;

// Re-exports for public API
pub use config::{IceServer, MeshConfig, NegotiationPolicy};
pub use error::{Error, Result};
pub use events::MeshEvent;
pub use media::{MediaStream, TrackKind};
pub use peer::{PeerId, PeerInfo, PeerState, ReinitiationReport, Role, SendStats};
pub use presence::{NicknameDirectory, PresenceMessage, PresenceUpdate};
pub use session::MeshSession;

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
