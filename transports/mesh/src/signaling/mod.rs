//! Signalling relay
//!
//! The relay channel carries everything exchanged before a direct link
//! exists: the room roster, negotiation payloads and room-wide broadcasts.
//! The channel itself is an external collaborator behind [`RelayChannel`];
//! [`SignalingRelay`] adapts it to the orchestrator.

pub mod memory;
pub mod protocol;
pub mod relay;
pub mod websocket;

pub use memory::{MemoryRelay, MemoryRelayHub};
pub use protocol::{MessageKind, RelayInbound, RelayMessage, RelayOutbound, NEGOTIATION_KIND};
pub use relay::{Routed, SignalingRelay};
pub use websocket::WebSocketRelay;

use crate::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Receiving end of a relay channel
pub type RelayInboundRx = mpsc::UnboundedReceiver<RelayInbound>;

/// Outbound side of a relay channel
///
/// Inbound frames are delivered separately through a [`RelayInboundRx`]
/// handed out when the channel is connected.
#[async_trait]
pub trait RelayChannel: Send + Sync {
    /// Send a frame to the relay
    async fn send(&self, frame: RelayOutbound) -> Result<()>;

    /// Leave the room and close the channel
    async fn close(&self) -> Result<()>;
}
