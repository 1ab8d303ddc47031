//! Error types for mesh orchestration

use crate::peer::PeerId;

/// Result type alias using mesh Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while orchestrating a peer mesh
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reinitiation attempted while no local media stream is reachable
    #[error("No local stream available to reinitiate peer {0}")]
    NoLocalStreamAvailable(PeerId),

    /// Point-to-point send addressed to a peer without a connected handle
    #[error("No connected handle for peer {0}")]
    UnknownPeerTarget(PeerId),

    /// A negotiation payload could not be applied to a handle
    #[error("Failed to apply negotiation payload from {peer_id}: {reason}")]
    NegotiationApplyFailure {
        /// Peer the payload came from
        peer_id: PeerId,
        /// Transport-provided reason
        reason: String,
    },

    /// A handle failed to tear down
    #[error("Teardown failed for peer {peer_id}: {reason}")]
    TeardownFailure {
        /// Peer whose handle failed to tear down
        peer_id: PeerId,
        /// Transport-provided reason
        reason: String,
    },

    /// Transport capability error (construction, send, stream attach)
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Relay channel error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// The session task has stopped
    #[error("Session closed")]
    SessionClosed,

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Internal error (should not occur in normal operation)
    #[error("Internal error: {0}")]
    InternalError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error should stop the caller
    ///
    /// Per-peer failures never are: the session keeps serving every other peer.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::InvalidConfig(_) | Error::SessionClosed | Error::InternalError(_)
        )
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SignalingError(_) | Error::WebSocketError(_) | Error::IoError(_)
        )
    }

    /// Check if this error concerns a single peer
    pub fn is_peer_error(&self) -> bool {
        self.peer_id().is_some()
    }

    /// The peer this error is attributed to, if any
    pub fn peer_id(&self) -> Option<&PeerId> {
        match self {
            Error::NoLocalStreamAvailable(id) | Error::UnknownPeerTarget(id) => Some(id),
            Error::NegotiationApplyFailure { peer_id, .. }
            | Error::TeardownFailure { peer_id, .. } => Some(peer_id),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}
