//! Configuration types for mesh sessions

use crate::media::MediaStream;
use crate::peer::PeerId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

/// Main configuration for a [`MeshSession`](crate::MeshSession)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshConfig {
    /// Relay endpoint URL (ws:// or wss://)
    pub signaling_url: String,

    /// Room to join on the relay channel
    pub room: String,

    /// Local peer ID (auto-generated if None)
    pub peer_id: Option<String>,

    /// Media-sharing negotiation policy
    pub policy: NegotiationPolicy,

    /// Options passed verbatim into every handle construction
    pub transport_options: HashMap<String, serde_json::Value>,

    /// Capacity of the event broadcast channel (default: 256)
    pub event_capacity: usize,

    /// Local media stream, borrowed from the application
    ///
    /// The session only ever holds a weak reference; once the application
    /// drops its `Arc`, the stream is no longer reachable.
    #[serde(skip)]
    pub local_stream: Option<Weak<MediaStream>>,
}

/// Media-sharing negotiation policy
///
/// Decides, per role, whether a newly constructed handle carries the local
/// stream and whether it asks the remote side for media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NegotiationPolicy {
    /// Attach the local stream when answering a remote peer (default: true)
    pub share_when_requested: bool,

    /// Attach the local stream when initiating (default: true)
    pub share_when_initiating: bool,

    /// Ask the remote peer for audio and video when initiating (default: true)
    pub request_media_when_initiating: bool,

    /// Initiate towards every roster peer once the session is ready (default: true)
    pub autoconnect: bool,
}

/// Transport-relay (STUN/TURN) server entry
///
/// Opaque to the mesh; received from the relay handshake and copied into
/// handle construction options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    /// Server URLs (stun:, turn:, turns:)
    pub urls: Vec<String>,

    /// Username for TURN authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Credential for TURN authentication
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    /// Unauthenticated server with a single URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            urls: vec![url.into()],
            username: None,
            credential: None,
        }
    }

    /// Attach TURN credentials
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.credential = Some(credential.into());
        self
    }
}

impl Default for NegotiationPolicy {
    fn default() -> Self {
        Self {
            share_when_requested: true,
            share_when_initiating: true,
            request_media_when_initiating: true,
            autoconnect: true,
        }
    }
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080".to_string(),
            room: "default".to_string(),
            peer_id: None,
            policy: NegotiationPolicy::default(),
            transport_options: HashMap::new(),
            event_capacity: 256,
            local_stream: None,
        }
    }
}

impl MeshConfig {
    /// Configuration for `room` on the relay at `signaling_url`
    pub fn new(signaling_url: &str, room: &str) -> Self {
        Self {
            signaling_url: signaling_url.to_string(),
            room: room.to_string(),
            ..Default::default()
        }
    }

    /// Preset for participants that never publish local media
    ///
    /// Remote media is still requested when initiating.
    ///
    /// # Example
    ///
    /// ```
    /// use remotemedia_mesh::MeshConfig;
    ///
    /// let config = MeshConfig::receive_only("ws://localhost:8080", "lobby");
    /// assert!(!config.policy.share_when_initiating);
    /// assert!(config.policy.request_media_when_initiating);
    /// ```
    pub fn receive_only(signaling_url: &str, room: &str) -> Self {
        Self {
            policy: NegotiationPolicy {
                share_when_requested: false,
                share_when_initiating: false,
                request_media_when_initiating: true,
                autoconnect: true,
            },
            ..Self::new(signaling_url, room)
        }
    }

    /// Set the local peer ID
    pub fn with_peer_id(mut self, peer_id: impl Into<String>) -> Self {
        self.peer_id = Some(peer_id.into());
        self
    }

    /// Set the negotiation policy
    pub fn with_policy(mut self, policy: NegotiationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Borrow the application's local stream
    pub fn with_local_stream(mut self, stream: &Arc<MediaStream>) -> Self {
        self.local_stream = Some(Arc::downgrade(stream));
        self
    }

    /// Parse a JSON configuration document and validate it
    pub fn from_json(json: &str) -> crate::Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(|e| {
            crate::Error::InvalidConfig(format!("Failed to parse configuration: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Local peer ID, generating one when not configured
    pub fn resolve_peer_id(&self) -> PeerId {
        match &self.peer_id {
            Some(id) => PeerId::from(id.as_str()),
            None => PeerId::generate(),
        }
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `signaling_url` is not a WebSocket URL
    /// - `room` is empty
    /// - `peer_id` is set but empty
    /// - `event_capacity` is not in range 1-65536
    pub fn validate(&self) -> crate::Result<()> {
        use crate::Error;

        if !self.signaling_url.starts_with("ws://") && !self.signaling_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "signaling_url must start with ws:// or wss://, got {}",
                self.signaling_url
            )));
        }

        if self.room.trim().is_empty() {
            return Err(Error::InvalidConfig("room must not be empty".to_string()));
        }

        if matches!(&self.peer_id, Some(id) if id.trim().is_empty()) {
            return Err(Error::InvalidConfig(
                "peer_id must not be empty when set".to_string(),
            ));
        }

        if self.event_capacity == 0 || self.event_capacity > 65536 {
            return Err(Error::InvalidConfig(format!(
                "event_capacity must be in range 1-65536, got {}",
                self.event_capacity
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = MeshConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.policy.autoconnect);
        assert!(config.local_stream.is_none());
    }

    #[test]
    fn test_invalid_signaling_url() {
        let config = MeshConfig::new("http://localhost:8080", "room");
        assert!(config.validate().unwrap_err().to_string().contains("ws://"));
    }

    #[test]
    fn test_empty_room_and_peer_id() {
        let config = MeshConfig::new("ws://localhost:8080", "  ");
        assert!(config.validate().is_err());

        let config = MeshConfig::new("ws://localhost:8080", "r").with_peer_id("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_event_capacity_range() {
        let mut config = MeshConfig::default();
        config.event_capacity = 0;
        assert!(config.validate().is_err());
        config.event_capacity = 70000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config = MeshConfig::from_json(
            r#"{"signaling_url":"wss://relay.example","room":"r","policy":{"autoconnect":false}}"#,
        )
        .unwrap();

        assert_eq!(config.room, "r");
        assert!(!config.policy.autoconnect);
        assert!(config.policy.share_when_initiating);
        assert_eq!(config.event_capacity, 256);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        assert!(MeshConfig::from_json(r#"{"room":""}"#).is_err());
        assert!(MeshConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_resolve_peer_id() {
        let config = MeshConfig::default().with_peer_id("alice");
        assert_eq!(config.resolve_peer_id().as_str(), "alice");

        let generated = MeshConfig::default().resolve_peer_id();
        assert!(generated.as_str().starts_with("peer-"));
    }

    #[test]
    fn test_local_stream_is_borrowed() {
        let stream = Arc::new(MediaStream::audio_video());
        let config = MeshConfig::default().with_local_stream(&stream);

        let weak = config.local_stream.clone().unwrap();
        assert!(weak.upgrade().is_some());

        drop(stream);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_ice_server_serialization() {
        let server = IceServer::new("turn:turn.example:3478").with_credentials("u", "p");
        let json = serde_json::to_value(&server).unwrap();
        assert_eq!(json["urls"][0], "turn:turn.example:3478");
        assert_eq!(json["username"], "u");

        let stun: IceServer = serde_json::from_str(r#"{"urls":["stun:s"]}"#).unwrap();
        assert_eq!(stun.username, None);
    }
}
