//! Test harness for in-process mesh sessions
//!
//! Every participant shares one [`MemoryRelayHub`] and one [`MemoryTransport`],
//! so sessions started from the same harness can see and connect to each
//! other.

#![allow(dead_code)]

use remotemedia_mesh::signaling::MemoryRelayHub;
use remotemedia_mesh::transport::memory::MemoryTransport;
use remotemedia_mesh::{MediaStream, MeshConfig, MeshEvent, MeshSession, NegotiationPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Upper bound for any single wait in a test
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

/// A started participant
pub struct TestPeer {
    pub session: MeshSession,
    pub events: broadcast::Receiver<MeshEvent>,
    pub stream: Option<Arc<MediaStream>>,
}

impl TestPeer {
    /// Wait for the first event matching `pred`
    pub async fn wait_for(&mut self, pred: impl Fn(&MeshEvent) -> bool) -> MeshEvent {
        wait_for(&mut self.events, pred).await
    }
}

/// Shared relay hub and transport fabric
pub struct MeshHarness {
    pub hub: MemoryRelayHub,
    pub transport: MemoryTransport,
}

impl MeshHarness {
    pub fn new() -> Self {
        Self {
            hub: MemoryRelayHub::new(),
            transport: MemoryTransport::new(),
        }
    }

    /// Manual-connect configuration for `id` in `room`
    pub fn config(&self, id: &str, room: &str) -> MeshConfig {
        MeshConfig::new("ws://in-process", room)
            .with_peer_id(id)
            .with_policy(NegotiationPolicy {
                autoconnect: false,
                ..Default::default()
            })
    }

    /// Join `room` as `id` with a local audio/video stream
    pub async fn join(&self, id: &str, room: &str) -> TestPeer {
        let stream = Arc::new(MediaStream::audio_video());
        let config = self.config(id, room).with_local_stream(&stream);
        let mut peer = self.start(config).await;
        peer.stream = Some(stream);
        peer
    }

    /// Join `room` as `id` without any local media
    pub async fn join_without_stream(&self, id: &str, room: &str) -> TestPeer {
        self.start(self.config(id, room)).await
    }

    /// Start a session from an arbitrary configuration
    pub async fn start(&self, config: MeshConfig) -> TestPeer {
        let (relay, inbound) = self.hub.connect();
        let (session, mut events) =
            MeshSession::start(config, relay, inbound, Arc::new(self.transport.clone()))
                .await
                .expect("session should start");

        wait_for(&mut events, |e| matches!(e, MeshEvent::Ready)).await;

        TestPeer {
            session,
            events,
            stream: None,
        }
    }
}

/// Wait for the first event matching `pred`, panicking after [`EVENT_TIMEOUT`]
pub async fn wait_for(
    events: &mut broadcast::Receiver<MeshEvent>,
    pred: impl Fn(&MeshEvent) -> bool,
) -> MeshEvent {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(e) => panic!("event stream failed: {}", e),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}
