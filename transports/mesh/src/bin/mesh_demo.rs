//! In-process mesh demo
//!
//! Starts several participants in one room over the in-memory relay hub and
//! in-memory transport, waits for the full mesh to connect, exchanges one
//! data message per participant and tears everything down.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin mesh_demo -- --participants 4 --room lobby
//!
//! # More detail
//! RUST_LOG=debug cargo run --bin mesh_demo
//! ```

use anyhow::{bail, Context};
use clap::Parser;
use remotemedia_mesh::signaling::MemoryRelayHub;
use remotemedia_mesh::transport::memory::MemoryTransport;
use remotemedia_mesh::{IceServer, MediaStream, MeshConfig, MeshEvent, MeshSession};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// RemoteMedia mesh demo
///
/// Runs a full peer mesh inside one process.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Number of participants
    #[arg(short, long, default_value_t = 3, env = "MESH_PARTICIPANTS")]
    participants: usize,

    /// Room name
    #[arg(short, long, default_value = "demo", env = "MESH_ROOM")]
    room: String,

    /// STUN servers handed out by the relay (can specify multiple)
    #[arg(long, default_value = "stun:stun.l.google.com:19302")]
    stun_servers: Vec<String>,

    /// Seconds to wait for each phase
    #[arg(long, default_value_t = 5)]
    timeout_secs: u64,
}

struct Participant {
    session: MeshSession,
    events: broadcast::Receiver<MeshEvent>,
    // Kept alive for the whole run; sessions only borrow it
    _stream: Arc<MediaStream>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing();

    if args.participants < 2 {
        bail!("need at least 2 participants, got {}", args.participants);
    }

    let hub = MemoryRelayHub::with_relay_servers(
        args.stun_servers.iter().map(IceServer::new).collect(),
    );
    let transport = MemoryTransport::new();
    let wait = Duration::from_secs(args.timeout_secs);

    info!(
        "Starting {} participants in room {}",
        args.participants, args.room
    );

    let mut participants = Vec::with_capacity(args.participants);
    for i in 0..args.participants {
        let stream = Arc::new(MediaStream::audio_video());
        let config = MeshConfig::new("ws://in-process", &args.room)
            .with_peer_id(format!("participant-{}", i))
            .with_local_stream(&stream);

        let (relay, inbound) = hub.connect();
        let (session, events) =
            MeshSession::start(config, relay, inbound, Arc::new(transport.clone()))
                .await
                .with_context(|| format!("failed to start participant {}", i))?;

        participants.push(Participant {
            session,
            events,
            _stream: stream,
        });
    }

    let expected = args.participants - 1;

    for p in &mut participants {
        let connected = count_events(&mut p.events, expected, wait, |e| {
            matches!(e, MeshEvent::Connect(_))
        })
        .await;
        info!(
            "{} connected to {}/{} peers",
            p.session.local_id(),
            connected,
            expected
        );
    }

    for p in &participants {
        let stats = p
            .session
            .send_to_all(json!({ "from": p.session.local_id(), "text": "hello" }))
            .await?;
        info!(
            "{} sent to {}/{} peers",
            p.session.local_id(),
            stats.sent_count,
            stats.total_peers
        );
    }

    for p in &mut participants {
        let received = count_events(&mut p.events, expected, wait, |e| {
            matches!(e, MeshEvent::Data { .. })
        })
        .await;
        info!(
            "{} received {}/{} messages",
            p.session.local_id(),
            received,
            expected
        );
    }

    for p in &participants {
        for info in p.session.peers().await? {
            info!(
                "{} -> {}: {:?} {:?}",
                p.session.local_id(),
                info.peer_id,
                info.role,
                info.state
            );
        }
    }

    for p in &participants {
        let failures = p.session.destroy_session().await?;
        for failure in failures {
            warn!("{}: {}", p.session.local_id(), failure);
        }
    }

    info!("Demo finished, {} links left", transport.link_count().await);

    Ok(())
}

/// Count matching events until `target` is reached or `wait` elapses
async fn count_events(
    events: &mut broadcast::Receiver<MeshEvent>,
    target: usize,
    wait: Duration,
    matches: impl Fn(&MeshEvent) -> bool,
) -> usize {
    let mut count = 0;
    let deadline = tokio::time::Instant::now() + wait;

    while count < target {
        match tokio::time::timeout_at(deadline, events.recv()).await {
            Ok(Ok(event)) if matches(&event) => count += 1,
            Ok(Ok(_)) => {}
            Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                warn!("Event receiver lagged, {} events skipped", skipped);
            }
            Ok(Err(broadcast::error::RecvError::Closed)) | Err(_) => break,
        }
    }

    count
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,remotemedia_mesh=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
