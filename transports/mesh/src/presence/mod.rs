//! Nickname presence layer
//!
//! Built purely on the public session API: nicknames travel as room-wide
//! broadcasts and the directory keeps a one-to-one map between peer ids and
//! display names.
//!
//! ```text
//! MeshSession ──MeshEvent──▶ NicknameDirectory ──PresenceUpdate──▶ application
//!      ▲                           │
//!      └────── broadcast ──────────┘ (nickname announcements)
//! ```

pub mod bimap;

pub use bimap::BiMap;

use crate::events::MeshEvent;
use crate::peer::PeerId;
use crate::session::MeshSession;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Broadcast payloads understood by the presence layer
///
/// Payloads of any other shape are kept verbatim in `Unrecognized`.
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceMessage {
    /// A peer announces its display name
    Nickname {
        /// Announcing peer
        id: PeerId,
        /// Display name
        nickname: String,
    },

    /// Any other broadcast payload
    Unrecognized(serde_json::Value),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Wire {
    Nickname { id: PeerId, nickname: String },
}

impl PresenceMessage {
    /// Classify a broadcast payload
    pub fn parse(payload: &serde_json::Value) -> Self {
        match serde_json::from_value::<Wire>(payload.clone()) {
            Ok(Wire::Nickname { id, nickname }) => PresenceMessage::Nickname { id, nickname },
            Err(_) => PresenceMessage::Unrecognized(payload.clone()),
        }
    }

    /// Encode for broadcasting
    pub fn to_value(&self) -> Result<serde_json::Value> {
        match self {
            PresenceMessage::Nickname { id, nickname } => Ok(serde_json::to_value(Wire::Nickname {
                id: id.clone(),
                nickname: nickname.clone(),
            })?),
            PresenceMessage::Unrecognized(payload) => Ok(payload.clone()),
        }
    }
}

/// Change reported by [`NicknameDirectory::handle_event`]
#[derive(Debug, Clone, PartialEq)]
pub enum PresenceUpdate {
    /// A peer announced or changed its nickname, or reconnected under its
    /// last known one
    Named {
        /// Announcing peer
        peer_id: PeerId,
        /// New display name
        nickname: String,
    },

    /// A named peer's connection closed
    Departed {
        /// Departed peer
        peer_id: PeerId,
        /// Its last display name
        nickname: String,
    },

    /// Broadcast payload the presence layer does not interpret
    Passthrough(serde_json::Value),
}

/// Directory of peer nicknames for one session
///
/// A closed link only parks the peer's nickname. Upgrades and reinitiation
/// close a link and rebuild it moments later, so a `Connect` from the same
/// peer brings the parked name back.
pub struct NicknameDirectory {
    session: MeshSession,
    nickname: String,
    names: BiMap<PeerId, String>,
    parked: HashMap<PeerId, String>,
}

impl NicknameDirectory {
    /// Create a directory announcing the local peer as `nickname`
    pub fn new(session: MeshSession, nickname: impl Into<String>) -> Self {
        Self {
            session,
            nickname: nickname.into(),
            names: BiMap::new(),
            parked: HashMap::new(),
        }
    }

    /// Local display name
    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    /// Broadcast the local nickname to the room
    pub async fn announce(&self) -> Result<()> {
        let message = PresenceMessage::Nickname {
            id: self.session.local_id().clone(),
            nickname: self.nickname.clone(),
        };
        self.session.broadcast(message.to_value()?).await
    }

    /// Change the local nickname and announce it
    pub async fn rename(&mut self, nickname: impl Into<String>) -> Result<()> {
        self.nickname = nickname.into();
        self.announce().await
    }

    /// Nickname of a remote peer
    pub fn nickname_of(&self, peer_id: &PeerId) -> Option<&str> {
        self.names.get_by_left(peer_id).map(String::as_str)
    }

    /// Remote peer currently using `nickname`
    pub fn peer_for(&self, nickname: &str) -> Option<&PeerId> {
        self.names.get_by_right(&nickname.to_string())
    }

    /// Every known (peer, nickname) pair
    pub fn entries(&self) -> impl Iterator<Item = (&PeerId, &String)> {
        self.names.iter()
    }

    /// Feed a session event into the directory
    ///
    /// `Ready`, `PeerJoined` and `Connect` trigger a re-announcement so
    /// newcomers and rebuilt links learn the local nickname.
    pub async fn handle_event(&mut self, event: &MeshEvent) -> Result<Option<PresenceUpdate>> {
        match event {
            MeshEvent::Ready | MeshEvent::PeerJoined(_) => {
                self.announce().await?;
                Ok(None)
            }
            MeshEvent::Connect(peer_id) => {
                self.announce().await?;
                Ok(self.restore(peer_id))
            }
            MeshEvent::Broadcast(payload) => Ok(self.apply(PresenceMessage::parse(payload))),
            MeshEvent::Close(peer_id) => {
                let Some(nickname) = self.names.remove_by_left(peer_id) else {
                    return Ok(None);
                };
                self.parked.insert(peer_id.clone(), nickname.clone());
                Ok(Some(PresenceUpdate::Departed {
                    peer_id: peer_id.clone(),
                    nickname,
                }))
            }
            _ => Ok(None),
        }
    }

    fn restore(&mut self, peer_id: &PeerId) -> Option<PresenceUpdate> {
        let nickname = self.parked.remove(peer_id)?;
        if self.names.get_by_left(peer_id).is_some() || self.names.get_by_right(&nickname).is_some()
        {
            return None;
        }
        debug!("{} reconnected as {}", peer_id, nickname);
        self.names.insert(peer_id.clone(), nickname.clone());
        Some(PresenceUpdate::Named {
            peer_id: peer_id.clone(),
            nickname,
        })
    }

    fn apply(&mut self, message: PresenceMessage) -> Option<PresenceUpdate> {
        match message {
            PresenceMessage::Nickname { id, .. } if id == *self.session.local_id() => None,
            PresenceMessage::Nickname { id, nickname } => {
                self.parked.remove(&id);
                if self.nickname_of(&id) == Some(nickname.as_str()) {
                    return None;
                }
                for (peer, name) in self.names.insert(id.clone(), nickname.clone()) {
                    if peer != id {
                        debug!("{} lost nickname {} to {}", peer, name, id);
                    }
                }
                Some(PresenceUpdate::Named {
                    peer_id: id,
                    nickname,
                })
            }
            PresenceMessage::Unrecognized(payload) => Some(PresenceUpdate::Passthrough(payload)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MeshConfig, NegotiationPolicy};
    use crate::signaling::MemoryRelayHub;
    use crate::transport::memory::MemoryTransport;
    use serde_json::json;
    use std::sync::Arc;

    async fn directory(nickname: &str) -> NicknameDirectory {
        let hub = MemoryRelayHub::new();
        let (relay, inbound) = hub.connect();
        let config = MeshConfig::new("ws://localhost:8080", "r")
            .with_peer_id("me")
            .with_policy(NegotiationPolicy {
                autoconnect: false,
                ..Default::default()
            });
        let (session, _events) =
            MeshSession::start(config, relay, inbound, Arc::new(MemoryTransport::new()))
                .await
                .unwrap();
        NicknameDirectory::new(session, nickname)
    }

    fn nickname(id: &str, name: &str) -> MeshEvent {
        MeshEvent::Broadcast(json!({"type": "nickname", "id": id, "nickname": name}))
    }

    #[test]
    fn test_parse_nickname_and_passthrough() {
        let parsed = PresenceMessage::parse(&json!({"type": "nickname", "id": "a", "nickname": "Ann"}));
        assert_eq!(
            parsed,
            PresenceMessage::Nickname {
                id: PeerId::from("a"),
                nickname: "Ann".to_string()
            }
        );
        assert_eq!(parsed.to_value().unwrap()["type"], "nickname");

        let other = json!({"type": "cursor", "x": 3});
        assert_eq!(
            PresenceMessage::parse(&other),
            PresenceMessage::Unrecognized(other.clone())
        );
        assert_eq!(PresenceMessage::Unrecognized(other.clone()).to_value().unwrap(), other);

        // Known type with the wrong shape is not interpreted
        let broken = json!({"type": "nickname", "id": 7});
        assert!(matches!(
            PresenceMessage::parse(&broken),
            PresenceMessage::Unrecognized(_)
        ));
    }

    #[tokio::test]
    async fn test_names_and_departures() {
        let mut dir = directory("Me").await;

        let update = dir.handle_event(&nickname("a", "Ann")).await.unwrap();
        assert_eq!(
            update,
            Some(PresenceUpdate::Named {
                peer_id: PeerId::from("a"),
                nickname: "Ann".to_string()
            })
        );
        assert_eq!(dir.nickname_of(&PeerId::from("a")), Some("Ann"));
        assert_eq!(dir.peer_for("Ann"), Some(&PeerId::from("a")));

        // Repeated announcement changes nothing
        assert_eq!(dir.handle_event(&nickname("a", "Ann")).await.unwrap(), None);

        let update = dir
            .handle_event(&MeshEvent::Close(PeerId::from("a")))
            .await
            .unwrap();
        assert!(matches!(update, Some(PresenceUpdate::Departed { .. })));
        assert_eq!(dir.peer_for("Ann"), None);
    }

    #[tokio::test]
    async fn test_rebuilt_link_keeps_nickname() {
        let mut dir = directory("Me").await;
        let a = PeerId::from("a");
        dir.handle_event(&nickname("a", "Ann")).await.unwrap();

        dir.handle_event(&MeshEvent::Close(a.clone())).await.unwrap();
        assert_eq!(dir.nickname_of(&a), None);

        let update = dir.handle_event(&MeshEvent::Connect(a.clone())).await.unwrap();
        assert_eq!(
            update,
            Some(PresenceUpdate::Named {
                peer_id: a.clone(),
                nickname: "Ann".to_string()
            })
        );
        assert_eq!(dir.nickname_of(&a), Some("Ann"));

        // Parked name is used once
        dir.handle_event(&MeshEvent::Close(a.clone())).await.unwrap();
        dir.handle_event(&nickname("b", "Ann")).await.unwrap();
        assert_eq!(dir.handle_event(&MeshEvent::Connect(a.clone())).await.unwrap(), None);
        assert_eq!(dir.peer_for("Ann"), Some(&PeerId::from("b")));
    }

    #[tokio::test]
    async fn test_name_taken_over_by_another_peer() {
        let mut dir = directory("Me").await;
        dir.handle_event(&nickname("a", "Ann")).await.unwrap();
        dir.handle_event(&nickname("b", "Ann")).await.unwrap();

        assert_eq!(dir.peer_for("Ann"), Some(&PeerId::from("b")));
        assert_eq!(dir.nickname_of(&PeerId::from("a")), None);
        assert_eq!(dir.entries().count(), 1);
    }

    #[tokio::test]
    async fn test_own_announcement_and_other_events_ignored() {
        let mut dir = directory("Me").await;

        assert_eq!(dir.handle_event(&nickname("me", "Me")).await.unwrap(), None);
        assert_eq!(
            dir.handle_event(&MeshEvent::Connect(PeerId::from("a")))
                .await
                .unwrap(),
            None
        );
        assert_eq!(
            dir.handle_event(&MeshEvent::Broadcast(json!([1, 2])))
                .await
                .unwrap(),
            Some(PresenceUpdate::Passthrough(json!([1, 2])))
        );
        assert_eq!(dir.entries().count(), 0);

        dir.rename("Myself").await.unwrap();
        assert_eq!(dir.nickname(), "Myself");
    }
}
