//! Media stream handles
//!
//! The mesh never produces or consumes media itself. A [`MediaStream`] is an
//! opaque, read-only description of a stream owned by the application (the
//! local capture) or by the transport (a remote stream delivered to us).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a media track carried by a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Audio track
    Audio,
    /// Video track
    Video,
}

/// Opaque media stream handle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaStream {
    id: String,
    tracks: Vec<TrackKind>,
}

impl MediaStream {
    /// Create a stream description with the given tracks
    pub fn new(id: impl Into<String>, tracks: Vec<TrackKind>) -> Self {
        Self {
            id: id.into(),
            tracks,
        }
    }

    /// Audio + video stream with a generated id
    pub fn audio_video() -> Self {
        Self::new(
            uuid::Uuid::new_v4().to_string(),
            vec![TrackKind::Audio, TrackKind::Video],
        )
    }

    /// Stream identifier
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Tracks in this stream
    pub fn tracks(&self) -> &[TrackKind] {
        &self.tracks
    }

    /// Whether the stream carries a track of `kind`
    pub fn has(&self, kind: TrackKind) -> bool {
        self.tracks.contains(&kind)
    }
}

impl fmt::Display for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} tracks)", self.id, self.tracks.len())
    }
}
