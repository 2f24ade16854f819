//! Local media tracks.
//!
//! Capture itself lives outside this crate; a [`MediaSource`] only has to hand
//! out track descriptors that a peer connection can attach.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: MediaKind,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("media capture denied: {0}")]
    Denied(String),
    #[error("no media requested")]
    NothingRequested,
    #[error("media device error: {0}")]
    Device(String),
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn acquire(&self) -> Result<Vec<LocalTrack>, MediaError>;

    /// Stop every track handed out by `acquire`.
    async fn release(&self);
}

/// Announces placeholder tracks without touching any capture device.
#[derive(Debug, Clone)]
pub struct SyntheticMediaSource {
    audio: bool,
    video: bool,
    stream_id: String,
}

impl SyntheticMediaSource {
    pub fn new(audio: bool, video: bool) -> Self {
        Self {
            audio,
            video,
            stream_id: format!("relaycall-{}", uuid::Uuid::new_v4().simple()),
        }
    }
}

#[async_trait]
impl MediaSource for SyntheticMediaSource {
    async fn acquire(&self) -> Result<Vec<LocalTrack>, MediaError> {
        let mut tracks = Vec::new();
        if self.audio {
            tracks.push(LocalTrack {
                id: "audio0".into(),
                stream_id: self.stream_id.clone(),
                kind: MediaKind::Audio,
            });
        }
        if self.video {
            tracks.push(LocalTrack {
                id: "video0".into(),
                stream_id: self.stream_id.clone(),
                kind: MediaKind::Video,
            });
        }
        if tracks.is_empty() {
            return Err(MediaError::NothingRequested);
        }
        tracing::debug!(target: "media", count = tracks.len(), "local tracks ready");
        Ok(tracks)
    }

    async fn release(&self) {
        tracing::debug!(target: "media", stream = %self.stream_id, "local tracks released");
    }
}
