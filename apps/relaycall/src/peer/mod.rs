//! Per-participant negotiation: the peer-connection seam, the session state
//! machine driving it and the registry that owns one session task per remote
//! participant.

pub mod mock;
pub mod registry;
pub mod rtc;
pub mod session;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::media::{LocalTrack, MediaKind};
use crate::wire::{IceCandidate, SessionDescription};

pub use registry::{SessionHandle, SessionRegistry};
pub use session::{
    CloseReason, GlareOutcome, PeerSession, SessionCommand, SessionEvent, SessionEventKind,
    SessionSettings, SessionState, resolve_glare,
};

/// Identity of a participant as assigned by the relay (the `sender` field).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Key used for the single remote party when messages carry no sender.
    pub const DEFAULT: &'static str = "peer";

    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn default_peer() -> Self {
        Self::new(Self::DEFAULT)
    }

    pub fn random() -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string();
        Self(id[..12].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectivityState::New => "new",
            ConnectivityState::Connecting => "connecting",
            ConnectivityState::Connected => "connected",
            ConnectivityState::Disconnected => "disconnected",
            ConnectivityState::Failed => "failed",
            ConnectivityState::Closed => "closed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackInfo {
    pub id: String,
    pub stream_id: String,
    pub kind: MediaKind,
}

/// Asynchronous notifications from a peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    LocalCandidate(IceCandidate),
    Connectivity(ConnectivityState),
    RemoteTrack(RemoteTrackInfo),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub reports: usize,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("failed to create peer connection: {0}")]
    Create(String),
    #[error("failed to attach local track: {0}")]
    Track(String),
    #[error("failed to produce local description: {0}")]
    LocalDescription(String),
    #[error("remote description rejected: {0}")]
    RemoteDescription(String),
    #[error("failed to add ice candidate: {0}")]
    Candidate(String),
    #[error("stats unavailable: {0}")]
    Stats(String),
    #[error("peer connection closed")]
    Closed,
}

/// The negotiation primitives of one real-time connection.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn add_track(&self, track: &LocalTrack) -> Result<(), SessionError>;

    async fn create_offer(&self) -> Result<SessionDescription, SessionError>;

    async fn create_answer(&self) -> Result<SessionDescription, SessionError>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), SessionError>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), SessionError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), SessionError>;

    /// Discard a pending local offer.
    async fn rollback(&self) -> Result<(), SessionError>;

    async fn stats(&self) -> Result<ConnectionStats, SessionError>;

    async fn close(&self) -> Result<(), SessionError>;
}

#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    /// Create a connection for `participant`; its events are delivered on `events`.
    async fn create(
        &self,
        participant: &ParticipantId,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Box<dyn PeerConnection>, SessionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_ids_order_lexicographically() {
        let mut ids = vec![ParticipantId::new("p2"), ParticipantId::new("p10"), ParticipantId::new("a")];
        ids.sort();
        assert_eq!(
            ids.iter().map(ParticipantId::as_str).collect::<Vec<_>>(),
            vec!["a", "p10", "p2"]
        );
    }

    #[test]
    fn random_ids_differ() {
        let first = ParticipantId::random();
        let second = ParticipantId::random();
        assert_eq!(first.as_str().len(), 12);
        assert_ne!(first, second);
    }
}
