//! In-memory peer connections and media for exercising sessions and the
//! orchestrator without a real-time stack.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{ConnectionStats, ParticipantId, PeerConnection, PeerConnectionFactory, PeerEvent, SessionError};
use crate::media::{LocalTrack, MediaError, MediaSource};
use crate::wire::{IceCandidate, SdpKind, SessionDescription};

/// Operations a [`MockPeer`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    AddTrack,
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
    AddIceCandidate,
    Rollback,
}

/// One recorded call on a [`MockPeer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCall {
    AddTrack(String),
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpKind),
    SetRemote(SdpKind),
    AddCandidate(String),
    Rollback,
    Stats,
    Close,
}

#[derive(Default)]
struct PeerLog {
    calls: Vec<PeerCall>,
    failing: HashSet<MockOp>,
    applied_candidates: Vec<String>,
    remote_sdp: Vec<String>,
    closed: bool,
}

#[derive(Clone)]
pub struct MockPeer {
    participant: ParticipantId,
    events: mpsc::UnboundedSender<PeerEvent>,
    log: Arc<Mutex<PeerLog>>,
}

impl MockPeer {
    pub fn new(participant: ParticipantId, events: mpsc::UnboundedSender<PeerEvent>) -> Self {
        Self {
            participant,
            events,
            log: Arc::new(Mutex::new(PeerLog::default())),
        }
    }

    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    pub fn fail(&self, op: MockOp) {
        self.log.lock().failing.insert(op);
    }

    pub fn succeed(&self, op: MockOp) {
        self.log.lock().failing.remove(&op);
    }

    pub fn calls(&self) -> Vec<PeerCall> {
        self.log.lock().calls.clone()
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.log.lock().applied_candidates.clone()
    }

    /// Sdp bodies of every accepted remote description.
    pub fn remote_descriptions(&self) -> Vec<String> {
        self.log.lock().remote_sdp.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.log.lock().closed
    }

    /// Play the connection side: deliver `event` to the owning session.
    pub fn emit(&self, event: PeerEvent) -> bool {
        self.events.send(event).is_ok()
    }

    fn record(&self, call: PeerCall, op: Option<MockOp>) -> Result<(), String> {
        let mut log = self.log.lock();
        if log.closed {
            return Err("closed".into());
        }
        log.calls.push(call);
        match op {
            Some(op) if log.failing.contains(&op) => Err(format!("mock {op:?} failure")),
            _ => Ok(()),
        }
    }

    fn description(&self, kind: SdpKind) -> SessionDescription {
        let n = self.log.lock().calls.len();
        let label = match kind {
            SdpKind::Offer => "offer",
            SdpKind::Answer => "answer",
            SdpKind::Pranswer => "pranswer",
            SdpKind::Rollback => "rollback",
        };
        SessionDescription {
            kind,
            sdp: format!("mock-{label}-{}-{n}", self.participant),
        }
    }
}

#[async_trait]
impl PeerConnection for MockPeer {
    async fn add_track(&self, track: &LocalTrack) -> Result<(), SessionError> {
        self.record(PeerCall::AddTrack(track.id.clone()), Some(MockOp::AddTrack))
            .map_err(SessionError::Track)
    }

    async fn create_offer(&self) -> Result<SessionDescription, SessionError> {
        self.record(PeerCall::CreateOffer, Some(MockOp::CreateOffer))
            .map_err(SessionError::LocalDescription)?;
        Ok(self.description(SdpKind::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, SessionError> {
        self.record(PeerCall::CreateAnswer, Some(MockOp::CreateAnswer))
            .map_err(SessionError::LocalDescription)?;
        Ok(self.description(SdpKind::Answer))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), SessionError> {
        self.record(PeerCall::SetLocal(description.kind), Some(MockOp::SetLocalDescription))
            .map_err(SessionError::LocalDescription)
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), SessionError> {
        self.record(PeerCall::SetRemote(description.kind), Some(MockOp::SetRemoteDescription))
            .map_err(SessionError::RemoteDescription)?;
        self.log.lock().remote_sdp.push(description.sdp);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), SessionError> {
        self.record(PeerCall::AddCandidate(candidate.candidate.clone()), Some(MockOp::AddIceCandidate))
            .map_err(SessionError::Candidate)?;
        self.log.lock().applied_candidates.push(candidate.candidate);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), SessionError> {
        self.record(PeerCall::Rollback, Some(MockOp::Rollback))
            .map_err(SessionError::LocalDescription)
    }

    async fn stats(&self) -> Result<ConnectionStats, SessionError> {
        self.record(PeerCall::Stats, None).map_err(SessionError::Stats)?;
        Ok(ConnectionStats { reports: 1 })
    }

    async fn close(&self) -> Result<(), SessionError> {
        let mut log = self.log.lock();
        if !log.closed {
            log.calls.push(PeerCall::Close);
            log.closed = true;
        }
        Ok(())
    }
}

/// Hands out [`MockPeer`]s and keeps a handle to each for inspection.
#[derive(Default)]
pub struct MockPeerFactory {
    peers: Mutex<Vec<MockPeer>>,
    refuse_next: Mutex<Option<String>>,
    failing: Mutex<HashSet<MockOp>>,
}

impl MockPeerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refuse_next(&self, reason: impl Into<String>) {
        *self.refuse_next.lock() = Some(reason.into());
    }

    /// Every peer created from now on fails `op`.
    pub fn fail_all(&self, op: MockOp) {
        self.failing.lock().insert(op);
    }

    pub fn created(&self) -> usize {
        self.peers.lock().len()
    }

    pub fn peers(&self) -> Vec<MockPeer> {
        self.peers.lock().clone()
    }

    /// Most recent peer created for `participant`.
    pub fn peer(&self, participant: &ParticipantId) -> Option<MockPeer> {
        self.peers
            .lock()
            .iter()
            .rev()
            .find(|peer| &peer.participant == participant)
            .cloned()
    }
}

#[async_trait]
impl PeerConnectionFactory for MockPeerFactory {
    async fn create(
        &self,
        participant: &ParticipantId,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Box<dyn PeerConnection>, SessionError> {
        if let Some(reason) = self.refuse_next.lock().take() {
            return Err(SessionError::Create(reason));
        }
        let peer = MockPeer::new(participant.clone(), events);
        for op in self.failing.lock().iter() {
            peer.fail(*op);
        }
        self.peers.lock().push(peer.clone());
        Ok(Box::new(peer))
    }
}

/// [`MediaSource`] returning fixed tracks, or a fixed error.
pub struct MockMediaSource {
    result: Result<Vec<LocalTrack>, MediaError>,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl MockMediaSource {
    pub fn new(tracks: Vec<LocalTrack>) -> Arc<Self> {
        Arc::new(Self {
            result: Ok(tracks),
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        })
    }

    pub fn failing(error: MediaError) -> Arc<Self> {
        Arc::new(Self {
            result: Err(error),
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        })
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for MockMediaSource {
    async fn acquire(&self) -> Result<Vec<LocalTrack>, MediaError> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        self.result.clone()
    }

    async fn release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}
