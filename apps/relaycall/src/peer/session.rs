use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::{
    ConnectivityState, ParticipantId, PeerConnection, PeerEvent, RemoteTrackInfo, SessionError,
};
use crate::timer::{Scheduler, TimerHandle};
use crate::wire::{IceCandidate, SessionDescription, SignalPayload};

pub const DEFAULT_DISCONNECT_GRACE: Duration = Duration::from_millis(5_000);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Our own id, compared against the remote sender to settle glare.
    pub local_id: ParticipantId,
    pub disconnect_grace: Duration,
}

impl SessionSettings {
    pub fn new(local_id: ParticipantId) -> Self {
        Self {
            local_id,
            disconnect_grace: DEFAULT_DISCONNECT_GRACE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    HaveLocalOffer,
    HaveRemoteOffer,
    Negotiating,
    Stable,
    Disconnected,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::New => "new",
            SessionState::HaveLocalOffer => "have-local-offer",
            SessionState::HaveRemoteOffer => "have-remote-offer",
            SessionState::Negotiating => "negotiating",
            SessionState::Stable => "stable",
            SessionState::Disconnected => "disconnected",
            SessionState::Closed => "closed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Deliberate call initiation: create and send an offer.
    Start,
    /// A negotiation message from the remote participant. `tie_break` is the
    /// sender id used to settle glare.
    Signal {
        payload: SignalPayload,
        tie_break: ParticipantId,
    },
    GraceExpired {
        epoch: u64,
    },
    Diagnostics,
    Hangup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Hangup,
    ConnectionFailed,
    ConnectionClosed,
    GraceExpired,
    Failed(SessionError),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Hangup => f.write_str("hung up"),
            CloseReason::ConnectionFailed => f.write_str("connection failed"),
            CloseReason::ConnectionClosed => f.write_str("connection closed"),
            CloseReason::GraceExpired => f.write_str("disconnected too long"),
            CloseReason::Failed(err) => write!(f, "{err}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEventKind {
    LocalDescription(SessionDescription),
    LocalCandidate(IceCandidate),
    StateChanged(SessionState),
    RemoteTrack(RemoteTrackInfo),
    Closed(CloseReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub participant: ParticipantId,
    pub generation: u64,
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlareOutcome {
    AcceptRemote,
    KeepLocal,
}

/// Both sides sent offers. The offer from the lexicographically lower id wins;
/// equal ids accept the remote offer.
pub fn resolve_glare(local: &ParticipantId, remote: &ParticipantId) -> GlareOutcome {
    if remote <= local {
        GlareOutcome::AcceptRemote
    } else {
        GlareOutcome::KeepLocal
    }
}

/// Offer/answer/ICE state machine for one remote participant.
///
/// Commands are processed strictly one at a time, so a session never runs two
/// local-description negotiations concurrently.
pub struct PeerSession {
    participant: ParticipantId,
    generation: u64,
    settings: SessionSettings,
    state: SessionState,
    connection: Box<dyn PeerConnection>,
    remote_description_set: bool,
    pending_candidates: VecDeque<IceCandidate>,
    grace_epoch: u64,
    grace: Option<TimerHandle>,
    scheduler: Arc<dyn Scheduler>,
    mailbox: mpsc::WeakUnboundedSender<SessionCommand>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl PeerSession {
    pub fn new(
        participant: ParticipantId,
        generation: u64,
        settings: SessionSettings,
        connection: Box<dyn PeerConnection>,
        scheduler: Arc<dyn Scheduler>,
        mailbox: mpsc::WeakUnboundedSender<SessionCommand>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            participant,
            generation,
            settings,
            state: SessionState::New,
            connection,
            remote_description_set: false,
            pending_candidates: VecDeque::new(),
            grace_epoch: 0,
            grace: None,
            scheduler,
            mailbox,
            events,
        }
    }

    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    /// Process commands and connection events until the session closes or its
    /// mailbox is dropped.
    pub async fn run(
        mut self,
        mut mailbox: mpsc::UnboundedReceiver<SessionCommand>,
        mut peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    ) {
        let mut peer_events_open = true;
        while self.state != SessionState::Closed {
            tokio::select! {
                command = mailbox.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => self.close(CloseReason::Hangup).await,
                },
                event = peer_events.recv(), if peer_events_open => match event {
                    Some(event) => self.on_peer_event(event).await,
                    None => peer_events_open = false,
                },
            }
        }
        tracing::debug!(target: "session", participant = %self.participant, generation = self.generation, "session task finished");
    }

    pub async fn handle(&mut self, command: SessionCommand) {
        if self.state == SessionState::Closed {
            tracing::trace!(target: "session", participant = %self.participant, ?command, "session closed; command ignored");
            return;
        }
        match command {
            SessionCommand::Start => self.start_offer().await,
            SessionCommand::Signal { payload, tie_break } => match payload {
                SignalPayload::Offer(offer) => self.on_remote_offer(offer, &tie_break).await,
                SignalPayload::Answer(answer) => self.on_remote_answer(answer).await,
                SignalPayload::Candidate(candidate) => self.on_remote_candidate(candidate).await,
                SignalPayload::Join | SignalPayload::Bye => {
                    tracing::debug!(target: "session", participant = %self.participant, kind = payload.label(), "room message not handled by session");
                }
            },
            SessionCommand::GraceExpired { epoch } => self.on_grace_expired(epoch).await,
            SessionCommand::Diagnostics => self.log_stats().await,
            SessionCommand::Hangup => self.close(CloseReason::Hangup).await,
        }
    }

    pub async fn on_peer_event(&mut self, event: PeerEvent) {
        if self.state == SessionState::Closed {
            return;
        }
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                self.emit(SessionEventKind::LocalCandidate(candidate));
            }
            PeerEvent::Connectivity(connectivity) => self.on_connectivity(connectivity).await,
            PeerEvent::RemoteTrack(track) => {
                tracing::info!(target: "session", participant = %self.participant, kind = %track.kind, track = %track.id, "remote track");
                self.emit(SessionEventKind::RemoteTrack(track));
            }
        }
    }

    async fn start_offer(&mut self) {
        if self.state != SessionState::New {
            tracing::warn!(target: "session", participant = %self.participant, state = %self.state, "negotiation already under way; start ignored");
            return;
        }
        let offer = match self.connection.create_offer().await {
            Ok(offer) => offer,
            Err(err) => return self.fail(err).await,
        };
        if let Err(err) = self.connection.set_local_description(offer.clone()).await {
            return self.fail(err).await;
        }
        tracing::info!(target: "session", participant = %self.participant, "offer created");
        self.emit(SessionEventKind::LocalDescription(offer));
        self.set_state(SessionState::HaveLocalOffer);
    }

    async fn on_remote_offer(&mut self, offer: SessionDescription, tie_break: &ParticipantId) {
        match self.state {
            SessionState::New => {}
            SessionState::HaveLocalOffer => {
                match resolve_glare(&self.settings.local_id, tie_break) {
                    GlareOutcome::KeepLocal => {
                        tracing::info!(target: "session", participant = %self.participant, remote = %tie_break, "offer collision; keeping local offer");
                        return;
                    }
                    GlareOutcome::AcceptRemote => {
                        tracing::info!(target: "session", participant = %self.participant, remote = %tie_break, "offer collision; rolling back local offer");
                        if let Err(err) = self.connection.rollback().await {
                            return self.fail(err).await;
                        }
                    }
                }
            }
            state => {
                tracing::warn!(target: "session", participant = %self.participant, %state, "unexpected offer ignored");
                return;
            }
        }

        if let Err(err) = self.connection.set_remote_description(offer).await {
            return self.fail(err).await;
        }
        self.remote_description_set = true;
        self.set_state(SessionState::HaveRemoteOffer);
        self.flush_candidates().await;

        let answer = match self.connection.create_answer().await {
            Ok(answer) => answer,
            Err(err) => return self.fail(err).await,
        };
        if let Err(err) = self.connection.set_local_description(answer.clone()).await {
            return self.fail(err).await;
        }
        tracing::info!(target: "session", participant = %self.participant, "answer created");
        self.emit(SessionEventKind::LocalDescription(answer));
        self.set_state(SessionState::Stable);
    }

    async fn on_remote_answer(&mut self, answer: SessionDescription) {
        if self.state != SessionState::HaveLocalOffer {
            tracing::warn!(target: "session", participant = %self.participant, state = %self.state, "unexpected answer ignored");
            return;
        }
        self.set_state(SessionState::Negotiating);
        if let Err(err) = self.connection.set_remote_description(answer).await {
            return self.fail(err).await;
        }
        self.remote_description_set = true;
        self.flush_candidates().await;
        self.set_state(SessionState::Stable);
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        if !self.remote_description_set {
            self.pending_candidates.push_back(candidate);
            tracing::debug!(target: "session", participant = %self.participant, buffered = self.pending_candidates.len(), "candidate buffered until remote description");
            return;
        }
        self.apply_candidate(candidate).await;
    }

    async fn flush_candidates(&mut self) {
        while let Some(candidate) = self.pending_candidates.pop_front() {
            self.apply_candidate(candidate).await;
        }
    }

    async fn apply_candidate(&mut self, candidate: IceCandidate) {
        if let Err(err) = self.connection.add_ice_candidate(candidate).await {
            tracing::warn!(target: "session", participant = %self.participant, error = %err, "addIceCandidate failed");
        }
    }

    async fn on_connectivity(&mut self, connectivity: ConnectivityState) {
        tracing::info!(target: "session", participant = %self.participant, %connectivity, "connection state");
        match connectivity {
            ConnectivityState::Connected => {
                if self.state == SessionState::Disconnected {
                    self.cancel_grace();
                    self.set_state(SessionState::Stable);
                }
            }
            ConnectivityState::Disconnected => {
                if self.state != SessionState::Disconnected {
                    self.set_state(SessionState::Disconnected);
                    self.arm_grace();
                }
            }
            ConnectivityState::Failed => self.close(CloseReason::ConnectionFailed).await,
            ConnectivityState::Closed => self.close(CloseReason::ConnectionClosed).await,
            ConnectivityState::New | ConnectivityState::Connecting => {}
        }
    }

    fn arm_grace(&mut self) {
        self.cancel_grace();
        self.grace_epoch += 1;
        let epoch = self.grace_epoch;
        let mailbox = self.mailbox.clone();
        let handle = self.scheduler.schedule(
            self.settings.disconnect_grace,
            Box::new(move || {
                if let Some(mailbox) = mailbox.upgrade() {
                    let _ = mailbox.send(SessionCommand::GraceExpired { epoch });
                }
            }),
        );
        self.grace = Some(handle);
    }

    fn cancel_grace(&mut self) {
        if let Some(grace) = self.grace.take() {
            grace.cancel();
        }
    }

    async fn on_grace_expired(&mut self, epoch: u64) {
        if epoch != self.grace_epoch || self.state != SessionState::Disconnected {
            tracing::trace!(target: "session", participant = %self.participant, epoch, "stale grace timer");
            return;
        }
        self.grace = None;
        self.close(CloseReason::GraceExpired).await;
    }

    async fn log_stats(&self) {
        match self.connection.stats().await {
            Ok(stats) => {
                tracing::info!(target: "session", participant = %self.participant, state = %self.state, reports = stats.reports, "connection stats");
            }
            Err(err) => {
                tracing::debug!(target: "session", participant = %self.participant, error = %err, "stats unavailable");
            }
        }
    }

    async fn fail(&mut self, err: SessionError) {
        tracing::error!(target: "session", participant = %self.participant, state = %self.state, error = %err, "negotiation failed");
        self.close(CloseReason::Failed(err)).await;
    }

    async fn close(&mut self, reason: CloseReason) {
        if self.state == SessionState::Closed {
            return;
        }
        self.cancel_grace();
        if let Err(err) = self.connection.close().await {
            tracing::debug!(target: "session", participant = %self.participant, error = %err, "close failed");
        }
        self.pending_candidates.clear();
        self.remote_description_set = false;
        tracing::info!(target: "session", participant = %self.participant, %reason, "session closed");
        self.set_state(SessionState::Closed);
        self.emit(SessionEventKind::Closed(reason));
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        tracing::debug!(target: "session", participant = %self.participant, from = %self.state, to = %next, "session state");
        self.state = next;
        self.emit(SessionEventKind::StateChanged(next));
    }

    fn emit(&self, kind: SessionEventKind) {
        let _ = self.events.send(SessionEvent {
            participant: self.participant.clone(),
            generation: self.generation,
            kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::mock::{MockOp, MockPeer, PeerCall};
    use crate::timer::ManualScheduler;
    use crate::wire::SdpKind;

    const GRACE: Duration = Duration::from_millis(5_000);

    struct Fixture {
        session: PeerSession,
        peer: MockPeer,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        mailbox: mpsc::UnboundedReceiver<SessionCommand>,
        _mailbox_tx: mpsc::UnboundedSender<SessionCommand>,
        scheduler: Arc<ManualScheduler>,
    }

    impl Fixture {
        fn new(local: &str, remote: &str) -> Self {
            let (peer_tx, _peer_rx) = mpsc::unbounded_channel();
            let peer = MockPeer::new(ParticipantId::new(remote), peer_tx);
            let (events_tx, events) = mpsc::unbounded_channel();
            let (mailbox_tx, mailbox) = mpsc::unbounded_channel();
            let scheduler = ManualScheduler::new();
            let settings = SessionSettings {
                local_id: ParticipantId::new(local),
                disconnect_grace: GRACE,
            };
            let session = PeerSession::new(
                ParticipantId::new(remote),
                1,
                settings,
                Box::new(peer.clone()),
                scheduler.clone(),
                mailbox_tx.downgrade(),
                events_tx,
            );
            Self {
                session,
                peer,
                events,
                mailbox,
                _mailbox_tx: mailbox_tx,
                scheduler,
            }
        }

        async fn signal(&mut self, payload: SignalPayload, from: &str) {
            self.session
                .handle(SessionCommand::Signal {
                    payload,
                    tie_break: ParticipantId::new(from),
                })
                .await;
        }

        async fn advance(&mut self, by: Duration) {
            self.scheduler.advance(by);
            while let Ok(command) = self.mailbox.try_recv() {
                self.session.handle(command).await;
            }
        }

        fn kinds(&mut self) -> Vec<SessionEventKind> {
            let mut kinds = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                assert_eq!(event.generation, 1);
                kinds.push(event.kind);
            }
            kinds
        }
    }

    fn candidate(n: u8) -> SignalPayload {
        SignalPayload::Candidate(IceCandidate::new(format!("candidate:{n}")))
    }

    fn offer(sdp: &str) -> SignalPayload {
        SignalPayload::Offer(SessionDescription::offer(sdp))
    }

    #[test]
    fn glare_prefers_lower_id() {
        let p1 = ParticipantId::new("p1");
        let p2 = ParticipantId::new("p2");
        assert_eq!(resolve_glare(&p2, &p1), GlareOutcome::AcceptRemote);
        assert_eq!(resolve_glare(&p1, &p2), GlareOutcome::KeepLocal);
        assert_eq!(resolve_glare(&p1, &p1), GlareOutcome::AcceptRemote);
    }

    #[test_timeout::tokio_timeout_test]
    async fn remote_offer_with_early_candidates_is_answered() {
        let mut f = Fixture::new("me", "peer");
        f.signal(candidate(1), "peer").await;
        f.signal(candidate(2), "peer").await;
        assert_eq!(f.session.pending_candidates(), 2);
        assert!(f.peer.applied_candidates().is_empty());

        f.signal(offer("remote-offer"), "peer").await;

        assert_eq!(
            f.peer.calls(),
            vec![
                PeerCall::SetRemote(SdpKind::Offer),
                PeerCall::AddCandidate("candidate:1".into()),
                PeerCall::AddCandidate("candidate:2".into()),
                PeerCall::CreateAnswer,
                PeerCall::SetLocal(SdpKind::Answer),
            ]
        );
        let kinds = f.kinds();
        assert_eq!(kinds.len(), 3);
        assert_eq!(kinds[0], SessionEventKind::StateChanged(SessionState::HaveRemoteOffer));
        assert!(matches!(
            &kinds[1],
            SessionEventKind::LocalDescription(answer) if answer.kind == SdpKind::Answer
        ));
        assert_eq!(kinds[2], SessionEventKind::StateChanged(SessionState::Stable));
        assert_eq!(f.session.pending_candidates(), 0);

        f.signal(candidate(3), "peer").await;
        assert_eq!(
            f.peer.applied_candidates(),
            vec!["candidate:1", "candidate:2", "candidate:3"]
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn local_offer_then_remote_answer() {
        let mut f = Fixture::new("me", "peer");
        f.session.handle(SessionCommand::Start).await;
        assert_eq!(f.session.state(), SessionState::HaveLocalOffer);
        f.signal(candidate(1), "peer").await;
        assert_eq!(f.session.pending_candidates(), 1);

        f.signal(
            SignalPayload::Answer(SessionDescription::answer("remote-answer")),
            "peer",
        )
        .await;
        assert_eq!(f.session.state(), SessionState::Stable);
        assert_eq!(
            f.peer.calls(),
            vec![
                PeerCall::CreateOffer,
                PeerCall::SetLocal(SdpKind::Offer),
                PeerCall::SetRemote(SdpKind::Answer),
                PeerCall::AddCandidate("candidate:1".into()),
            ]
        );
        let states: Vec<_> = f
            .kinds()
            .into_iter()
            .filter_map(|kind| match kind {
                SessionEventKind::StateChanged(state) => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                SessionState::HaveLocalOffer,
                SessionState::Negotiating,
                SessionState::Stable
            ]
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn glare_from_lower_id_rolls_back_and_answers() {
        let mut f = Fixture::new("p2", "p1");
        f.session.handle(SessionCommand::Start).await;
        f.signal(offer("their-offer"), "p1").await;
        assert_eq!(f.session.state(), SessionState::Stable);
        assert_eq!(
            f.peer.calls()[2..],
            [
                PeerCall::Rollback,
                PeerCall::SetRemote(SdpKind::Offer),
                PeerCall::CreateAnswer,
                PeerCall::SetLocal(SdpKind::Answer),
            ]
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn glare_from_higher_id_keeps_local_offer() {
        let mut f = Fixture::new("p1", "p2");
        f.session.handle(SessionCommand::Start).await;
        f.signal(offer("their-offer"), "p2").await;
        assert_eq!(f.session.state(), SessionState::HaveLocalOffer);
        assert_eq!(
            f.peer.calls(),
            vec![PeerCall::CreateOffer, PeerCall::SetLocal(SdpKind::Offer)]
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn out_of_state_descriptions_are_ignored() {
        let mut f = Fixture::new("me", "peer");
        f.signal(
            SignalPayload::Answer(SessionDescription::answer("stray")),
            "peer",
        )
        .await;
        assert_eq!(f.session.state(), SessionState::New);
        assert!(f.peer.calls().is_empty());

        f.signal(offer("first"), "peer").await;
        assert_eq!(f.session.state(), SessionState::Stable);
        let before = f.peer.calls().len();
        f.signal(offer("renegotiate"), "peer").await;
        f.session.handle(SessionCommand::Start).await;
        assert_eq!(f.peer.calls().len(), before);
        assert_eq!(f.session.state(), SessionState::Stable);
    }

    #[test_timeout::tokio_timeout_test]
    async fn rejected_remote_description_closes_session() {
        let mut f = Fixture::new("me", "peer");
        f.peer.fail(MockOp::SetRemoteDescription);
        f.signal(candidate(1), "peer").await;
        f.signal(offer("bad"), "peer").await;

        assert_eq!(f.session.state(), SessionState::Closed);
        assert!(f.peer.is_closed());
        assert_eq!(f.session.pending_candidates(), 0);
        let kinds = f.kinds();
        assert!(matches!(
            kinds.last(),
            Some(SessionEventKind::Closed(CloseReason::Failed(SessionError::RemoteDescription(_))))
        ));

        let calls = f.peer.calls().len();
        f.signal(candidate(2), "peer").await;
        f.session.handle(SessionCommand::Start).await;
        assert_eq!(f.peer.calls().len(), calls);
        assert!(f.kinds().is_empty());
    }

    #[test_timeout::tokio_timeout_test]
    async fn candidate_failures_do_not_end_the_session() {
        let mut f = Fixture::new("me", "peer");
        f.signal(offer("ok"), "peer").await;
        f.peer.fail(MockOp::AddIceCandidate);
        f.signal(candidate(1), "peer").await;
        assert_eq!(f.session.state(), SessionState::Stable);
        f.peer.succeed(MockOp::AddIceCandidate);
        f.signal(candidate(2), "peer").await;
        assert_eq!(f.peer.applied_candidates(), vec!["candidate:2"]);
    }

    #[test_timeout::tokio_timeout_test]
    async fn disconnect_recovers_within_grace_and_closes_after() {
        let mut f = Fixture::new("me", "peer");
        f.signal(offer("ok"), "peer").await;

        f.session
            .on_peer_event(PeerEvent::Connectivity(ConnectivityState::Disconnected))
            .await;
        assert_eq!(f.session.state(), SessionState::Disconnected);
        f.advance(GRACE - Duration::from_millis(1)).await;
        assert_eq!(f.session.state(), SessionState::Disconnected);
        f.session
            .on_peer_event(PeerEvent::Connectivity(ConnectivityState::Connected))
            .await;
        assert_eq!(f.session.state(), SessionState::Stable);
        f.advance(GRACE).await;
        assert_eq!(f.session.state(), SessionState::Stable);

        f.session
            .on_peer_event(PeerEvent::Connectivity(ConnectivityState::Disconnected))
            .await;
        f.kinds();
        f.advance(GRACE).await;
        assert_eq!(f.session.state(), SessionState::Closed);
        assert_eq!(
            f.kinds(),
            vec![
                SessionEventKind::StateChanged(SessionState::Closed),
                SessionEventKind::Closed(CloseReason::GraceExpired),
            ]
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn failed_connectivity_closes_immediately() {
        let mut f = Fixture::new("me", "peer");
        f.signal(offer("ok"), "peer").await;
        f.session
            .on_peer_event(PeerEvent::Connectivity(ConnectivityState::Failed))
            .await;
        assert_eq!(f.session.state(), SessionState::Closed);
        assert!(matches!(
            f.kinds().last(),
            Some(SessionEventKind::Closed(CloseReason::ConnectionFailed))
        ));
    }

    #[test_timeout::tokio_timeout_test]
    async fn hangup_drops_buffered_candidates() {
        let mut f = Fixture::new("me", "peer");
        f.signal(candidate(1), "peer").await;
        f.session.handle(SessionCommand::Hangup).await;
        assert_eq!(f.session.state(), SessionState::Closed);
        assert_eq!(f.session.pending_candidates(), 0);
        assert_eq!(f.peer.calls(), vec![PeerCall::Close]);

        f.signal(offer("late"), "peer").await;
        assert_eq!(f.peer.calls(), vec![PeerCall::Close]);
    }

    #[test_timeout::tokio_timeout_test]
    async fn local_candidates_and_tracks_are_forwarded() {
        let mut f = Fixture::new("me", "peer");
        f.session
            .on_peer_event(PeerEvent::LocalCandidate(IceCandidate::new("mine")))
            .await;
        let track = RemoteTrackInfo {
            id: "t1".into(),
            stream_id: "s1".into(),
            kind: crate::media::MediaKind::Audio,
        };
        f.session
            .on_peer_event(PeerEvent::RemoteTrack(track.clone()))
            .await;
        assert_eq!(
            f.kinds(),
            vec![
                SessionEventKind::LocalCandidate(IceCandidate::new("mine")),
                SessionEventKind::RemoteTrack(track),
            ]
        );
    }
}
