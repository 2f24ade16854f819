use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::session::{CloseReason, PeerSession, SessionCommand, SessionEvent, SessionEventKind, SessionSettings};
use super::{ParticipantId, PeerConnectionFactory};
use crate::media::LocalTrack;
use crate::timer::Scheduler;

/// Closed ids remembered so late traffic for them is dropped; the oldest
/// is forgotten first.
pub const RETIRED_CAPACITY: usize = 64;

/// Mailbox of one running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    generation: u64,
    mailbox: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue `command`; false once the session task has finished.
    pub fn send(&self, command: SessionCommand) -> bool {
        self.mailbox.send(command).is_ok()
    }
}

/// Participant id to running session. Each session is a task with its own
/// ordered mailbox, so messages for one participant are handled in arrival
/// order while different participants proceed independently.
pub struct SessionRegistry {
    settings: SessionSettings,
    factory: Arc<dyn PeerConnectionFactory>,
    scheduler: Arc<dyn Scheduler>,
    events: mpsc::UnboundedSender<SessionEvent>,
    sessions: HashMap<ParticipantId, SessionHandle>,
    retired: VecDeque<ParticipantId>,
    local_tracks: Vec<LocalTrack>,
    next_generation: u64,
}

impl SessionRegistry {
    pub fn new(
        settings: SessionSettings,
        factory: Arc<dyn PeerConnectionFactory>,
        scheduler: Arc<dyn Scheduler>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let registry = Self {
            settings,
            factory,
            scheduler,
            events,
            sessions: HashMap::new(),
            retired: VecDeque::new(),
            local_tracks: Vec::new(),
            next_generation: 0,
        };
        (registry, events_rx)
    }

    /// Tracks attached to every session created from now on.
    pub fn set_local_tracks(&mut self, tracks: Vec<LocalTrack>) {
        self.local_tracks = tracks;
    }

    pub fn get(&self, participant: &ParticipantId) -> Option<&SessionHandle> {
        self.sessions.get(participant)
    }

    /// True if `generation` is the live session for `participant`.
    pub fn is_current(&self, participant: &ParticipantId, generation: u64) -> bool {
        self.sessions
            .get(participant)
            .is_some_and(|handle| handle.generation == generation)
    }

    pub fn is_retired(&self, participant: &ParticipantId) -> bool {
        self.retired.contains(participant)
    }

    pub fn ids(&self) -> Vec<ParticipantId> {
        let mut ids: Vec<_> = self.sessions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Existing session for `participant`, or a freshly spawned one. A
    /// retired id is revived.
    pub fn get_or_create(&mut self, participant: &ParticipantId) -> &SessionHandle {
        if !self.sessions.contains_key(participant) {
            let handle = self.spawn(participant.clone());
            self.retired.retain(|id| id != participant);
            self.sessions.insert(participant.clone(), handle);
        }
        &self.sessions[participant]
    }

    /// Hang up and forget the session for `participant`.
    pub fn remove(&mut self, participant: &ParticipantId) -> bool {
        match self.sessions.remove(participant) {
            Some(handle) => {
                handle.send(SessionCommand::Hangup);
                self.retire(participant.clone());
                tracing::debug!(target: "session", %participant, generation = handle.generation, "session removed");
                true
            }
            None => false,
        }
    }

    /// Forget a session that closed itself. Ignored unless `generation` is
    /// still the live one, so a late close never evicts a newer session.
    pub fn release(&mut self, participant: &ParticipantId, generation: u64) -> bool {
        if !self.is_current(participant, generation) {
            tracing::trace!(target: "session", %participant, generation, "stale session release ignored");
            return false;
        }
        self.sessions.remove(participant);
        self.retire(participant.clone());
        tracing::debug!(target: "session", %participant, generation, "session released");
        true
    }

    /// Send a copy of `command` to every session.
    pub fn broadcast(&self, command: SessionCommand) {
        for handle in self.sessions.values() {
            handle.send(command.clone());
        }
    }

    /// Hang up every session and forget all ids, retired ones included.
    pub fn hangup_all(&mut self) {
        for handle in self.sessions.values() {
            handle.send(SessionCommand::Hangup);
        }
        self.sessions.clear();
        self.retired.clear();
    }

    fn retire(&mut self, participant: ParticipantId) {
        self.retired.retain(|id| *id != participant);
        if self.retired.len() >= RETIRED_CAPACITY {
            self.retired.pop_front();
        }
        self.retired.push_back(participant);
    }

    fn spawn(&mut self, participant: ParticipantId) -> SessionHandle {
        self.next_generation += 1;
        let generation = self.next_generation;
        let (mailbox, mailbox_rx) = mpsc::unbounded_channel();
        let weak_mailbox = mailbox.downgrade();
        let factory = Arc::clone(&self.factory);
        let scheduler = Arc::clone(&self.scheduler);
        let settings = self.settings.clone();
        let tracks = self.local_tracks.clone();
        let events = self.events.clone();
        let id = participant.clone();

        tracing::debug!(target: "session", %participant, generation, "spawning session");
        tokio::spawn(async move {
            let (peer_events, peer_events_rx) = mpsc::unbounded_channel();
            let connection = match factory.create(&id, peer_events).await {
                Ok(connection) => connection,
                Err(err) => {
                    tracing::error!(target: "session", participant = %id, error = %err, "peer connection setup failed");
                    let _ = events.send(SessionEvent {
                        participant: id,
                        generation,
                        kind: SessionEventKind::Closed(CloseReason::Failed(err)),
                    });
                    return;
                }
            };
            for track in &tracks {
                if let Err(err) = connection.add_track(track).await {
                    tracing::warn!(target: "session", participant = %id, track = %track.id, error = %err, "local track not attached");
                }
            }
            let session = PeerSession::new(
                id,
                generation,
                settings,
                connection,
                scheduler,
                weak_mailbox,
                events,
            );
            session.run(mailbox_rx, peer_events_rx).await;
        });

        SessionHandle {
            generation,
            mailbox,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use crate::media::MediaKind;
    use crate::peer::mock::{MockPeerFactory, PeerCall};
    use crate::peer::SessionState;
    use crate::timer::ManualScheduler;
    use crate::wire::{IceCandidate, SdpKind, SessionDescription, SignalPayload};

    fn registry(factory: &Arc<MockPeerFactory>) -> (SessionRegistry, mpsc::UnboundedReceiver<SessionEvent>) {
        SessionRegistry::new(
            SessionSettings::new(ParticipantId::new("me")),
            factory.clone(),
            ManualScheduler::new(),
        )
    }

    async fn next_event(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
        events.recv().await.expect("session events closed")
    }

    fn offer_from(sender: &str) -> SessionCommand {
        SessionCommand::Signal {
            payload: SignalPayload::Offer(SessionDescription::offer(format!("offer-{sender}"))),
            tie_break: ParticipantId::new(sender),
        }
    }

    #[test_timeout::tokio_timeout_test]
    async fn sessions_for_different_participants_are_independent() {
        let factory = MockPeerFactory::new();
        let (mut registry, mut events) = registry(&factory);
        let p1 = ParticipantId::new("p1");
        let p2 = ParticipantId::new("p2");

        registry.get_or_create(&p1).send(SessionCommand::Signal {
            payload: SignalPayload::Candidate(IceCandidate::new("p1-early")),
            tie_break: p1.clone(),
        });
        registry.get_or_create(&p2).send(offer_from("p2"));
        assert_eq!(registry.ids(), vec![p1.clone(), p2.clone()]);

        loop {
            let event = next_event(&mut events).await;
            if event.participant == p2 && event.kind == SessionEventKind::StateChanged(SessionState::Stable) {
                break;
            }
            assert_ne!(event.participant, p1, "p1 has not negotiated");
        }
        let peer1 = factory.peer(&p1).unwrap();
        let peer2 = factory.peer(&p2).unwrap();
        assert!(peer1.applied_candidates().is_empty());
        assert!(peer2.applied_candidates().is_empty());
        assert_eq!(peer2.remote_descriptions(), vec!["offer-p2"]);

        assert!(registry.remove(&p1));
        assert!(registry.is_retired(&p1));
        loop {
            let event = next_event(&mut events).await;
            if event.participant == p1 {
                assert_eq!(event.kind, SessionEventKind::StateChanged(SessionState::Closed));
                break;
            }
        }
        assert!(peer1.is_closed());
        assert!(!peer2.is_closed());
        assert_eq!(registry.ids(), vec![p2]);
    }

    #[test_timeout::tokio_timeout_test]
    async fn tracks_attach_before_negotiation() {
        let factory = MockPeerFactory::new();
        let (mut registry, mut events) = registry(&factory);
        registry.set_local_tracks(vec![LocalTrack {
            id: "audio0".into(),
            stream_id: "s".into(),
            kind: MediaKind::Audio,
        }]);
        let peer = ParticipantId::default_peer();
        registry.get_or_create(&peer).send(SessionCommand::Start);

        let event = next_event(&mut events).await;
        assert!(matches!(event.kind, SessionEventKind::LocalDescription(ref d) if d.kind == SdpKind::Offer));
        assert_eq!(
            factory.peer(&peer).unwrap().calls()[..2],
            [PeerCall::AddTrack("audio0".into()), PeerCall::CreateOffer]
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn stale_release_does_not_evict_newer_session() {
        let factory = MockPeerFactory::new();
        let (mut registry, _events) = registry(&factory);
        let p1 = ParticipantId::new("p1");
        let first = registry.get_or_create(&p1).generation();
        assert!(registry.release(&p1, first));
        assert!(registry.is_retired(&p1));

        let second = registry.get_or_create(&p1).generation();
        assert!(second > first);
        assert!(!registry.is_retired(&p1));
        assert!(!registry.release(&p1, first));
        assert!(registry.is_current(&p1, second));
        assert_eq!(registry.len(), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn retired_ids_are_bounded() {
        let factory = MockPeerFactory::new();
        let (mut registry, _events) = registry(&factory);
        let ids: Vec<ParticipantId> = (0..=RETIRED_CAPACITY)
            .map(|n| ParticipantId::new(format!("p{n}")))
            .collect();
        for id in &ids {
            registry.get_or_create(id);
            assert!(registry.remove(id));
        }
        assert!(!registry.is_retired(&ids[0]));
        assert!(registry.is_retired(&ids[1]));
        assert!(registry.is_retired(&ids[RETIRED_CAPACITY]));
        assert_eq!(registry.retired.len(), RETIRED_CAPACITY);

        // retiring an id again refreshes it instead of duplicating it
        registry.get_or_create(&ids[1]);
        assert!(registry.remove(&ids[1]));
        assert_eq!(registry.retired.len(), RETIRED_CAPACITY);
        assert_eq!(registry.retired.back(), Some(&ids[1]));
    }

    #[test_timeout::tokio_timeout_test]
    async fn failed_setup_reports_closed() {
        let factory = MockPeerFactory::new();
        factory.refuse_next("no ice agent");
        let (mut registry, mut events) = registry(&factory);
        let p1 = ParticipantId::new("p1");
        let generation = registry.get_or_create(&p1).generation();

        let event = next_event(&mut events).await;
        assert_eq!(event.generation, generation);
        assert!(matches!(event.kind, SessionEventKind::Closed(CloseReason::Failed(_))));
        assert!(registry.release(&p1, generation));
        assert!(registry.is_empty());
    }

    #[test_timeout::tokio_timeout_test]
    async fn hangup_all_closes_every_session() {
        let factory = MockPeerFactory::new();
        let (mut registry, mut events) = registry(&factory);
        for id in ["a", "b", "c"] {
            registry.get_or_create(&ParticipantId::new(id));
        }
        registry.broadcast(SessionCommand::Diagnostics);
        assert!(registry.remove(&ParticipantId::new("c")));
        registry.hangup_all();
        assert!(registry.is_empty());
        assert!(!registry.is_retired(&ParticipantId::new("a")));
        assert!(!registry.is_retired(&ParticipantId::new("c")));

        let mut closed = HashSet::new();
        while closed.len() < 3 {
            let event = next_event(&mut events).await;
            if matches!(event.kind, SessionEventKind::Closed(CloseReason::Hangup)) {
                closed.insert(event.participant);
            }
        }
        for peer in factory.peers() {
            assert!(peer.is_closed());
            assert!(peer.calls().contains(&PeerCall::Stats));
        }
    }
}
