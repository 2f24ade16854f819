//! Top-level event loop of a call.
//!
//! Relay messages flow from the signaling channel to the session keyed by
//! their sender; session output flows back out through the channel. The
//! orchestrator owns both ends and is the only task touching the channel.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use url::Url;

use crate::media::{MediaError, MediaSource};
use crate::peer::{
    CloseReason, ParticipantId, PeerConnectionFactory, RemoteTrackInfo, SessionCommand,
    SessionEvent, SessionEventKind, SessionRegistry, SessionSettings, SessionState,
};
use crate::signaling::{
    CandidateServers, ChannelEvent, ChannelInput, ChannelState, Connector, RetryPolicy, RoomId,
    SignalingChannel,
};
use crate::timer::Scheduler;
use crate::wire::{self, SdpKind, SignalPayload};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallMode {
    /// One remote party; messages carry no addressing.
    #[default]
    Single,
    /// Many remote parties keyed by the relay-assigned `sender`.
    Multi,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub mode: CallMode,
    pub local_id: ParticipantId,
    pub servers: CandidateServers,
    pub room: RoomId,
    pub retry: RetryPolicy,
    pub queue_capacity: usize,
    pub session: SessionSettings,
    pub diagnostics_interval: Duration,
}

/// External collaborators of the orchestrator.
#[derive(Clone)]
pub struct Backends {
    pub connector: Arc<dyn Connector>,
    pub peers: Arc<dyn PeerConnectionFactory>,
    pub media: Arc<dyn MediaSource>,
    pub scheduler: Arc<dyn Scheduler>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    /// Offer to one participant (multi-party).
    Call(ParticipantId),
    Hangup,
    Shutdown,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    #[error("orchestrator has stopped")]
    Stopped,
}

#[derive(Debug, Clone)]
pub struct OrchestratorHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl OrchestratorHandle {
    pub fn send(&self, command: Command) -> Result<(), OrchestratorError> {
        self.commands
            .send(command)
            .map_err(|_| OrchestratorError::Stopped)
    }

    pub fn start(&self) -> Result<(), OrchestratorError> {
        self.send(Command::Start)
    }

    pub fn call(&self, participant: ParticipantId) -> Result<(), OrchestratorError> {
        self.send(Command::Call(participant))
    }

    pub fn hangup(&self) -> Result<(), OrchestratorError> {
        self.send(Command::Hangup)
    }

    pub fn shutdown(&self) -> Result<(), OrchestratorError> {
        self.send(Command::Shutdown)
    }
}

/// Status updates for whoever drives the call. `Display` gives the status
/// line text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Starting,
    SignalingOpen { server: Url },
    SignalingClosed { code: Option<u16>, reason: String },
    SignalingAttemptFailed { server: Url, reason: String },
    ReconnectScheduled { delay: Duration },
    SignalingUnavailable { reconnect_attempts: u32 },
    LocalMediaFailed(MediaError),
    OfferSent { participant: ParticipantId },
    SessionState { participant: ParticipantId, state: SessionState },
    RemoteTrack { participant: ParticipantId, track: RemoteTrackInfo },
    SessionClosed { participant: ParticipantId, reason: CloseReason },
    HungUp,
}

impl fmt::Display for CallEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallEvent::Starting => f.write_str("starting"),
            CallEvent::SignalingOpen { server } => {
                write!(f, "signaling connected ({})", server.host_str().unwrap_or_default())
            }
            CallEvent::SignalingClosed { code, reason } => match code {
                Some(code) => write!(f, "signaling closed ({code}) {reason}"),
                None => write!(f, "signaling closed {reason}"),
            },
            CallEvent::SignalingAttemptFailed { server, reason } => write!(
                f,
                "signaling server {} failed: {reason}",
                server.host_str().unwrap_or_default()
            ),
            CallEvent::ReconnectScheduled { delay } => {
                write!(f, "signaling reconnecting in {} ms", delay.as_millis())
            }
            CallEvent::SignalingUnavailable { .. } => f.write_str("signaling failed (max attempts)."),
            CallEvent::LocalMediaFailed(_) => f.write_str("mic denied or error"),
            CallEvent::OfferSent { .. } => f.write_str("offer sent, waiting for answer"),
            CallEvent::SessionState { participant, state } => {
                write!(f, "pc state: {state} ({participant})")
            }
            CallEvent::RemoteTrack { participant, track } => {
                write!(f, "remote {} from {participant}", track.kind)
            }
            CallEvent::SessionClosed { participant, reason } => {
                write!(f, "call with {participant} ended: {reason}")
            }
            CallEvent::HungUp => f.write_str("hung up"),
        }
    }
}

pub struct Orchestrator {
    settings: OrchestratorSettings,
    channel: SignalingChannel,
    channel_inputs: mpsc::UnboundedReceiver<ChannelInput>,
    registry: SessionRegistry,
    session_events: mpsc::UnboundedReceiver<SessionEvent>,
    media: Arc<dyn MediaSource>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<CallEvent>,
    started: bool,
    media_held: bool,
}

impl Orchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        backends: Backends,
    ) -> (Self, OrchestratorHandle, mpsc::UnboundedReceiver<CallEvent>) {
        let (channel, channel_inputs) = SignalingChannel::new(
            settings.servers.clone(),
            settings.room.clone(),
            settings.retry.clone(),
            settings.queue_capacity,
            backends.connector,
            Arc::clone(&backends.scheduler),
        );
        let (registry, session_events) =
            SessionRegistry::new(settings.session.clone(), backends.peers, backends.scheduler);
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events, events_rx) = mpsc::unbounded_channel();
        let orchestrator = Self {
            settings,
            channel,
            channel_inputs,
            registry,
            session_events,
            media: backends.media,
            commands,
            events,
            started: false,
            media_held: false,
        };
        (
            orchestrator,
            OrchestratorHandle {
                commands: commands_tx,
            },
            events_rx,
        )
    }

    /// Run until `Shutdown` or until every handle is dropped.
    pub async fn run(mut self) {
        tracing::info!(
            target: "orchestrator",
            local_id = %self.settings.local_id,
            room = %self.settings.room,
            mode = ?self.settings.mode,
            "orchestrator running"
        );
        let period = self.settings.diagnostics_interval;
        let mut diagnostics = tokio::time::interval_at(Instant::now() + period, period);
        diagnostics.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(input) = self.channel_inputs.recv() => {
                    self.channel.handle(input);
                    self.drain_channel();
                }
                Some(event) = self.session_events.recv() => self.on_session_event(event),
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => {
                        self.shutdown().await;
                        break;
                    }
                    Some(command) => self.on_command(command).await,
                },
                _ = diagnostics.tick() => self.diagnostics(),
            }
        }
        tracing::info!(target: "orchestrator", "orchestrator stopped");
    }

    async fn on_command(&mut self, command: Command) {
        tracing::debug!(target: "orchestrator", ?command, "command");
        match command {
            Command::Start => self.start().await,
            Command::Call(participant) => self.call(participant),
            Command::Hangup => self.hangup().await,
            Command::Shutdown => self.shutdown().await,
        }
    }

    async fn start(&mut self) {
        if self.started {
            tracing::debug!(target: "orchestrator", "call already started");
            return;
        }
        self.emit(CallEvent::Starting);
        self.channel.connect();
        self.drain_channel();

        let tracks = match self.media.acquire().await {
            Ok(tracks) => tracks,
            Err(err) => {
                tracing::error!(target: "orchestrator", error = %err, "local media unavailable");
                self.emit(CallEvent::LocalMediaFailed(err));
                return;
            }
        };
        tracing::info!(target: "orchestrator", tracks = tracks.len(), "local media acquired");
        self.media_held = true;
        self.registry.set_local_tracks(tracks);
        self.started = true;

        match self.settings.mode {
            CallMode::Single => {
                let peer = ParticipantId::default_peer();
                self.registry.get_or_create(&peer).send(SessionCommand::Start);
            }
            CallMode::Multi => self.send_signal(None, &SignalPayload::Join),
        }
    }

    fn call(&mut self, participant: ParticipantId) {
        if !self.started {
            tracing::warn!(target: "orchestrator", %participant, "call ignored; start first");
            return;
        }
        if self.settings.mode != CallMode::Multi || participant == self.settings.local_id {
            tracing::warn!(target: "orchestrator", %participant, mode = ?self.settings.mode, "call ignored");
            return;
        }
        self.registry
            .get_or_create(&participant)
            .send(SessionCommand::Start);
    }

    async fn hangup(&mut self) {
        if self.settings.mode == CallMode::Multi && self.channel.state() == ChannelState::Open {
            self.send_signal(None, &SignalPayload::Bye);
        }
        self.registry.hangup_all();
        if self.media_held {
            self.media.release().await;
            self.media_held = false;
        }
        self.channel.shutdown();
        self.started = false;
        tracing::info!(target: "orchestrator", "hung up");
        self.emit(CallEvent::HungUp);
    }

    async fn shutdown(&mut self) {
        if self.started || self.channel.state() != ChannelState::Idle {
            self.hangup().await;
        }
    }

    fn diagnostics(&self) {
        let stats = self.channel.queue_stats();
        tracing::debug!(
            target: "orchestrator",
            state = ?self.channel.state(),
            queued = stats.queued,
            dropped = stats.dropped,
            sessions = self.registry.len(),
            "diagnostics"
        );
        if self.started {
            self.registry.broadcast(SessionCommand::Diagnostics);
        }
    }

    fn drain_channel(&mut self) {
        while let Some(event) = self.channel.next_event() {
            match event {
                ChannelEvent::Opened { server } => self.emit(CallEvent::SignalingOpen { server }),
                ChannelEvent::Closed { code, reason } => {
                    self.emit(CallEvent::SignalingClosed { code, reason })
                }
                ChannelEvent::MessageReceived(raw) => self.on_inbound(&raw),
                ChannelEvent::AttemptFailed { server, reason } => {
                    self.emit(CallEvent::SignalingAttemptFailed { server, reason })
                }
                ChannelEvent::TransportError { server, error } => {
                    tracing::debug!(target: "orchestrator", %server, %error, "signaling transport error");
                }
                ChannelEvent::ReconnectScheduled { delay } => {
                    self.emit(CallEvent::ReconnectScheduled { delay })
                }
                ChannelEvent::Unavailable { reconnect_attempts } => {
                    self.emit(CallEvent::SignalingUnavailable { reconnect_attempts })
                }
            }
        }
    }

    fn on_inbound(&mut self, raw: &str) {
        let signal = match wire::parse_inbound(raw) {
            Ok(signal) => signal,
            Err(err) => {
                tracing::warn!(target: "orchestrator", error = %err, len = raw.len(), "dropping signaling message");
                return;
            }
        };
        let local_id = &self.settings.local_id;
        if signal.sender.as_ref() == Some(local_id) {
            tracing::trace!(target: "orchestrator", "dropping own echo");
            return;
        }
        if let Some(receiver) = &signal.receiver {
            if receiver != local_id {
                tracing::trace!(target: "orchestrator", %receiver, "message for another participant");
                return;
            }
        }
        if !self.started {
            tracing::warn!(target: "orchestrator", kind = signal.payload.label(), "signaling message before call start; dropped");
            return;
        }

        let tie_break = signal
            .sender
            .clone()
            .unwrap_or_else(ParticipantId::default_peer);
        let key = match self.settings.mode {
            CallMode::Single => ParticipantId::default_peer(),
            CallMode::Multi => tie_break.clone(),
        };
        tracing::debug!(target: "orchestrator", participant = %key, kind = signal.payload.label(), "signaling message");

        match signal.payload {
            SignalPayload::Join => {
                if self.settings.mode == CallMode::Single || signal.sender.is_none() {
                    tracing::debug!(target: "orchestrator", "join ignored");
                    return;
                }
                if self.registry.remove(&key) {
                    tracing::info!(target: "orchestrator", participant = %key, "participant rejoined; replacing session");
                }
                self.registry.get_or_create(&key).send(SessionCommand::Start);
            }
            SignalPayload::Bye => {
                self.registry.remove(&key);
            }
            SignalPayload::Offer(_) => {
                self.registry.get_or_create(&key).send(SessionCommand::Signal {
                    payload: signal.payload,
                    tie_break,
                });
            }
            SignalPayload::Answer(_) | SignalPayload::Candidate(_) => {
                if self.registry.get(&key).is_none() && self.registry.is_retired(&key) {
                    tracing::debug!(target: "orchestrator", participant = %key, kind = signal.payload.label(), "late message for closed session");
                    return;
                }
                self.registry.get_or_create(&key).send(SessionCommand::Signal {
                    payload: signal.payload,
                    tie_break,
                });
            }
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        let SessionEvent {
            participant,
            generation,
            kind,
        } = event;

        if let SessionEventKind::Closed(reason) = kind {
            let released = self.registry.release(&participant, generation);
            if released || self.registry.get(&participant).is_none() {
                self.emit(CallEvent::SessionClosed {
                    participant,
                    reason,
                });
            }
            return;
        }
        if !self.registry.is_current(&participant, generation) {
            tracing::trace!(target: "orchestrator", %participant, generation, "event from replaced session");
            return;
        }

        match kind {
            SessionEventKind::LocalDescription(description) => {
                let is_offer = description.kind == SdpKind::Offer;
                let payload = if is_offer {
                    SignalPayload::Offer(description)
                } else {
                    SignalPayload::Answer(description)
                };
                self.send_signal(Some(&participant), &payload);
                if is_offer {
                    self.emit(CallEvent::OfferSent { participant });
                }
            }
            SessionEventKind::LocalCandidate(candidate) => {
                self.send_signal(Some(&participant), &SignalPayload::Candidate(candidate));
            }
            SessionEventKind::StateChanged(state) => {
                self.emit(CallEvent::SessionState { participant, state });
            }
            SessionEventKind::RemoteTrack(track) => {
                self.emit(CallEvent::RemoteTrack { participant, track });
            }
            SessionEventKind::Closed(_) => {}
        }
    }

    fn send_signal(&mut self, receiver: Option<&ParticipantId>, payload: &SignalPayload) {
        let receiver = match self.settings.mode {
            CallMode::Single => None,
            CallMode::Multi => receiver,
        };
        match wire::encode_outbound(&self.settings.local_id, receiver, payload) {
            Ok(text) => self.channel.send(text),
            Err(err) => {
                tracing::error!(target: "orchestrator", error = %err, kind = payload.label(), "failed to encode signaling message");
            }
        }
    }

    fn emit(&self, event: CallEvent) {
        tracing::info!(target: "orchestrator", status = %event, "status");
        let _ = self.events.send(event);
    }
}
