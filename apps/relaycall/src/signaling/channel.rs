use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use url::Url;

use super::queue::{MessageQueue, QueueStats};
use super::retry::RetryPolicy;
use super::servers::{CandidateServers, RoomId};
use super::transport::{AttemptId, ChannelInput, Connector, Transport, TransportEvent, TransportSink};
use crate::timer::{Scheduler, TimerHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

/// What the channel reports to its owner. `Opened`, `Closed` and
/// `MessageReceived` drive the call; the rest are diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened { server: Url },
    Closed { code: Option<u16>, reason: String },
    MessageReceived(String),
    AttemptFailed { server: Url, reason: String },
    TransportError { server: Url, error: String },
    ReconnectScheduled { delay: Duration },
    /// Retry ceiling reached; the channel stays closed until `connect` is called again.
    Unavailable { reconnect_attempts: u32 },
}

struct Link {
    attempt: AttemptId,
    server: Url,
    transport: Box<dyn Transport>,
    deadline: Option<TimerHandle>,
    opened: bool,
}

impl Link {
    fn release(self) {
        if let Some(deadline) = self.deadline {
            deadline.cancel();
        }
        self.transport.close();
    }
}

struct PendingRetry {
    token: u64,
    timer: TimerHandle,
}

/// Owns at most one transport to the relay at a time.
///
/// The channel is a synchronous state machine: transport events and its own
/// timers arrive as [`ChannelInput`]s on the receiver returned by
/// [`SignalingChannel::new`] and must be fed back through
/// [`SignalingChannel::handle`]. Emitted events are collected with
/// [`SignalingChannel::next_event`].
pub struct SignalingChannel {
    servers: CandidateServers,
    room: RoomId,
    policy: RetryPolicy,
    connector: Arc<dyn Connector>,
    scheduler: Arc<dyn Scheduler>,
    inputs: mpsc::UnboundedSender<ChannelInput>,
    state: ChannelState,
    attempt_index: usize,
    reconnect_attempts: u32,
    queue: MessageQueue,
    link: Option<Link>,
    last_attempt: AttemptId,
    last_token: u64,
    pending: Option<PendingRetry>,
    events: VecDeque<ChannelEvent>,
}

impl SignalingChannel {
    pub fn new(
        servers: CandidateServers,
        room: RoomId,
        policy: RetryPolicy,
        queue_capacity: usize,
        connector: Arc<dyn Connector>,
        scheduler: Arc<dyn Scheduler>,
    ) -> (Self, mpsc::UnboundedReceiver<ChannelInput>) {
        let (inputs, inputs_rx) = mpsc::unbounded_channel();
        let channel = Self {
            servers,
            room,
            policy,
            connector,
            scheduler,
            inputs,
            state: ChannelState::Idle,
            attempt_index: 0,
            reconnect_attempts: 0,
            queue: MessageQueue::new(queue_capacity),
            link: None,
            last_attempt: 0,
            last_token: 0,
            pending: None,
            events: VecDeque::new(),
        };
        (channel, inputs_rx)
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn attempt_index(&self) -> usize {
        self.attempt_index
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    /// Server of the current attempt or open connection.
    pub fn current_server(&self) -> Option<&Url> {
        self.link.as_ref().map(|link| &link.server)
    }

    /// Start a fresh connection cycle from the first server. No-op while a
    /// connection is open or being established.
    pub fn connect(&mut self) {
        match self.state {
            ChannelState::Connecting | ChannelState::Open => {
                tracing::debug!(target: "signaling", state = ?self.state, "connect ignored; channel active");
                return;
            }
            ChannelState::Idle | ChannelState::Closing | ChannelState::Closed => {}
        }
        self.cancel_pending();
        self.attempt_index = 0;
        self.reconnect_attempts = 0;
        self.attempt();
    }

    /// Transmit now if open, otherwise queue. Never blocks.
    pub fn send(&mut self, message: String) {
        if self.state == ChannelState::Open {
            if let Some(link) = &self.link {
                match link.transport.send(&message) {
                    Ok(()) => {
                        tracing::trace!(target: "signaling", len = message.len(), "sent immediately");
                        return;
                    }
                    Err(err) => {
                        tracing::warn!(target: "signaling", error = %err, "send failed; queueing message");
                    }
                }
            }
        } else {
            tracing::debug!(target: "signaling", state = ?self.state, "channel not open; queueing message");
        }
        self.enqueue(message);
    }

    /// Close everything and forget queued messages.
    pub fn shutdown(&mut self) {
        self.state = ChannelState::Closing;
        self.cancel_pending();
        if let Some(link) = self.link.take() {
            link.release();
        }
        let discarded = self.queue.len();
        self.queue.clear();
        self.state = ChannelState::Closed;
        tracing::info!(target: "signaling", discarded, "signaling channel shut down");
    }

    pub fn handle(&mut self, input: ChannelInput) {
        match input {
            ChannelInput::Transport { attempt, event } => self.on_transport(attempt, event),
            ChannelInput::AttemptTimeout { attempt } => self.on_attempt_timeout(attempt),
            ChannelInput::RetryDue { token } => {
                if self.take_pending(token) {
                    self.attempt();
                }
            }
            ChannelInput::ReconnectDue { token } => {
                if self.take_pending(token) {
                    self.attempt_index = 0;
                    self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
                    self.attempt();
                }
            }
        }
    }

    pub fn next_event(&mut self) -> Option<ChannelEvent> {
        self.events.pop_front()
    }

    pub fn drain_events(&mut self) -> Vec<ChannelEvent> {
        self.events.drain(..).collect()
    }

    fn attempt(&mut self) {
        if let Some(previous) = self.link.take() {
            previous.release();
        }

        if self.attempt_index >= self.servers.len() {
            self.attempt_index = 0;
            self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
            tracing::warn!(
                target: "signaling",
                reconnect_attempts = self.reconnect_attempts,
                "all signaling servers attempted; restarting from the first"
            );
        }
        if self.policy.exhausted(self.reconnect_attempts) {
            tracing::error!(
                target: "signaling",
                reconnect_attempts = self.reconnect_attempts,
                "signaling failed (max attempts)"
            );
            self.state = ChannelState::Closed;
            self.emit(ChannelEvent::Unavailable {
                reconnect_attempts: self.reconnect_attempts,
            });
            return;
        }

        let index = self.attempt_index;
        let Some(url) = self.servers.endpoint(index, &self.room) else {
            return;
        };
        self.last_attempt += 1;
        let attempt = self.last_attempt;
        self.state = ChannelState::Connecting;
        tracing::info!(target: "signaling", attempt, index, %url, "trying signaling server");

        let sink = TransportSink::new(attempt, self.inputs.clone());
        match self.connector.open(&url, sink) {
            Ok(transport) => {
                let deadline = self.schedule_input(
                    self.policy.attempt_timeout,
                    ChannelInput::AttemptTimeout { attempt },
                );
                self.link = Some(Link {
                    attempt,
                    server: url,
                    transport,
                    deadline: Some(deadline),
                    opened: false,
                });
            }
            Err(err) => {
                tracing::warn!(target: "signaling", attempt, %url, error = %err, "could not start attempt");
                self.emit(ChannelEvent::AttemptFailed {
                    server: url,
                    reason: err.to_string(),
                });
                self.retry_next();
            }
        }
    }

    fn on_transport(&mut self, attempt: AttemptId, event: TransportEvent) {
        let Some(link) = self.link.as_ref().filter(|link| link.attempt == attempt) else {
            tracing::trace!(target: "signaling", attempt, ?event, "ignoring event from abandoned attempt");
            return;
        };
        match event {
            TransportEvent::Opened => self.on_opened(),
            TransportEvent::Message(raw) => {
                if link.opened {
                    self.emit(ChannelEvent::MessageReceived(raw));
                }
            }
            TransportEvent::Error(error) => {
                tracing::warn!(target: "signaling", attempt, server = %link.server, %error, "signaling transport error");
                let server = link.server.clone();
                self.emit(ChannelEvent::TransportError { server, error });
            }
            TransportEvent::Closed { code, reason } => self.on_closed(code, reason),
        }
    }

    fn on_opened(&mut self) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        if link.opened {
            return;
        }
        link.opened = true;
        if let Some(deadline) = link.deadline.take() {
            deadline.cancel();
        }
        let server = link.server.clone();
        self.attempt_index = 0;
        self.reconnect_attempts = 0;
        self.state = ChannelState::Open;
        tracing::info!(target: "signaling", %server, "signaling connected");
        self.flush();
        self.emit(ChannelEvent::Opened { server });
    }

    fn on_attempt_timeout(&mut self, attempt: AttemptId) {
        let timed_out = self
            .link
            .as_ref()
            .is_some_and(|link| link.attempt == attempt && !link.opened);
        if !timed_out {
            return;
        }
        let Some(link) = self.link.take() else {
            return;
        };
        let server = link.server.clone();
        link.release();
        tracing::warn!(target: "signaling", attempt, %server, "signaling open timeout; trying next server");
        self.emit(ChannelEvent::AttemptFailed {
            server,
            reason: "open timed out".into(),
        });
        self.retry_next();
    }

    fn on_closed(&mut self, code: Option<u16>, reason: String) {
        let Some(link) = self.link.take() else {
            return;
        };
        let opened = link.opened;
        let server = link.server.clone();
        link.release();

        if !opened {
            tracing::warn!(target: "signaling", %server, ?code, %reason, "signaling closed before open; trying next server");
            self.emit(ChannelEvent::AttemptFailed { server, reason });
            self.retry_next();
            return;
        }

        tracing::warn!(target: "signaling", %server, ?code, %reason, "signaling closed");
        self.emit(ChannelEvent::Closed { code, reason });
        let delay = self.policy.backoff(self.reconnect_attempts);
        tracing::info!(target: "signaling", delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        self.state = ChannelState::Connecting;
        let token = self.next_token();
        let timer = self.schedule_input(delay, ChannelInput::ReconnectDue { token });
        self.pending = Some(PendingRetry { token, timer });
        self.emit(ChannelEvent::ReconnectScheduled { delay });
    }

    fn retry_next(&mut self) {
        self.attempt_index += 1;
        self.state = ChannelState::Connecting;
        let token = self.next_token();
        let timer = self.schedule_input(self.policy.retry_delay, ChannelInput::RetryDue { token });
        self.pending = Some(PendingRetry { token, timer });
    }

    fn flush(&mut self) {
        let Some(link) = &self.link else {
            return;
        };
        if self.queue.is_empty() {
            return;
        }
        let mut flushed = 0usize;
        while let Some(message) = self.queue.front() {
            match link.transport.send(message) {
                Ok(()) => {
                    self.queue.pop_front();
                    flushed += 1;
                }
                Err(err) => {
                    tracing::error!(target: "signaling", error = %err, remaining = self.queue.len(), "flush stopped on send failure");
                    break;
                }
            }
        }
        if flushed > 0 {
            tracing::debug!(target: "signaling", flushed, "flushed queued messages");
        }
    }

    fn enqueue(&mut self, message: String) {
        if !self.queue.push(message) {
            let stats = self.queue.stats();
            tracing::warn!(
                target: "signaling",
                capacity = stats.capacity,
                dropped = stats.dropped,
                "signaling queue full; message dropped"
            );
        }
    }

    fn take_pending(&mut self, token: u64) -> bool {
        match &self.pending {
            Some(pending) if pending.token == token => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    fn cancel_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.timer.cancel();
        }
    }

    fn next_token(&mut self) -> u64 {
        self.last_token += 1;
        self.last_token
    }

    fn schedule_input(&self, delay: Duration, input: ChannelInput) -> TimerHandle {
        let inputs = self.inputs.clone();
        self.scheduler.schedule(
            delay,
            Box::new(move || {
                let _ = inputs.send(input);
            }),
        )
    }

    fn emit(&mut self, event: ChannelEvent) {
        self.events.push_back(event);
    }
}
