use tokio::sync::mpsc;
use url::Url;

use super::SignalingError;

/// Identifies one connection attempt. Events carrying an id other than the
/// channel's current attempt are stale and ignored.
pub type AttemptId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Closed { code: Option<u16>, reason: String },
    Error(String),
}

/// Everything that can wake the signaling channel: transport activity and
/// its own timers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelInput {
    Transport {
        attempt: AttemptId,
        event: TransportEvent,
    },
    AttemptTimeout {
        attempt: AttemptId,
    },
    RetryDue {
        token: u64,
    },
    ReconnectDue {
        token: u64,
    },
}

/// Where a transport reports its events, pre-tagged with the attempt id.
#[derive(Debug, Clone)]
pub struct TransportSink {
    attempt: AttemptId,
    inputs: mpsc::UnboundedSender<ChannelInput>,
}

impl TransportSink {
    pub fn new(attempt: AttemptId, inputs: mpsc::UnboundedSender<ChannelInput>) -> Self {
        Self { attempt, inputs }
    }

    pub fn attempt(&self) -> AttemptId {
        self.attempt
    }

    /// Returns false once the channel is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.inputs
            .send(ChannelInput::Transport {
                attempt: self.attempt,
                event,
            })
            .is_ok()
    }
}

/// A duplex text transport to one relay endpoint.
pub trait Transport: Send {
    /// Hand a frame to the transport. An error means the frame was not accepted.
    fn send(&self, text: &str) -> Result<(), SignalingError>;

    /// Begin closing. Idempotent; events after this call may still arrive and
    /// are filtered by attempt id.
    fn close(&self);
}

/// Opens transports. `open` must not block: establishment completes in the
/// background and is reported through the sink.
pub trait Connector: Send + Sync {
    fn open(&self, url: &Url, sink: TransportSink) -> Result<Box<dyn Transport>, SignalingError>;
}
