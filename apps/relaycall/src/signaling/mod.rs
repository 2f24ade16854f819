//! Control channel to the signaling relay: candidate-server failover,
//! per-attempt timeouts, reconnect backoff and an outbound queue.

pub mod channel;
pub mod mock;
pub mod queue;
pub mod retry;
pub mod servers;
pub mod transport;
pub mod websocket;

use thiserror::Error;

pub use channel::{ChannelEvent, ChannelState, SignalingChannel};
pub use queue::{MessageQueue, QueueStats};
pub use retry::RetryPolicy;
pub use servers::{CandidateServers, RoomId};
pub use transport::{AttemptId, ChannelInput, Connector, Transport, TransportEvent, TransportSink};
pub use websocket::WsConnector;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignalingError {
    #[error("signaling setup failed: {0}")]
    Setup(String),
    #[error("signaling connect failed: {0}")]
    Connect(String),
    #[error("signaling send failed: {0}")]
    Send(String),
    #[error("signaling transport closed")]
    ChannelClosed,
}
