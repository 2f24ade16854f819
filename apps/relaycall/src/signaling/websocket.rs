use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message, error::ProtocolError},
};
use url::Url;

use super::SignalingError;
use super::transport::{Connector, Transport, TransportEvent, TransportSink};

/// Close code reported when the socket went away without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;
const NO_STATUS_RECEIVED: u16 = 1005;

enum Outbound {
    Text(String),
    Close,
}

/// [`Connector`] backed by tokio-tungstenite. Each attempt runs in its own
/// task; frames queued through [`Transport::send`] are written in order.
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WsConnector {
    fn open(&self, url: &Url, sink: TransportSink) -> Result<Box<dyn Transport>, SignalingError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let url = url.clone();
        let task = tokio::spawn(run_socket(url, sink, rx));
        Ok(Box::new(WsTransport {
            outbound: tx,
            task: task.abort_handle(),
        }))
    }
}

struct WsTransport {
    outbound: mpsc::UnboundedSender<Outbound>,
    task: tokio::task::AbortHandle,
}

impl Transport for WsTransport {
    fn send(&self, text: &str) -> Result<(), SignalingError> {
        self.outbound
            .send(Outbound::Text(text.to_string()))
            .map_err(|_| SignalingError::ChannelClosed)
    }

    fn close(&self) {
        if self.outbound.send(Outbound::Close).is_err() {
            self.task.abort();
        }
    }
}

async fn run_socket(url: Url, sink: TransportSink, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
    let attempt = sink.attempt();
    let connecting = connect_async(url.as_str());
    tokio::pin!(connecting);
    let connect = loop {
        tokio::select! {
            result = &mut connecting => break result,
            request = outbound.recv() => match request {
                Some(Outbound::Text(_)) => {
                    tracing::warn!(target: "signaling", attempt, %url, "frame submitted before open; dropping");
                }
                Some(Outbound::Close) | None => {
                    tracing::debug!(target: "signaling", attempt, %url, "attempt abandoned before open");
                    return;
                }
            }
        }
    };

    let (ws_stream, _) = match connect {
        Ok(stream) => stream,
        Err(err) => {
            tracing::debug!(target: "signaling", attempt, %url, error = %err, "websocket connect failed");
            sink.emit(TransportEvent::Error(err.to_string()));
            sink.emit(TransportEvent::Closed {
                code: None,
                reason: err.to_string(),
            });
            return;
        }
    };
    tracing::debug!(target: "signaling", attempt, %url, "signaling websocket connected");
    if !sink.emit(TransportEvent::Opened) {
        return;
    }

    let (mut ws_write, mut ws_read) = ws_stream.split();
    let closed = loop {
        tokio::select! {
            request = outbound.recv() => match request {
                Some(Outbound::Text(text)) => {
                    if let Err(err) = ws_write.send(Message::Text(text)).await {
                        sink.emit(TransportEvent::Error(err.to_string()));
                        break TransportEvent::Closed { code: Some(ABNORMAL_CLOSURE), reason: err.to_string() };
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = ws_write.send(Message::Close(None)).await;
                    break TransportEvent::Closed { code: Some(1000), reason: "closed by client".into() };
                }
            },
            incoming = ws_read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    tracing::trace!(target: "signaling", attempt, len = text.len(), "ws_in text");
                    sink.emit(TransportEvent::Message(text));
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::trace!(target: "signaling", attempt, len = data.len(), "ws_in binary");
                    match String::from_utf8(data) {
                        Ok(text) => {
                            sink.emit(TransportEvent::Message(text));
                        }
                        Err(_) => tracing::warn!(target: "signaling", attempt, "non-utf8 binary frame ignored"),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|frame| (Some(u16::from(frame.code)), frame.reason.into_owned()))
                        .unwrap_or((Some(NO_STATUS_RECEIVED), String::new()));
                    break TransportEvent::Closed { code, reason };
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    match &err {
                        WsError::ConnectionClosed
                        | WsError::AlreadyClosed
                        | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                            tracing::debug!(target: "signaling", attempt, "signaling websocket closed: {err}");
                        }
                        _ => {
                            tracing::warn!(target: "signaling", attempt, "signaling websocket error: {err}");
                            sink.emit(TransportEvent::Error(err.to_string()));
                        }
                    }
                    break TransportEvent::Closed { code: Some(ABNORMAL_CLOSURE), reason: err.to_string() };
                }
                None => {
                    break TransportEvent::Closed { code: Some(ABNORMAL_CLOSURE), reason: "stream ended".into() };
                }
            }
        }
    };
    sink.emit(closed);
}
