//! In-memory [`Connector`] for driving the signaling channel without sockets.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use url::Url;

use super::SignalingError;
use super::transport::{AttemptId, Connector, Transport, TransportEvent, TransportSink};

/// Records every `open` call; tests play the server side through [`MockLink`].
#[derive(Default)]
pub struct MockConnector {
    links: Mutex<Vec<MockLink>>,
    refusals: Mutex<VecDeque<String>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the next `open` fail synchronously with `reason`.
    pub fn refuse_next(&self, reason: impl Into<String>) {
        self.refusals.lock().push_back(reason.into());
    }

    pub fn links(&self) -> Vec<MockLink> {
        self.links.lock().clone()
    }

    pub fn link(&self, index: usize) -> Option<MockLink> {
        self.links.lock().get(index).cloned()
    }

    pub fn last(&self) -> Option<MockLink> {
        self.links.lock().last().cloned()
    }

    pub fn attempts(&self) -> usize {
        self.links.lock().len()
    }

    pub fn attempted_hosts(&self) -> Vec<String> {
        self.links
            .lock()
            .iter()
            .map(|link| link.url.host_str().unwrap_or_default().to_string())
            .collect()
    }

    /// Every frame accepted by any transport, in acceptance order per link.
    pub fn all_sent(&self) -> Vec<String> {
        self.links
            .lock()
            .iter()
            .flat_map(|link| link.sent())
            .collect()
    }
}

impl Connector for MockConnector {
    fn open(&self, url: &Url, sink: TransportSink) -> Result<Box<dyn Transport>, SignalingError> {
        if let Some(reason) = self.refusals.lock().pop_front() {
            return Err(SignalingError::Connect(reason));
        }
        let link = MockLink {
            url: url.clone(),
            sink,
            sent: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(AtomicBool::new(false)),
            fail_sends: Arc::new(AtomicBool::new(false)),
        };
        let transport = MockTransport {
            sent: Arc::clone(&link.sent),
            closed: Arc::clone(&link.closed),
            fail_sends: Arc::clone(&link.fail_sends),
        };
        self.links.lock().push(link);
        Ok(Box::new(transport))
    }
}

/// Server-side view of one attempt.
#[derive(Clone)]
pub struct MockLink {
    url: Url,
    sink: TransportSink,
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    fail_sends: Arc<AtomicBool>,
}

impl MockLink {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn attempt(&self) -> AttemptId {
        self.sink.attempt()
    }

    pub fn open(&self) {
        self.sink.emit(TransportEvent::Opened);
    }

    pub fn deliver(&self, text: impl Into<String>) {
        self.sink.emit(TransportEvent::Message(text.into()));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.sink.emit(TransportEvent::Error(message.into()));
    }

    pub fn drop_connection(&self, code: u16, reason: impl Into<String>) {
        self.closed.store(true, Ordering::SeqCst);
        self.sink.emit(TransportEvent::Closed {
            code: Some(code),
            reason: reason.into(),
        });
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// True once the client side called `close`.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }
}

struct MockTransport {
    sent: Arc<Mutex<Vec<String>>>,
    closed: Arc<AtomicBool>,
    fail_sends: Arc<AtomicBool>,
}

impl Transport for MockTransport {
    fn send(&self, text: &str) -> Result<(), SignalingError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SignalingError::ChannelClosed);
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(SignalingError::Send("mock send failure".into()));
        }
        self.sent.lock().push(text.to_string());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
