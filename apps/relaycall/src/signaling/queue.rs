use std::collections::VecDeque;

pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Outbound control messages waiting for an open transport.
///
/// FIFO with a hard cap: once full, new messages are rejected and counted in
/// [`QueueStats::dropped`] so a long outage cannot grow memory without bound.
#[derive(Debug)]
pub struct MessageQueue {
    messages: VecDeque<String>,
    capacity: usize,
    dropped: usize,
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub queued: usize,
    pub capacity: usize,
    pub dropped: usize,
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: VecDeque::with_capacity(capacity.min(DEFAULT_QUEUE_CAPACITY)),
            capacity,
            dropped: 0,
        }
    }

    /// Returns false when the queue is full and the message was dropped.
    pub fn push(&mut self, message: String) -> bool {
        if self.messages.len() >= self.capacity {
            self.dropped += 1;
            return false;
        }
        self.messages.push_back(message);
        true
    }

    pub fn front(&self) -> Option<&str> {
        self.messages.front().map(String::as_str)
    }

    pub fn pop_front(&mut self) -> Option<String> {
        self.messages.pop_front()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            queued: self.messages.len(),
            capacity: self.capacity,
            dropped: self.dropped,
        }
    }
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
