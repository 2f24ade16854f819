use std::time::Duration;

pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(6_000);
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(200);
pub const DEFAULT_RECONNECT_BASE: Duration = Duration::from_millis(5_000);
pub const DEFAULT_RECONNECT_MAX: Duration = Duration::from_millis(30_000);
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Timing and give-up rules for the signaling channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// How long one server gets to open before the next one is tried.
    pub attempt_timeout: Duration,
    /// Pause between a failed attempt and the next one.
    pub retry_delay: Duration,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
    /// Full passes over the server list allowed before giving up.
    pub max_reconnect_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
            reconnect_base: DEFAULT_RECONNECT_BASE,
            reconnect_max: DEFAULT_RECONNECT_MAX,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl RetryPolicy {
    /// Delay before reconnecting after an established channel dropped:
    /// `base * (attempts + 1)`, capped at `reconnect_max`.
    pub fn backoff(&self, reconnect_attempts: u32) -> Duration {
        self.reconnect_base
            .saturating_mul(reconnect_attempts.saturating_add(1))
            .min(self.reconnect_max)
    }

    pub fn exhausted(&self, reconnect_attempts: u32) -> bool {
        reconnect_attempts > self.max_reconnect_attempts
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base = base;
        self.reconnect_max = max;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }
}
