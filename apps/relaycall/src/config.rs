use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::orchestrator::{CallMode, OrchestratorSettings};
use crate::peer::rtc::DEFAULT_ICE_SERVER;
use crate::peer::{ParticipantId, SessionSettings};
use crate::signaling::queue::DEFAULT_QUEUE_CAPACITY;
use crate::signaling::retry::{
    DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_BASE,
    DEFAULT_RECONNECT_MAX, DEFAULT_RETRY_DELAY,
};
use crate::signaling::{CandidateServers, RetryPolicy, RoomId};

pub const SERVERS_ENV: &str = "RELAYCALL_SERVERS";
pub const ROOM_ENV: &str = "RELAYCALL_ROOM";

/// Public relays tried in order when nothing else is configured.
pub const DEFAULT_SERVERS: &[&str] = &[
    "wss://signal.emn178.workers.dev",
    "wss://wrtc-signaling-eu.herokuapp.com",
];

pub const DEFAULT_DIAGNOSTICS_INTERVAL: Duration = Duration::from_millis(8_000);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid signaling servers: {0}")]
    Servers(String),
    #[error("invalid room id: {0}")]
    Room(String),
    #[error("invalid setting `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Client configuration. Every field has a default, so an empty file (or no
/// file) is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayCallConfig {
    pub servers: Vec<String>,
    pub room: Option<String>,
    pub mode: CallMode,
    pub participant_id: Option<String>,
    pub ice_servers: Vec<String>,
    pub signaling: SignalingConfig,
    pub session: SessionConfig,
    pub media: MediaConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalingConfig {
    pub attempt_timeout_ms: u64,
    pub retry_delay_ms: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
    pub max_reconnect_attempts: u32,
    pub queue_capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub disconnect_grace_ms: u64,
    pub diagnostics_interval_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub audio: bool,
    pub video: bool,
}

impl Default for RelayCallConfig {
    fn default() -> Self {
        Self {
            servers: DEFAULT_SERVERS.iter().map(|s| s.to_string()).collect(),
            room: None,
            mode: CallMode::default(),
            participant_id: None,
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            signaling: SignalingConfig::default(),
            session: SessionConfig::default(),
            media: MediaConfig::default(),
        }
    }
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_ms: millis(DEFAULT_ATTEMPT_TIMEOUT),
            retry_delay_ms: millis(DEFAULT_RETRY_DELAY),
            reconnect_base_ms: millis(DEFAULT_RECONNECT_BASE),
            reconnect_max_ms: millis(DEFAULT_RECONNECT_MAX),
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            disconnect_grace_ms: millis(crate::peer::session::DEFAULT_DISCONNECT_GRACE),
            diagnostics_interval_ms: millis(DEFAULT_DIAGNOSTICS_INTERVAL),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            audio: true,
            video: false,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

impl RelayCallConfig {
    /// Defaults, overlaid with `path` when given, then with the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply `RELAYCALL_SERVERS` (comma separated) and `RELAYCALL_ROOM` as
    /// reported by `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(raw) = lookup(SERVERS_ENV) {
            let servers: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            if !servers.is_empty() {
                self.servers = servers;
            }
        }
        if let Some(room) = lookup(ROOM_ENV) {
            let room = room.trim();
            if !room.is_empty() {
                self.room = Some(room.to_string());
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.candidate_servers()?;
        if let Some(room) = &self.room {
            room.parse::<RoomId>()
                .map_err(|err| ConfigError::Room(err.to_string()))?;
        }
        let signaling = &self.signaling;
        for (field, value) in [
            ("signaling.attempt_timeout_ms", signaling.attempt_timeout_ms),
            ("signaling.reconnect_base_ms", signaling.reconnect_base_ms),
            ("session.diagnostics_interval_ms", self.session.diagnostics_interval_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".into(),
                });
            }
        }
        if signaling.reconnect_max_ms < signaling.reconnect_base_ms {
            return Err(ConfigError::Invalid {
                field: "signaling.reconnect_max_ms",
                reason: "must not be below reconnect_base_ms".into(),
            });
        }
        if signaling.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "signaling.queue_capacity",
                reason: "must be greater than zero".into(),
            });
        }
        Ok(())
    }

    pub fn candidate_servers(&self) -> Result<CandidateServers, ConfigError> {
        CandidateServers::parse(self.servers.iter())
            .map_err(|err| ConfigError::Servers(err.to_string()))
    }

    /// The configured room, or a fresh random one.
    pub fn room_id(&self) -> Result<RoomId, ConfigError> {
        match &self.room {
            Some(room) => room
                .parse()
                .map_err(|err: crate::signaling::SignalingError| ConfigError::Room(err.to_string())),
            None => Ok(RoomId::random()),
        }
    }

    /// The configured participant id, or a fresh random one.
    pub fn participant(&self) -> ParticipantId {
        match self.participant_id.as_deref().map(str::trim) {
            Some(id) if !id.is_empty() => ParticipantId::new(id),
            _ => ParticipantId::random(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let signaling = &self.signaling;
        RetryPolicy::default()
            .with_attempt_timeout(Duration::from_millis(signaling.attempt_timeout_ms))
            .with_retry_delay(Duration::from_millis(signaling.retry_delay_ms))
            .with_backoff(
                Duration::from_millis(signaling.reconnect_base_ms),
                Duration::from_millis(signaling.reconnect_max_ms),
            )
            .with_max_reconnect_attempts(signaling.max_reconnect_attempts)
    }

    /// Resolve everything the orchestrator needs. Random ids are drawn here.
    pub fn orchestrator_settings(&self) -> Result<OrchestratorSettings, ConfigError> {
        let local_id = self.participant();
        Ok(OrchestratorSettings {
            mode: self.mode,
            servers: self.candidate_servers()?,
            room: self.room_id()?,
            retry: self.retry_policy(),
            queue_capacity: self.signaling.queue_capacity,
            session: SessionSettings {
                local_id: local_id.clone(),
                disconnect_grace: Duration::from_millis(self.session.disconnect_grace_ms),
            },
            local_id,
            diagnostics_interval: Duration::from_millis(self.session.diagnostics_interval_ms),
        })
    }
}
