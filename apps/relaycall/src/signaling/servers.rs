use std::fmt;
use std::str::FromStr;

use rand::Rng;
use url::Url;

use super::SignalingError;

const ROOM_ID_LEN: usize = 8;
const ROOM_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Room identifier shared by every participant of one call. Chosen once per
/// client and appended to each candidate server URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(String);

impl RoomId {
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let id = (0..ROOM_ID_LEN)
            .map(|_| ROOM_ALPHABET[rng.gen_range(0..ROOM_ALPHABET.len())] as char)
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for RoomId {
    type Err = SignalingError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim().trim_start_matches('#');
        if trimmed.is_empty() {
            return Err(SignalingError::Setup("room id is empty".into()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Ordered signaling endpoints; position is trial order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateServers {
    servers: Vec<Url>,
}

impl CandidateServers {
    pub fn new(servers: Vec<Url>) -> Result<Self, SignalingError> {
        if servers.is_empty() {
            return Err(SignalingError::Setup(
                "at least one signaling server is required".into(),
            ));
        }
        for server in &servers {
            if !matches!(server.scheme(), "ws" | "wss") {
                return Err(SignalingError::Setup(format!(
                    "signaling server {server} must use ws:// or wss://"
                )));
            }
        }
        Ok(Self { servers })
    }

    pub fn parse<I, S>(servers: I) -> Result<Self, SignalingError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parsed = servers
            .into_iter()
            .map(|raw| {
                let raw = raw.as_ref().trim();
                Url::parse(raw).map_err(|err| {
                    SignalingError::Setup(format!("invalid signaling server {raw}: {err}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(parsed)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// Connection URL for the server at `index`, carrying `room` as a query parameter.
    pub fn endpoint(&self, index: usize, room: &RoomId) -> Option<Url> {
        let mut url = self.servers.get(index)?.clone();
        url.query_pairs_mut().append_pair("room", room.as_str());
        Some(url)
    }
}
