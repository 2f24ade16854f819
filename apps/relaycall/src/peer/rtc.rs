//! [`PeerConnectionFactory`] backed by webrtc-rs.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MediaEngine};
use webrtc::api::{API, APIBuilder};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use super::{
    ConnectionStats, ConnectivityState, ParticipantId, PeerConnection, PeerConnectionFactory,
    PeerEvent, RemoteTrackInfo, SessionError,
};
use crate::media::{LocalTrack, MediaKind};
use crate::wire::{IceCandidate, SdpKind, SessionDescription};

pub const DEFAULT_ICE_SERVER: &str = "stun:stun.l.google.com:19302";

/// Builds one webrtc-rs API (default codecs and interceptors) and creates
/// peer connections from it.
pub struct WebRtcFactory {
    api: API,
    ice_servers: Vec<String>,
}

impl WebRtcFactory {
    pub fn new(ice_servers: Vec<String>) -> Result<Self, SessionError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|err| SessionError::Create(err.to_string()))?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|err| SessionError::Create(err.to_string()))?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api, ice_servers })
    }

    fn configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl PeerConnectionFactory for WebRtcFactory {
    async fn create(
        &self,
        participant: &ParticipantId,
        events: mpsc::UnboundedSender<PeerEvent>,
    ) -> Result<Box<dyn PeerConnection>, SessionError> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(self.configuration())
                .await
                .map_err(|err| SessionError::Create(err.to_string()))?,
        );
        install_handlers(&pc, participant, events);
        tracing::debug!(target: "peer", %participant, "peer connection created");
        Ok(Box::new(WebRtcPeer {
            pc,
            participant: participant.clone(),
        }))
    }
}

fn install_handlers(
    pc: &Arc<RTCPeerConnection>,
    participant: &ParticipantId,
    events: mpsc::UnboundedSender<PeerEvent>,
) {
    let candidate_events = events.clone();
    let candidate_participant = participant.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let events = candidate_events.clone();
        let participant = candidate_participant.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else {
                tracing::trace!(target: "peer", %participant, "ice gathering complete");
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    let _ = events.send(PeerEvent::LocalCandidate(from_rtc_candidate(init)));
                }
                Err(err) => {
                    tracing::warn!(target: "peer", %participant, error = %err, "local candidate not serializable");
                }
            }
        })
    }));

    let state_events = events.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let events = state_events.clone();
        Box::pin(async move {
            if let Some(state) = connectivity(state) {
                let _ = events.send(PeerEvent::Connectivity(state));
            }
        })
    }));

    let track_participant = participant.clone();
    pc.on_track(Box::new(move |track, _receiver, _transceiver| {
        let events = events.clone();
        let participant = track_participant.clone();
        Box::pin(async move {
            let kind = match track.kind() {
                RTPCodecType::Audio => MediaKind::Audio,
                RTPCodecType::Video => MediaKind::Video,
                RTPCodecType::Unspecified => {
                    tracing::debug!(target: "peer", %participant, "remote track of unknown kind ignored");
                    return;
                }
            };
            let _ = events.send(PeerEvent::RemoteTrack(RemoteTrackInfo {
                id: track.id(),
                stream_id: track.stream_id(),
                kind,
            }));
        })
    }));
}

fn connectivity(state: RTCPeerConnectionState) -> Option<ConnectivityState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectivityState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectivityState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectivityState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectivityState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectivityState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectivityState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
    participant: ParticipantId,
}

#[async_trait]
impl PeerConnection for WebRtcPeer {
    async fn add_track(&self, track: &LocalTrack) -> Result<(), SessionError> {
        let codec = match track.kind {
            MediaKind::Audio => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: 48_000,
                channels: 2,
                ..Default::default()
            },
            MediaKind::Video => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_owned(),
                clock_rate: 90_000,
                ..Default::default()
            },
        };
        let local = Arc::new(TrackLocalStaticSample::new(
            codec,
            track.id.clone(),
            track.stream_id.clone(),
        ));
        self.pc
            .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|err| SessionError::Track(err.to_string()))?;
        tracing::debug!(target: "peer", participant = %self.participant, kind = %track.kind, "local track attached");
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, SessionError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|err| SessionError::LocalDescription(err.to_string()))?;
        from_rtc_description(offer)
    }

    async fn create_answer(&self) -> Result<SessionDescription, SessionError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|err| SessionError::LocalDescription(err.to_string()))?;
        from_rtc_description(answer)
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), SessionError> {
        let description = to_rtc_description(description).map_err(SessionError::LocalDescription)?;
        self.pc
            .set_local_description(description)
            .await
            .map_err(|err| SessionError::LocalDescription(err.to_string()))
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), SessionError> {
        let description = to_rtc_description(description).map_err(SessionError::RemoteDescription)?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(|err| SessionError::RemoteDescription(err.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), SessionError> {
        self.pc
            .add_ice_candidate(to_rtc_candidate(candidate))
            .await
            .map_err(|err| SessionError::Candidate(err.to_string()))
    }

    async fn rollback(&self) -> Result<(), SessionError> {
        // webrtc-rs parses the rollback body, so it carries the pending offer
        let pending = self.pc.pending_local_description().await.ok_or_else(|| {
            SessionError::LocalDescription("no pending local offer to roll back".into())
        })?;
        let rollback = to_rtc_description(SessionDescription {
            kind: SdpKind::Rollback,
            sdp: pending.sdp,
        })
        .map_err(SessionError::LocalDescription)?;
        self.pc
            .set_local_description(rollback)
            .await
            .map_err(|err| SessionError::LocalDescription(err.to_string()))?;
        tracing::debug!(target: "peer", participant = %self.participant, "local offer rolled back");
        Ok(())
    }

    async fn stats(&self) -> Result<ConnectionStats, SessionError> {
        let report = self.pc.get_stats().await;
        Ok(ConnectionStats {
            reports: report.reports.len(),
        })
    }

    async fn close(&self) -> Result<(), SessionError> {
        self.pc
            .close()
            .await
            .map_err(|err| SessionError::Create(err.to_string()))
    }
}

fn to_rtc_description(description: SessionDescription) -> Result<RTCSessionDescription, String> {
    let result = match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
        SdpKind::Pranswer => RTCSessionDescription::pranswer(description.sdp),
        SdpKind::Rollback => {
            let mut rollback = RTCSessionDescription::default();
            rollback.sdp_type = RTCSdpType::Rollback;
            rollback.sdp = description.sdp;
            return Ok(rollback);
        }
    };
    result.map_err(|err| err.to_string())
}

fn from_rtc_description(description: RTCSessionDescription) -> Result<SessionDescription, SessionError> {
    let kind = match description.sdp_type {
        RTCSdpType::Offer => SdpKind::Offer,
        RTCSdpType::Answer => SdpKind::Answer,
        RTCSdpType::Pranswer => SdpKind::Pranswer,
        RTCSdpType::Rollback => SdpKind::Rollback,
        RTCSdpType::Unspecified => {
            return Err(SessionError::LocalDescription("unspecified sdp type".into()));
        }
    };
    Ok(SessionDescription {
        kind,
        sdp: description.sdp,
    })
}

fn to_rtc_candidate(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn from_rtc_candidate(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}
