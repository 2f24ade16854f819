//! JSON schema of the messages relayed between participants.
//!
//! Inbound messages are accepted in every shape seen on the relay: a bare
//! `{offer}` / `{answer}` / `{ice}` object, a typed `{type, sdp}` envelope
//! whose `sdp` is either SDP text or a whole description, or a
//! `{type: "candidate", candidate}` envelope. Outbound messages always use
//! the `offer` / `answer` / `ice` fields.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::peer::ParticipantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    #[serde(default)]
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// The `sdp` envelope field: bare SDP text typed by the envelope's `type`, or
/// a complete description carrying its own type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SdpField {
    Text(String),
    Description(SessionDescription),
}

/// The raw envelope. Every field is optional; unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp: Option<SdpField>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ice: Option<IceCandidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<IceCandidate>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalPayload {
    Offer(SessionDescription),
    Answer(SessionDescription),
    Candidate(IceCandidate),
    /// A participant announcing itself to the room.
    Join,
    /// A participant leaving the room.
    Bye,
}

impl SignalPayload {
    pub fn label(&self) -> &'static str {
        match self {
            SignalPayload::Offer(_) => "offer",
            SignalPayload::Answer(_) => "answer",
            SignalPayload::Candidate(_) => "candidate",
            SignalPayload::Join => "join",
            SignalPayload::Bye => "bye",
        }
    }
}

/// A normalised inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSignal {
    pub sender: Option<ParticipantId>,
    pub receiver: Option<ParticipantId>,
    pub payload: SignalPayload,
}

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed signaling message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("signaling message carries no recognised payload")]
    Empty,
    #[error("description of type {0:?} is not valid in the `{1}` field")]
    UnexpectedDescription(SdpKind, &'static str),
    #[error("unknown message type `{0}` with bare sdp")]
    UnknownType(String),
}

/// Parse and normalise one raw relay frame.
///
/// Field precedence: `offer`, `answer`, `type` + `sdp`, `ice`, `candidate`,
/// then bare `join` / `bye` types.
pub fn parse_inbound(raw: &str) -> Result<InboundSignal, WireError> {
    let message: WireMessage = serde_json::from_str(raw)?;
    let payload = payload_of(&message)?;
    Ok(InboundSignal {
        sender: participant(message.sender),
        receiver: participant(message.receiver),
        payload,
    })
}

fn participant(raw: Option<String>) -> Option<ParticipantId> {
    raw.map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .map(ParticipantId::new)
}

fn payload_of(message: &WireMessage) -> Result<SignalPayload, WireError> {
    if let Some(offer) = &message.offer {
        return match offer.kind {
            SdpKind::Offer => Ok(SignalPayload::Offer(offer.clone())),
            other => Err(WireError::UnexpectedDescription(other, "offer")),
        };
    }
    if let Some(answer) = &message.answer {
        return match answer.kind {
            SdpKind::Answer | SdpKind::Pranswer => Ok(SignalPayload::Answer(answer.clone())),
            other => Err(WireError::UnexpectedDescription(other, "answer")),
        };
    }
    match &message.sdp {
        Some(SdpField::Text(sdp)) => {
            return match message.kind.as_deref() {
                Some("offer") => Ok(SignalPayload::Offer(SessionDescription::offer(sdp.clone()))),
                Some("answer") => Ok(SignalPayload::Answer(SessionDescription::answer(
                    sdp.clone(),
                ))),
                other => Err(WireError::UnknownType(other.unwrap_or_default().to_string())),
            };
        }
        Some(SdpField::Description(description)) => {
            return match description.kind {
                SdpKind::Offer => Ok(SignalPayload::Offer(description.clone())),
                SdpKind::Answer | SdpKind::Pranswer => Ok(SignalPayload::Answer(description.clone())),
                other => Err(WireError::UnexpectedDescription(other, "sdp")),
            };
        }
        None => {}
    }
    if let Some(ice) = message.ice.as_ref().or(message.candidate.as_ref()) {
        return Ok(SignalPayload::Candidate(ice.clone()));
    }
    match message.kind.as_deref() {
        Some("join") => Ok(SignalPayload::Join),
        Some("bye") => Ok(SignalPayload::Bye),
        _ => Err(WireError::Empty),
    }
}

/// Build the outbound frame for `payload`. `receiver` is only set for
/// messages addressed to one participant.
pub fn encode_outbound(
    sender: &ParticipantId,
    receiver: Option<&ParticipantId>,
    payload: &SignalPayload,
) -> Result<String, WireError> {
    let mut message = WireMessage {
        sender: Some(sender.as_str().to_string()),
        receiver: receiver.map(|id| id.as_str().to_string()),
        ..WireMessage::default()
    };
    match payload {
        SignalPayload::Offer(description) => message.offer = Some(description.clone()),
        SignalPayload::Answer(description) => message.answer = Some(description.clone()),
        SignalPayload::Candidate(candidate) => message.ice = Some(candidate.clone()),
        SignalPayload::Join => message.kind = Some("join".into()),
        SignalPayload::Bye => message.kind = Some("bye".into()),
    }
    Ok(serde_json::to_string(&message)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn parses_bare_single_party_shapes() {
        let offer = parse_inbound(r#"{"offer":{"type":"offer","sdp":"v=0 o"}}"#).unwrap();
        assert_eq!(offer.sender, None);
        assert_eq!(offer.payload, SignalPayload::Offer(SessionDescription::offer("v=0 o")));

        let ice = parse_inbound(
            r#"{"ice":{"candidate":"candidate:1 1 udp 1 10.0.0.1 9 typ host","sdpMid":"0","sdpMLineIndex":0}}"#,
        )
        .unwrap();
        match ice.payload {
            SignalPayload::Candidate(candidate) => {
                assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
                assert_eq!(candidate.sdp_mline_index, Some(0));
                assert_eq!(candidate.username_fragment, None);
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn parses_typed_envelopes_with_addressing() {
        let answer =
            parse_inbound(r#"{"sender":"p2","receiver":"p1","type":"answer","sdp":"v=0 a","extra":true}"#)
                .unwrap();
        assert_eq!(answer.sender, Some(ParticipantId::new("p2")));
        assert_eq!(answer.receiver, Some(ParticipantId::new("p1")));
        assert_eq!(answer.payload, SignalPayload::Answer(SessionDescription::answer("v=0 a")));

        let candidate =
            parse_inbound(r#"{"sender":"p2","type":"candidate","candidate":{"candidate":"c"}}"#).unwrap();
        assert_eq!(candidate.payload, SignalPayload::Candidate(IceCandidate::new("c")));

        assert_eq!(parse_inbound(r#"{"sender":"p3","type":"join"}"#).unwrap().payload, SignalPayload::Join);
        assert_eq!(parse_inbound(r#"{"sender":"p3","type":"bye"}"#).unwrap().payload, SignalPayload::Bye);
    }

    #[test]
    fn typed_envelope_accepts_a_nested_description() {
        let offer = parse_inbound(r#"{"type":"offer","sdp":{"type":"offer","sdp":"v=0"}}"#).unwrap();
        assert_eq!(offer.payload, SignalPayload::Offer(SessionDescription::offer("v=0")));

        // the nested description's own type decides
        let answer =
            parse_inbound(r#"{"sender":"p2","type":"offer","sdp":{"type":"answer","sdp":"v=0 a"}}"#)
                .unwrap();
        assert_eq!(answer.payload, SignalPayload::Answer(SessionDescription::answer("v=0 a")));

        assert!(matches!(
            parse_inbound(r#"{"type":"offer","sdp":{"type":"rollback","sdp":""}}"#),
            Err(WireError::UnexpectedDescription(SdpKind::Rollback, "sdp"))
        ));
        assert!(matches!(
            parse_inbound(r#"{"type":"offer","sdp":42}"#),
            Err(WireError::Malformed(_))
        ));
    }

    #[test]
    fn blank_sender_is_treated_as_absent() {
        let signal = parse_inbound(r#"{"sender":"  ","type":"join"}"#).unwrap();
        assert_eq!(signal.sender, None);
    }

    #[test]
    fn rejects_malformed_and_empty_messages() {
        assert!(matches!(parse_inbound("not json"), Err(WireError::Malformed(_))));
        assert!(matches!(parse_inbound("[1,2]"), Err(WireError::Malformed(_))));
        assert!(matches!(parse_inbound(r#"{"hello":1}"#), Err(WireError::Empty)));
        assert!(matches!(
            parse_inbound(r#"{"offer":{"type":"answer","sdp":"x"}}"#),
            Err(WireError::UnexpectedDescription(SdpKind::Answer, "offer"))
        ));
        assert!(matches!(
            parse_inbound(r#"{"type":"weird","sdp":"x"}"#),
            Err(WireError::UnknownType(kind)) if kind == "weird"
        ));
    }

    #[test]
    fn outbound_uses_relay_field_names() {
        let me = ParticipantId::new("p1");
        let single = encode_outbound(
            &me,
            None,
            &SignalPayload::Answer(SessionDescription::answer("v=0")),
        )
        .unwrap();
        let value: Value = serde_json::from_str(&single).unwrap();
        assert_eq!(
            value,
            json!({"sender": "p1", "answer": {"type": "answer", "sdp": "v=0"}})
        );

        let peer = ParticipantId::new("p2");
        let candidate = IceCandidate {
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(1),
            ..IceCandidate::new("c")
        };
        let addressed =
            encode_outbound(&me, Some(&peer), &SignalPayload::Candidate(candidate)).unwrap();
        let value: Value = serde_json::from_str(&addressed).unwrap();
        assert_eq!(
            value,
            json!({
                "sender": "p1",
                "receiver": "p2",
                "ice": {"candidate": "c", "sdpMid": "0", "sdpMLineIndex": 1}
            })
        );

        let join: Value =
            serde_json::from_str(&encode_outbound(&me, None, &SignalPayload::Join).unwrap()).unwrap();
        assert_eq!(join, json!({"sender": "p1", "type": "join"}));
    }
}
