use serde::{Deserialize, Serialize};

use crate::error::{ChannelError, ChannelResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Session description as browsers serialise `RTCSessionDescriptionInit`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
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

/// Connectivity candidate as browsers serialise `RTCIceCandidateInit`.
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

/// Wire-level signaling unit. Ordering comes only from the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalingMessage {
    Offer { offer: SessionDescription },
    Answer { answer: SessionDescription },
    #[serde(rename = "ice")]
    IceCandidate { candidate: IceCandidate },
}

impl SignalingMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Offer { .. } => "offer",
            SignalingMessage::Answer { .. } => "answer",
            SignalingMessage::IceCandidate { .. } => "ice",
        }
    }

    pub fn encode(&self) -> ChannelResult<String> {
        serde_json::to_string(self).map_err(|err| ChannelError::Decode(err.to_string()))
    }

    /// Parses one text frame. Unknown tags, missing payloads and descriptions
    /// whose inner type contradicts the envelope are rejected.
    pub fn decode(text: &str) -> ChannelResult<Self> {
        let message: SignalingMessage =
            serde_json::from_str(text).map_err(|err| ChannelError::Decode(err.to_string()))?;
        match &message {
            SignalingMessage::Offer { offer } if offer.kind != SdpKind::Offer => Err(
                ChannelError::Decode("offer envelope carries a non-offer description".into()),
            ),
            SignalingMessage::Answer { answer } if answer.kind != SdpKind::Answer => Err(
                ChannelError::Decode("answer envelope carries a non-answer description".into()),
            ),
            _ => Ok(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_browser_offer() {
        let text = json!({
            "type": "offer",
            "offer": { "type": "offer", "sdp": "v=0\r\n" }
        })
        .to_string();
        let message = SignalingMessage::decode(&text).expect("decode offer");
        assert_eq!(
            message,
            SignalingMessage::Offer {
                offer: SessionDescription::offer("v=0\r\n")
            }
        );
    }

    #[test]
    fn decodes_browser_candidate_with_nulls() {
        let text = json!({
            "type": "ice",
            "candidate": {
                "candidate": "candidate:1 1 udp 2122260223 10.0.0.2 54321 typ host",
                "sdpMid": "0",
                "sdpMLineIndex": 0,
                "usernameFragment": null
            }
        })
        .to_string();
        let SignalingMessage::IceCandidate { candidate } =
            SignalingMessage::decode(&text).expect("decode ice")
        else {
            panic!("expected ice candidate");
        };
        assert_eq!(candidate.sdp_mid.as_deref(), Some("0"));
        assert_eq!(candidate.sdp_mline_index, Some(0));
        assert!(candidate.username_fragment.is_none());
    }

    #[test]
    fn encodes_payload_field_per_kind() {
        let answer = SignalingMessage::Answer {
            answer: SessionDescription::answer("v=0"),
        };
        let value: serde_json::Value =
            serde_json::from_str(&answer.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "answer");
        assert_eq!(value["answer"]["type"], "answer");

        let ice = SignalingMessage::IceCandidate {
            candidate: IceCandidate::new("candidate:2"),
        };
        let value: serde_json::Value = serde_json::from_str(&ice.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "ice");
        assert_eq!(value["candidate"]["candidate"], "candidate:2");
        assert!(value["candidate"].get("sdpMid").is_none());
    }

    #[test]
    fn rejects_unknown_tag() {
        let err = SignalingMessage::decode(r#"{"type":"bye"}"#).unwrap_err();
        assert!(matches!(err, ChannelError::Decode(_)));
    }

    #[test]
    fn rejects_mismatched_description_type() {
        let text = json!({
            "type": "answer",
            "answer": { "type": "offer", "sdp": "v=0" }
        })
        .to_string();
        assert!(SignalingMessage::decode(&text).is_err());
    }
}
