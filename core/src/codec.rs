//! Wire Codec (§4.1): bidirectional mapping between the wire-level
//! protobuf messages and raw bytes.
//!
//! Decoders are never tried in sequence on the same stream: bytes off the
//! WebSocket control channel are always a `SignalResponse`, bytes off a
//! WebRTC data channel are always a `DataPacket`. Callers pick the right
//! `decode_*` function based on which transport the bytes arrived on.

use prost::Message;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use livekit_client_proto::{DataPacket, SignalRequest, SignalResponse};

use crate::error::WireCodecError;

/// Serializes one outbound request. Per §4.1, encode failures are logged
/// and do not propagate to the caller as an error — the signalling client
/// treats an encode failure the same as "nothing to send".
pub fn encode(request: &SignalRequest) -> Vec<u8> {
    let mut buf = Vec::with_capacity(request.encoded_len());
    match request.encode(&mut buf) {
        Ok(()) => buf,
        Err(err) => {
            error!(error = %err, "failed to encode signal request");
            Vec::new()
        }
    }
}

pub fn decode_response(bytes: &[u8]) -> Result<SignalResponse, WireCodecError> {
    SignalResponse::decode(bytes).map_err(WireCodecError::ParseResponse)
}

pub fn decode_data_packet(bytes: &[u8]) -> Result<DataPacket, WireCodecError> {
    DataPacket::decode(bytes).map_err(WireCodecError::ParseDataPacket)
}

/// The JSON shape embedded in `TrickleRequest.candidate_init` (§6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrickleCandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_m_line_index: i32,
    #[serde(rename = "usernameFragment", default)]
    pub username_fragment: Option<String>,
}

impl TrickleCandidateInit {
    /// Encodes as the exact JSON shape the server expects, with a literal
    /// `null` (not an absent key) for a missing `usernameFragment`.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|err| {
            error!(error = %err, "failed to serialize trickle candidate, this should never happen");
            String::new()
        })
    }

    /// Decoding tolerates a missing `usernameFragment` key entirely (not
    /// just a `null` value).
    pub fn from_json(json: &str) -> Result<Self, WireCodecError> {
        serde_json::from_str(json).map_err(|err| {
            warn!(error = %err, "malformed trickle candidate JSON");
            WireCodecError::TrickleJson(err.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livekit_client_proto::{signal_request, LeaveRequest};

    #[test]
    fn round_trip_signal_request_through_encode_decode() {
        let req = SignalRequest::new(signal_request::Message::Leave(LeaveRequest {
            can_reconnect: false,
            reason: 0,
            action: 0,
        }));
        let bytes = encode(&req);
        assert!(!bytes.is_empty());

        // decode_response decodes SignalResponse, not SignalRequest; this
        // just exercises that encode() never panics/returns empty for a
        // well-formed message. The true response round trip lives in the
        // proto crate's own test.
        assert_eq!(bytes, {
            let mut b = Vec::new();
            req.encode(&mut b).unwrap();
            b
        });
    }

    #[test]
    fn trickle_json_matches_the_exact_documented_shape() {
        let candidate = TrickleCandidateInit {
            candidate: "candidate:1 1 udp 2113929471 192.168.1.1 54400 typ host".into(),
            sdp_mid: "0".into(),
            sdp_m_line_index: 0,
            username_fragment: None,
        };

        let json = candidate.to_json();
        assert_eq!(
            json,
            r#"{"candidate":"candidate:1 1 udp 2113929471 192.168.1.1 54400 typ host","sdpMid":"0","sdpMLineIndex":0,"usernameFragment":null}"#
        );

        let decoded = TrickleCandidateInit::from_json(&json).unwrap();
        assert_eq!(decoded, candidate);
    }

    #[test]
    fn trickle_json_decoding_tolerates_missing_username_fragment() {
        let json = r#"{"candidate":"c","sdpMid":"0","sdpMLineIndex":0}"#;
        let decoded = TrickleCandidateInit::from_json(json).unwrap();
        assert_eq!(decoded.username_fragment, None);
    }

    #[test]
    fn malformed_trickle_json_surfaces_as_wire_codec_error() {
        let err = TrickleCandidateInit::from_json("not json").unwrap_err();
        assert!(matches!(err, WireCodecError::TrickleJson(_)));
    }
}
