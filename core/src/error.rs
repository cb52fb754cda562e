//! Public error taxonomy.
//!
//! Mirrors the error codes a LiveKit room client surfaces to its
//! application: connection failures, server-initiated disconnects, and
//! protocol violations are all folded into one enum so callers can match
//! on a stable set of variants regardless of where in the stack they
//! originated.

use livekit_client_proto::DisconnectReason;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum LiveKitError {
    #[error("RTC failure: {0}")]
    Rtc(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("server did not respond to ping within the configured timeout")]
    ServerPingTimedOut,

    #[error("server rejected join: duplicate participant identity")]
    ServerDuplicateIdentity,

    #[error("server is shutting down")]
    ServerShutdown,

    #[error("participant was removed by the server")]
    ServerParticipantRemoved,

    #[error("room was deleted by the server")]
    ServerRoomDeleted,

    #[error("server reported a state mismatch")]
    ServerStateMismatch,

    #[error("server rejected join")]
    ServerJoinFailure,

    #[error("session is migrating to another node")]
    ServerMigration,

    #[error("signalling connection was closed by the server")]
    ServerSignalClose,

    #[error("room was closed")]
    ServerRoomClosed,

    #[error("target user is unavailable")]
    ServerUserUnavailable,

    #[error("target user rejected the request")]
    ServerUserRejected,

    #[error("SIP trunk failure")]
    ServerSipTrunkFailure,
}

impl LiveKitError {
    /// Maps a server-reported `DisconnectReason` to its corresponding
    /// `LiveKitError::Server*` variant, per the leave-request taxonomy.
    pub fn from_disconnect_reason(reason: DisconnectReason) -> Option<Self> {
        match reason {
            DisconnectReason::UnknownReason | DisconnectReason::ClientInitiated => None,
            DisconnectReason::DuplicateIdentity => Some(Self::ServerDuplicateIdentity),
            DisconnectReason::ServerShutdown => Some(Self::ServerShutdown),
            DisconnectReason::ParticipantRemoved => Some(Self::ServerParticipantRemoved),
            DisconnectReason::RoomDeleted => Some(Self::ServerRoomDeleted),
            DisconnectReason::StateMismatch => Some(Self::ServerStateMismatch),
            DisconnectReason::JoinFailure => Some(Self::ServerJoinFailure),
            DisconnectReason::Migration => Some(Self::ServerMigration),
            DisconnectReason::SignalClose => Some(Self::ServerSignalClose),
            DisconnectReason::RoomClosed => Some(Self::ServerRoomClosed),
            DisconnectReason::UserUnavailable => Some(Self::ServerUserUnavailable),
            DisconnectReason::UserRejected => Some(Self::ServerUserRejected),
            DisconnectReason::SipTrunkFailure => Some(Self::ServerSipTrunkFailure),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum WireCodecError {
    #[error("failed to encode signal request: {0}")]
    Serialization(#[from] prost::EncodeError),

    #[error("failed to decode signal response: {0}")]
    ParseResponse(prost::DecodeError),

    #[error("failed to decode data packet: {0}")]
    ParseDataPacket(prost::DecodeError),

    #[error("malformed trickle candidate JSON: {0}")]
    TrickleJson(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StreamAssemblyError {
    #[error("stream {0} trailer arrived with no matching header")]
    TrailerWithoutHeader(String),

    #[error("stream {stream_id} length mismatch: expected {expected}, got {actual}")]
    LengthMismatch {
        stream_id: String,
        expected: u64,
        actual: u64,
    },
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum CryptoError {
    #[error("no key provisioned at ring index {0}")]
    NoKeyAtIndex(usize),

    #[error("no key ring provisioned for participant {0}")]
    UnknownParticipant(crate::ids::ParticipantIdentity),

    #[error("cannot ratchet from empty key material")]
    EmptyKeyMaterial,

    #[error("HKDF key derivation failed")]
    RatchetDerivation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_initiated_disconnect_maps_to_no_error() {
        assert_eq!(
            LiveKitError::from_disconnect_reason(DisconnectReason::ClientInitiated),
            None
        );
    }

    #[test]
    fn room_deleted_maps_to_server_room_deleted() {
        assert_eq!(
            LiveKitError::from_disconnect_reason(DisconnectReason::RoomDeleted),
            Some(LiveKitError::ServerRoomDeleted)
        );
    }
}
