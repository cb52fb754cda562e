//! Internal value types mirroring §3 of the session data model: room,
//! participant, and track state, decoupled from the generated wire types
//! so the rest of the core never matches on raw protobuf oneofs directly.

pub mod participant;
pub mod room;
pub mod track;

pub use participant::{
    ConnectionQuality, LocalParticipant, ParticipantKind, ParticipantPermission, ParticipantState, RemoteParticipant,
};
pub use room::{RoomInfo, TimedVersion};
pub use track::{BackupCodecPolicy, EncryptionType, TrackInfo, TrackKind, TrackSource, VideoQuality};
