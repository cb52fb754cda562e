//! Application-facing session listener. The Session Orchestrator fans
//! registry and router notifications through here alongside its own
//! connection lifecycle events, so an embedding application has one
//! interface to implement instead of wiring up four.

use async_trait::async_trait;

use crate::error::LiveKitError;
use crate::ids::{ParticipantSid, TrackSid};
use crate::model::{RemoteParticipant, RoomInfo};
use crate::registry::ParticipantDiff;
use crate::router::stream_assembly::CompletedStream;
use crate::router::SpeakerUpdate;

#[async_trait]
pub trait RoomListener: Send + Sync {
    async fn on_connected(&self, room: RoomInfo);
    async fn on_reconnecting(&self);
    async fn on_reconnected(&self);
    async fn on_disconnected(&self, reason: Option<LiveKitError>);
    async fn on_error(&self, error: LiveKitError);

    async fn on_participant_connected(&self, participant: RemoteParticipant);
    async fn on_participant_disconnected(&self, sid: ParticipantSid);
    async fn on_participant_updated(&self, participant: RemoteParticipant, diff: ParticipantDiff);

    async fn on_data_received(&self, source_identity: String, payload: Vec<u8>, topic: Option<String>);
    async fn on_active_speakers_changed(&self, speakers: Vec<SpeakerUpdate>);
    async fn on_data_stream_received(&self, stream: CompletedStream);

    /// §4.7 ratchet policy: the cryptor exhausted its ratchet window (or
    /// the track crossed `failureTolerance`) and the track's frames are
    /// being dropped. The track itself remains in the session.
    async fn on_track_crypto_error(&self, track_sid: TrackSid, reason: String);
}
