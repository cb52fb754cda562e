//! Observer interface for Participant Registry notifications.
//!
//! Unlike the Signalling Client's single replaceable listener, the
//! registry genuinely has many independent observers (room UI, metrics,
//! recording hooks), so this is a real listener registry: an owned
//! vector protected by a lock, notified from a snapshot so a listener can
//! add or remove other listeners mid-notification without deadlocking or
//! missing/duplicating a callback.

use async_trait::async_trait;

use crate::ids::{ParticipantSid, TrackSid};
use crate::model::RemoteParticipant;

#[derive(Debug, Clone, Default)]
pub struct ParticipantDiff {
    pub metadata_changed: bool,
    pub attributes_changed: bool,
    pub permission_changed: bool,
    pub tracks_added: Vec<TrackSid>,
    pub tracks_removed: Vec<TrackSid>,
}

impl ParticipantDiff {
    pub fn is_empty(&self) -> bool {
        !self.metadata_changed
            && !self.attributes_changed
            && !self.permission_changed
            && self.tracks_added.is_empty()
            && self.tracks_removed.is_empty()
    }
}

#[async_trait]
pub trait RegistryListener: Send + Sync {
    async fn on_participant_connected(&self, participant: RemoteParticipant);
    async fn on_participant_disconnected(&self, sid: ParticipantSid);
    async fn on_participant_updated(&self, participant: RemoteParticipant, diff: ParticipantDiff);
}
