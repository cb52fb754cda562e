//! Participant Registry (§4.5): reconciles server-pushed participant and
//! track state with local observers, and owns the one local participant.

pub mod listener;
pub mod local;
pub mod remote;

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;

use livekit_client_proto::ParticipantUpdate;

use crate::ids::{ParticipantIdentity, ParticipantSid, TrackSid};
use crate::model::{ConnectionQuality, LocalParticipant, RemoteParticipant};

pub use listener::{ParticipantDiff, RegistryListener};
pub use remote::ApplyOutcome;

pub struct ParticipantRegistry {
    local: RwLock<LocalParticipant>,
    remotes: DashMap<ParticipantSid, RemoteParticipant>,
    listeners: RwLock<Vec<Arc<dyn RegistryListener>>>,
}

impl ParticipantRegistry {
    pub fn new(local_identity: ParticipantIdentity) -> Self {
        Self {
            local: RwLock::new(LocalParticipant::new(local_identity)),
            remotes: DashMap::new(),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn RegistryListener>) {
        self.listeners.write().push(listener);
    }

    pub fn with_local<R>(&self, f: impl FnOnce(&LocalParticipant) -> R) -> R {
        f(&self.local.read())
    }

    pub fn with_local_mut<R>(&self, f: impl FnOnce(&mut LocalParticipant) -> R) -> R {
        f(&mut self.local.write())
    }

    pub fn remote(&self, sid: &ParticipantSid) -> Option<RemoteParticipant> {
        self.remotes.get(sid).map(|r| r.clone())
    }

    pub fn remote_count(&self) -> usize {
        self.remotes.len()
    }

    /// Materializes every entry of `JoinResponse.other_participants`
    /// immediately, before any offer arrives (§4.4 step 5). Unlike
    /// `apply_update`, this never discards on version or diffs against a
    /// prior entry: there is no prior entry.
    pub fn seed_other_participants(&self, participants: Vec<livekit_client_proto::ParticipantInfo>) {
        for info in participants {
            let participant = RemoteParticipant::from_wire(info);
            self.remotes.insert(participant.sid.clone(), participant);
        }
    }

    /// Updates a remote participant's connection quality from a
    /// `ConnectionQualityUpdate` entry. Silently ignored for an unknown
    /// sid (the update may race a disconnect).
    pub fn update_connection_quality(&self, sid: &ParticipantSid, quality: ConnectionQuality, score: f32) {
        if let Some(mut participant) = self.remotes.get_mut(sid) {
            participant.connection_quality = quality;
            participant.connection_quality_score = score;
        }
    }

    /// Applies a `MuteTrackRequest` pushed by the server to whichever
    /// participant (local or remote) owns `track_sid`. Returns `true` if
    /// a matching track was found and updated.
    pub fn set_track_muted(&self, track_sid: &TrackSid, muted: bool) -> bool {
        let mut found = self.local.write().published_tracks.get_mut(track_sid).map(|t| t.muted = muted).is_some();
        if !found {
            for mut participant in self.remotes.iter_mut() {
                if let Some(track) = participant.tracks.get_mut(track_sid) {
                    track.muted = muted;
                    found = true;
                    break;
                }
            }
        }
        found
    }

    /// Removes a track from whichever participant owns it, per a
    /// `TrackUnpublishedResponse`/server-side unpublish. Returns `true` if
    /// a matching track was found and removed.
    pub fn remove_track(&self, track_sid: &TrackSid) -> bool {
        let mut found = self.local.write().published_tracks.remove(track_sid).is_some();
        if !found {
            for mut participant in self.remotes.iter_mut() {
                if participant.tracks.remove(track_sid).is_some() {
                    found = true;
                    break;
                }
            }
        }
        found
    }

    /// Applies one `ParticipantUpdate`, notifying listeners for every
    /// entry that results in a real change (§4.5).
    pub async fn apply_update(&self, update: ParticipantUpdate) {
        for entry in update.participants {
            let outcome = remote::apply_participant_entry(&self.remotes, entry);
            self.notify(outcome).await;
        }
    }

    async fn notify(&self, outcome: ApplyOutcome) {
        let listeners = self.listeners.read().clone();
        match outcome {
            ApplyOutcome::Discarded => {}
            ApplyOutcome::Connected(participant) => {
                for listener in &listeners {
                    listener.on_participant_connected(participant.clone()).await;
                }
            }
            ApplyOutcome::Disconnected(sid) => {
                for listener in &listeners {
                    listener.on_participant_disconnected(sid.clone()).await;
                }
            }
            ApplyOutcome::Updated(participant, diff) => {
                if diff.is_empty() {
                    return;
                }
                for listener in &listeners {
                    listener
                        .on_participant_updated(participant.clone(), diff.clone())
                        .await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livekit_client_proto::ParticipantInfo as WireParticipantInfo;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingListener {
        connected: AtomicUsize,
        disconnected: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl RegistryListener for CountingListener {
        async fn on_participant_connected(&self, _participant: RemoteParticipant) {
            self.connected.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_participant_disconnected(&self, _sid: ParticipantSid) {
            self.disconnected.fetch_add(1, Ordering::SeqCst);
        }
        async fn on_participant_updated(&self, _participant: RemoteParticipant, _diff: ParticipantDiff) {}
    }

    #[tokio::test]
    async fn seeding_other_participants_does_not_notify_listeners() {
        let registry = ParticipantRegistry::new(ParticipantIdentity::from("me"));
        let listener = Arc::new(CountingListener {
            connected: AtomicUsize::new(0),
            disconnected: AtomicUsize::new(0),
        });
        registry.add_listener(listener.clone());

        registry.seed_other_participants(vec![WireParticipantInfo {
            sid: "PA_1".into(),
            ..Default::default()
        }]);

        assert_eq!(registry.remote_count(), 1);
        assert_eq!(listener.connected.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn apply_update_notifies_connect_then_disconnect() {
        let registry = ParticipantRegistry::new(ParticipantIdentity::from("me"));
        let listener = Arc::new(CountingListener {
            connected: AtomicUsize::new(0),
            disconnected: AtomicUsize::new(0),
        });
        registry.add_listener(listener.clone());

        registry
            .apply_update(ParticipantUpdate {
                participants: vec![WireParticipantInfo {
                    sid: "PA_1".into(),
                    state: 1,
                    ..Default::default()
                }],
            })
            .await;
        assert_eq!(listener.connected.load(Ordering::SeqCst), 1);

        registry
            .apply_update(ParticipantUpdate {
                participants: vec![WireParticipantInfo {
                    sid: "PA_1".into(),
                    state: 3,
                    ..Default::default()
                }],
            })
            .await;
        assert_eq!(listener.disconnected.load(Ordering::SeqCst), 1);
    }
}
