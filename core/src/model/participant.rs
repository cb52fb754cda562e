//! Local and remote participant state.

use std::collections::HashMap;

use tracing::warn;

use livekit_client_proto as wire;

use crate::ids::{ClientTrackId, ParticipantIdentity, ParticipantSid, TrackSid};

use super::room::TimedVersion;
use super::track::TrackInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParticipantKind {
    #[default]
    Standard,
    Ingress,
    Egress,
    Sip,
    Agent,
}

impl From<i32> for ParticipantKind {
    fn from(v: i32) -> Self {
        match wire::ParticipantKind::try_from(v) {
            Ok(wire::ParticipantKind::Standard) => Self::Standard,
            Ok(wire::ParticipantKind::Ingress) => Self::Ingress,
            Ok(wire::ParticipantKind::Egress) => Self::Egress,
            Ok(wire::ParticipantKind::Sip) => Self::Sip,
            Ok(wire::ParticipantKind::Agent) => Self::Agent,
            Err(_) => {
                warn!(value = v, "unknown ParticipantKind on the wire, defaulting to Standard");
                Self::Standard
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParticipantState {
    #[default]
    Joining,
    Joined,
    Active,
    Disconnected,
}

impl From<i32> for ParticipantState {
    fn from(v: i32) -> Self {
        match wire::participant_info::State::try_from(v) {
            Ok(wire::participant_info::State::Joining) => Self::Joining,
            Ok(wire::participant_info::State::Joined) => Self::Joined,
            Ok(wire::participant_info::State::Active) => Self::Active,
            Ok(wire::participant_info::State::Disconnected) => Self::Disconnected,
            Err(_) => {
                warn!(value = v, "unknown ParticipantInfo.State on the wire, defaulting to Joining");
                Self::Joining
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionQuality {
    #[default]
    Poor,
    Good,
    Excellent,
    Lost,
}

impl From<i32> for ConnectionQuality {
    fn from(v: i32) -> Self {
        match wire::ConnectionQuality::try_from(v) {
            Ok(wire::ConnectionQuality::QualityPoor) => Self::Poor,
            Ok(wire::ConnectionQuality::QualityGood) => Self::Good,
            Ok(wire::ConnectionQuality::QualityExcellent) => Self::Excellent,
            Ok(wire::ConnectionQuality::QualityLost) => Self::Lost,
            Err(_) => {
                warn!(value = v, "unknown ConnectionQuality on the wire, defaulting to Poor");
                Self::Poor
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParticipantPermission {
    pub can_subscribe: bool,
    pub can_publish: bool,
    pub can_publish_data: bool,
    pub hidden: bool,
    pub can_update_metadata: bool,
    pub can_subscribe_metrics: bool,
}

impl From<wire::ParticipantPermission> for ParticipantPermission {
    fn from(p: wire::ParticipantPermission) -> Self {
        Self {
            can_subscribe: p.can_subscribe,
            can_publish: p.can_publish,
            can_publish_data: p.can_publish_data,
            hidden: p.hidden,
            can_update_metadata: p.can_update_metadata,
            can_subscribe_metrics: p.can_subscribe_metrics,
        }
    }
}

/// The exactly-one local participant for the session, assigned its sid by
/// `JoinResponse`.
#[derive(Debug, Clone, Default)]
pub struct LocalParticipant {
    pub identity: ParticipantIdentity,
    pub sid: ParticipantSid,
    pub name: String,
    pub metadata: String,
    pub attributes: HashMap<String, String>,
    pub kind: ParticipantKind,
    /// Tracks the server has acknowledged as published, keyed by their
    /// server-assigned sid.
    pub published_tracks: HashMap<TrackSid, TrackInfo>,
    /// Publish requests sent but not yet acknowledged with a
    /// `TrackPublishedResponse`, keyed by the client-generated id.
    pub pending_publishes: HashMap<ClientTrackId, TrackKindHint>,
}

/// The subset of an `AddTrackRequest` worth retaining while a publish is
/// in flight, used to validate/augment the eventual `TrackPublishedResponse`.
#[derive(Debug, Clone)]
pub struct TrackKindHint {
    pub name: String,
}

impl LocalParticipant {
    pub fn new(identity: ParticipantIdentity) -> Self {
        Self {
            identity,
            ..Default::default()
        }
    }

    /// Binds a previously pending publish to its server-assigned sid, per
    /// the track-publication algorithm: cid → track.sid is a permanent
    /// mapping once established.
    pub fn bind_published_track(&mut self, cid: &ClientTrackId, track: TrackInfo) {
        self.pending_publishes.remove(cid);
        self.published_tracks.insert(track.sid.clone(), track);
    }
}

#[derive(Debug, Clone, Default)]
pub struct RemoteParticipant {
    pub sid: ParticipantSid,
    pub identity: ParticipantIdentity,
    pub state: ParticipantState,
    pub permission: ParticipantPermission,
    pub metadata: String,
    pub attributes: HashMap<String, String>,
    pub name: String,
    pub tracks: HashMap<TrackSid, TrackInfo>,
    pub connection_quality: ConnectionQuality,
    pub connection_quality_score: f32,
    pub version: Option<TimedVersion>,
}

impl RemoteParticipant {
    pub fn from_wire(info: wire::ParticipantInfo) -> Self {
        Self {
            sid: info.sid.into(),
            identity: info.identity.into(),
            state: ParticipantState::from(info.state),
            permission: info.permission.map(ParticipantPermission::from).unwrap_or_default(),
            metadata: info.metadata,
            attributes: info.attributes,
            name: info.name,
            tracks: info
                .tracks
                .into_iter()
                .map(TrackInfo::from)
                .map(|t| (t.sid.clone(), t))
                .collect(),
            connection_quality: ConnectionQuality::default(),
            connection_quality_score: 0.0,
            version: info.timed_version.map(TimedVersion::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_participant_from_wire_indexes_tracks_by_sid() {
        let info = wire::ParticipantInfo {
            sid: "PA_1".into(),
            identity: "alice".into(),
            tracks: vec![wire::TrackInfo {
                sid: "TR_1".into(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let p = RemoteParticipant::from_wire(info);
        assert_eq!(p.sid.as_str(), "PA_1");
        assert!(p.tracks.contains_key(&TrackSid::from("TR_1")));
    }

    #[test]
    fn local_participant_binds_pending_publish_to_server_sid() {
        let mut local = LocalParticipant::new(ParticipantIdentity::from("bob"));
        let cid = ClientTrackId::generate();
        local
            .pending_publishes
            .insert(cid.clone(), TrackKindHint { name: "cam".into() });

        let mut track = TrackInfo::default();
        track.sid = TrackSid::from("TR_9");
        local.bind_published_track(&cid, track);

        assert!(local.pending_publishes.is_empty());
        assert!(local.published_tracks.contains_key(&TrackSid::from("TR_9")));
    }
}
