//! The apply-update algorithm (§4.5): reconciles a server-pushed
//! `ParticipantUpdate` against the locally stored remote participant map.

use dashmap::DashMap;

use livekit_client_proto::ParticipantInfo as WireParticipantInfo;

use crate::ids::ParticipantSid;
use crate::model::room::TimedVersion;
use crate::model::{ParticipantState, RemoteParticipant};

use super::listener::ParticipantDiff;

/// Outcome of applying one `ParticipantInfo` entry from a
/// `ParticipantUpdate`, used by the registry to decide which listener
/// callback (if any) to fire.
pub enum ApplyOutcome {
    /// The entry's version was not newer than what's stored; ignored.
    Discarded,
    Connected(RemoteParticipant),
    Disconnected(ParticipantSid),
    Updated(RemoteParticipant, ParticipantDiff),
}

/// Applies one participant-update entry against `remotes`, per the
/// algorithm in §4.5. `remotes` is mutated in place.
pub fn apply_participant_entry(
    remotes: &DashMap<ParticipantSid, RemoteParticipant>,
    entry: WireParticipantInfo,
) -> ApplyOutcome {
    let sid: ParticipantSid = entry.sid.clone().into();
    let incoming_version = entry.timed_version.map(TimedVersion::from);

    if let Some(existing) = remotes.get(&sid) {
        if let (Some(incoming), Some(current)) = (incoming_version, existing.version) {
            if incoming.is_older_than(&current) {
                return ApplyOutcome::Discarded;
            }
        }
    }

    let new_state = ParticipantState::from(entry.state);

    if new_state == ParticipantState::Disconnected {
        if remotes.remove(&sid).is_some() {
            return ApplyOutcome::Disconnected(sid);
        }
        // Unknown participant disconnecting is not itself an event worth
        // raising; treat it the same as a discard.
        return ApplyOutcome::Discarded;
    }

    let incoming = RemoteParticipant::from_wire(entry);

    match remotes.get(&sid) {
        None => {
            remotes.insert(sid, incoming.clone());
            ApplyOutcome::Connected(incoming)
        }
        Some(existing) => {
            let diff = diff_participants(&existing, &incoming);
            drop(existing);
            remotes.insert(sid, incoming.clone());
            ApplyOutcome::Updated(incoming, diff)
        }
    }
}

fn diff_participants(before: &RemoteParticipant, after: &RemoteParticipant) -> ParticipantDiff {
    let before_tracks: std::collections::HashSet<_> = before.tracks.keys().cloned().collect();
    let after_tracks: std::collections::HashSet<_> = after.tracks.keys().cloned().collect();

    ParticipantDiff {
        metadata_changed: before.metadata != after.metadata,
        attributes_changed: before.attributes != after.attributes,
        permission_changed: format!("{:?}", before.permission) != format!("{:?}", after.permission),
        tracks_added: after_tracks.difference(&before_tracks).cloned().collect(),
        tracks_removed: before_tracks.difference(&after_tracks).cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livekit_client_proto::TimedVersion as WireTimedVersion;

    fn wire_info(sid: &str, state: i32, version: (i64, i32)) -> WireParticipantInfo {
        WireParticipantInfo {
            sid: sid.into(),
            identity: format!("{sid}-identity"),
            state,
            timed_version: Some(WireTimedVersion {
                unix_micro: version.0,
                ticks: version.1,
            }),
            ..Default::default()
        }
    }

    #[test]
    fn unknown_sid_in_non_disconnected_state_creates_participant() {
        let remotes = DashMap::new();
        let outcome = apply_participant_entry(&remotes, wire_info("PA_1", 1, (10, 0)));
        assert!(matches!(outcome, ApplyOutcome::Connected(_)));
        assert!(remotes.contains_key(&ParticipantSid::from("PA_1")));
    }

    #[test]
    fn disconnected_state_removes_known_participant() {
        let remotes = DashMap::new();
        apply_participant_entry(&remotes, wire_info("PA_1", 1, (10, 0)));
        let outcome = apply_participant_entry(&remotes, wire_info("PA_1", 3, (20, 0)));
        assert!(matches!(outcome, ApplyOutcome::Disconnected(_)));
        assert!(!remotes.contains_key(&ParticipantSid::from("PA_1")));
    }

    #[test]
    fn stale_version_is_discarded_regardless_of_application_order() {
        let remotes = DashMap::new();
        apply_participant_entry(&remotes, wire_info("PA_1", 1, (20, 0)));
        let outcome = apply_participant_entry(&remotes, wire_info("PA_1", 2, (10, 0)));
        assert!(matches!(outcome, ApplyOutcome::Discarded));
    }

    #[test]
    fn metadata_change_is_reflected_in_the_diff() {
        let remotes = DashMap::new();
        let mut first = wire_info("PA_1", 1, (10, 0));
        first.metadata = "before".into();
        apply_participant_entry(&remotes, first);

        let mut second = wire_info("PA_1", 1, (20, 0));
        second.metadata = "after".into();
        let outcome = apply_participant_entry(&remotes, second);

        match outcome {
            ApplyOutcome::Updated(_, diff) => assert!(diff.metadata_changed),
            _ => panic!("expected an update"),
        }
    }
}
