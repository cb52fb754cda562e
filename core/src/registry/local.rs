//! Local track publication bookkeeping (§4.5 "Track publication (local)").
//!
//! A track is considered published only after both the
//! `TrackPublishedResponse` has bound its sid AND the next publisher-side
//! answer negotiates a matching m-line; this module owns the first half,
//! the Transport Manager's negotiation path owns the second.

use livekit_client_proto::{AddTrackRequest, TrackPublishedResponse};

use crate::ids::ClientTrackId;
use crate::model::participant::TrackKindHint;
use crate::model::{LocalParticipant, TrackInfo};

/// Registers a pending publish before the `AddTrackRequest` is sent, so a
/// later `TrackPublishedResponse` with a matching `cid` can be bound.
pub fn begin_publish(local: &mut LocalParticipant, cid: ClientTrackId, request: &AddTrackRequest) {
    local.pending_publishes.insert(
        cid,
        TrackKindHint {
            name: request.name.clone(),
        },
    );
}

/// Binds a server acknowledgement to its pending publish. Returns `false`
/// (and leaves local state untouched) if the response's `cid` does not
/// match any pending publish, which the caller should treat as a protocol
/// violation per §7.
pub fn apply_track_published(local: &mut LocalParticipant, response: TrackPublishedResponse) -> bool {
    let cid = ClientTrackId::from(response.cid);
    if !local.pending_publishes.contains_key(&cid) {
        return false;
    }
    let track = TrackInfo::from(response.track.unwrap_or_default());
    local.bind_published_track(&cid, track);
    true
}

/// A track is live only once both halves of §4.5 step 5 have completed;
/// the negotiation path calls this once its m-line is confirmed.
pub fn mark_track_live(local: &mut LocalParticipant, sid: &crate::ids::TrackSid) {
    if let Some(track) = local.published_tracks.get_mut(sid) {
        track.live = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::ParticipantIdentity;
    use livekit_client_proto::TrackInfo as WireTrackInfo;

    #[test]
    fn track_published_response_with_unknown_cid_is_rejected() {
        let mut local = LocalParticipant::new(ParticipantIdentity::from("alice"));
        let applied = apply_track_published(
            &mut local,
            TrackPublishedResponse {
                cid: "unknown".into(),
                track: Some(WireTrackInfo::default()),
            },
        );
        assert!(!applied);
    }

    #[test]
    fn track_published_response_binds_pending_publish_and_marks_live_on_negotiation() {
        let mut local = LocalParticipant::new(ParticipantIdentity::from("alice"));
        let cid = ClientTrackId::generate();
        begin_publish(
            &mut local,
            cid.clone(),
            &AddTrackRequest {
                name: "cam".into(),
                ..Default::default()
            },
        );

        let applied = apply_track_published(
            &mut local,
            TrackPublishedResponse {
                cid: cid.to_string(),
                track: Some(WireTrackInfo {
                    sid: "TR_1".into(),
                    ..Default::default()
                }),
            },
        );
        assert!(applied);
        assert!(local.pending_publishes.is_empty());

        let sid = crate::ids::TrackSid::from("TR_1");
        assert!(!local.published_tracks.get(&sid).unwrap().live);
        mark_track_live(&mut local, &sid);
        assert!(local.published_tracks.get(&sid).unwrap().live);
    }
}
