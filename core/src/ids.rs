//! Strongly-typed identifiers.
//!
//! All wire identifiers are opaque UTF-8 strings; newtypes keep a
//! `ParticipantSid` from being passed where a `TrackSid` is expected even
//! though both are `String`s on the wire. Each wraps an `Arc<str>` so
//! cloning an id (routing it through several registries and listener
//! callbacks) is cheap.

use std::fmt;
use std::sync::Arc;

macro_rules! opaque_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(Arc::from(s))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(Arc::from(s))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

opaque_id!(ParticipantSid);
opaque_id!(ParticipantIdentity);
opaque_id!(TrackSid);
opaque_id!(StreamId);

/// Client-assigned at publish request time, echoed back by the server in
/// `TrackPublishedResponse` to correlate the local publish intent with the
/// server-assigned `TrackSid`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClientTrackId(Arc<str>);

impl ClientTrackId {
    /// Generates a new client-assigned track id.
    pub fn generate() -> Self {
        Self(Arc::from(uuid::Uuid::new_v4().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientTrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ClientTrackId {
    fn from(s: String) -> Self {
        Self(Arc::from(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_sid_round_trips_through_display() {
        let sid = ParticipantSid::from("PA_abc123");
        assert_eq!(sid.to_string(), "PA_abc123");
        assert_eq!(sid.as_str(), "PA_abc123");
    }

    #[test]
    fn client_track_id_generate_is_unique() {
        let a = ClientTrackId::generate();
        let b = ClientTrackId::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn distinct_id_types_do_not_compare_equal_by_wire_shape() {
        let sid = ParticipantSid::from("same");
        let track = TrackSid::from("same");
        // Different types entirely; this just documents that the newtypes
        // don't accidentally unify via a shared trait object.
        assert_eq!(sid.as_str(), track.as_str());
    }
}
