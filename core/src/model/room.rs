//! Room-scoped state: the singleton room record and the causal-ordering
//! tuple used to discard stale updates.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct TimedVersion {
    pub unix_micro: i64,
    pub ticks: i32,
}

impl TimedVersion {
    pub fn new(unix_micro: i64, ticks: i32) -> Self {
        Self { unix_micro, ticks }
    }

    /// True when `self` is strictly older than `other`, i.e. an update
    /// carrying `self` as its version must be discarded in favor of one
    /// already applied at `other`.
    pub fn is_older_than(&self, other: &TimedVersion) -> bool {
        self < other
    }
}

impl From<livekit_client_proto::TimedVersion> for TimedVersion {
    fn from(v: livekit_client_proto::TimedVersion) -> Self {
        Self {
            unix_micro: v.unix_micro,
            ticks: v.ticks,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RoomInfo {
    pub sid: String,
    pub name: String,
    pub metadata: String,
    pub creation_time: i64,
    pub max_participants: u32,
    pub num_participants: u32,
    pub num_publishers: u32,
    pub active_recording: bool,
    pub version: Option<TimedVersion>,
}

impl From<livekit_client_proto::Room> for RoomInfo {
    fn from(r: livekit_client_proto::Room) -> Self {
        Self {
            sid: r.sid,
            name: r.name,
            metadata: r.metadata,
            creation_time: r.creation_time,
            max_participants: r.max_participants,
            num_participants: r.num_participants,
            num_publishers: r.num_publishers,
            active_recording: r.active_recording,
            version: r.version.map(TimedVersion::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_ordering_is_lexicographic_on_micros_then_ticks() {
        let older = TimedVersion::new(100, 5);
        let newer_by_micro = TimedVersion::new(101, 0);
        let newer_by_tick = TimedVersion::new(100, 6);

        assert!(older.is_older_than(&newer_by_micro));
        assert!(older.is_older_than(&newer_by_tick));
        assert!(!newer_by_micro.is_older_than(&older));
    }

    #[test]
    fn equal_versions_are_not_older_than_each_other() {
        let a = TimedVersion::new(5, 5);
        let b = TimedVersion::new(5, 5);
        assert!(!a.is_older_than(&b));
    }
}
