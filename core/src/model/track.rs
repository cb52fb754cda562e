//! Track descriptor value types and their mapping from wire enums.
//!
//! Every wire enum is converted with an exhaustive match and an explicit
//! default arm: an integer that doesn't correspond to a known variant
//! (e.g. a newer server talking to an older client) never passes through
//! silently, it logs a warning and falls back to the documented sentinel.

use tracing::warn;

use livekit_client_proto as wire;

use super::room::TimedVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackKind {
    #[default]
    Audio,
    Video,
    Data,
}

impl From<i32> for TrackKind {
    fn from(v: i32) -> Self {
        match wire::TrackType::try_from(v) {
            Ok(wire::TrackType::Audio) => Self::Audio,
            Ok(wire::TrackType::Video) => Self::Video,
            Ok(wire::TrackType::Data) => Self::Data,
            Err(_) => {
                warn!(value = v, "unknown TrackType on the wire, defaulting to Audio");
                Self::Audio
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackSource {
    #[default]
    Unknown,
    Camera,
    Microphone,
    ScreenShare,
    ScreenShareAudio,
}

impl From<i32> for TrackSource {
    fn from(v: i32) -> Self {
        match wire::TrackSource::try_from(v) {
            Ok(wire::TrackSource::Unknown) => Self::Unknown,
            Ok(wire::TrackSource::Camera) => Self::Camera,
            Ok(wire::TrackSource::Microphone) => Self::Microphone,
            Ok(wire::TrackSource::ScreenShare) => Self::ScreenShare,
            Ok(wire::TrackSource::ScreenShareAudio) => Self::ScreenShareAudio,
            Err(_) => {
                warn!(value = v, "unknown TrackSource on the wire, defaulting to Unknown");
                Self::Unknown
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EncryptionType {
    #[default]
    None,
    Gcm,
    Custom,
}

impl From<i32> for EncryptionType {
    fn from(v: i32) -> Self {
        match wire::EncryptionType::try_from(v) {
            Ok(wire::EncryptionType::None) => Self::None,
            Ok(wire::EncryptionType::Gcm) => Self::Gcm,
            Ok(wire::EncryptionType::Custom) => Self::Custom,
            Err(_) => {
                warn!(value = v, "unknown EncryptionType on the wire, defaulting to None");
                Self::None
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackupCodecPolicy {
    #[default]
    PreferRegression,
    Regression,
    Simulcast,
}

impl From<i32> for BackupCodecPolicy {
    fn from(v: i32) -> Self {
        match wire::BackupCodecPolicy::try_from(v) {
            Ok(wire::BackupCodecPolicy::PreferRegression) => Self::PreferRegression,
            Ok(wire::BackupCodecPolicy::Regression) => Self::Regression,
            Ok(wire::BackupCodecPolicy::Simulcast) => Self::Simulcast,
            Err(_) => {
                warn!(
                    value = v,
                    "unknown BackupCodecPolicy on the wire, defaulting to PreferRegression"
                );
                Self::PreferRegression
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VideoQuality {
    #[default]
    Low,
    Medium,
    High,
    Off,
}

impl From<i32> for VideoQuality {
    fn from(v: i32) -> Self {
        match wire::VideoQuality::try_from(v) {
            Ok(wire::VideoQuality::Low) => Self::Low,
            Ok(wire::VideoQuality::Medium) => Self::Medium,
            Ok(wire::VideoQuality::High) => Self::High,
            Ok(wire::VideoQuality::Off) => Self::Off,
            Err(_) => {
                warn!(value = v, "unknown VideoQuality on the wire, defaulting to Low");
                Self::Low
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioFeature {
    #[default]
    Stereo,
    NoDtx,
    AutoGainControl,
    EchoCancellation,
    NoiseSuppression,
    EnhancedNoiseCancellation,
}

impl From<i32> for AudioFeature {
    fn from(v: i32) -> Self {
        match wire::audio_track_feature::Feature::try_from(v) {
            Ok(wire::audio_track_feature::Feature::TfStereo) => Self::Stereo,
            Ok(wire::audio_track_feature::Feature::TfNoDtx) => Self::NoDtx,
            Ok(wire::audio_track_feature::Feature::TfAutoGainControl) => Self::AutoGainControl,
            Ok(wire::audio_track_feature::Feature::TfEchoCancellation) => Self::EchoCancellation,
            Ok(wire::audio_track_feature::Feature::TfNoiseSuppression) => Self::NoiseSuppression,
            Ok(wire::audio_track_feature::Feature::TfEnhancedNoiseCancellation) => {
                Self::EnhancedNoiseCancellation
            }
            Err(_) => {
                warn!(value = v, "unknown AudioTrackFeature on the wire, defaulting to Stereo");
                Self::Stereo
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VideoLayer {
    pub quality: VideoQuality,
    pub width: u32,
    pub height: u32,
    pub bitrate: u32,
    pub ssrc: u32,
}

impl From<wire::VideoLayer> for VideoLayer {
    fn from(l: wire::VideoLayer) -> Self {
        Self {
            quality: VideoQuality::from(l.quality),
            width: l.width,
            height: l.height,
            bitrate: l.bitrate,
            ssrc: l.ssrc,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulcastCodecInfo {
    pub mime_type: String,
    pub mid: String,
    pub cid: String,
    pub layers: Vec<VideoLayer>,
}

impl From<wire::SimulcastCodecInfo> for SimulcastCodecInfo {
    fn from(c: wire::SimulcastCodecInfo) -> Self {
        Self {
            mime_type: c.mime_type,
            mid: c.mid,
            cid: c.cid,
            layers: c.layers.into_iter().map(VideoLayer::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TrackInfo {
    pub sid: crate::ids::TrackSid,
    pub kind: TrackKind,
    pub name: String,
    pub muted: bool,
    pub width: u32,
    pub height: u32,
    pub simulcast: bool,
    pub disable_dtx: bool,
    pub source: TrackSource,
    pub layers: Vec<VideoLayer>,
    pub mime_type: String,
    pub mid: String,
    pub codecs: Vec<SimulcastCodecInfo>,
    pub stereo: bool,
    pub disable_red: bool,
    pub encryption: EncryptionType,
    pub stream: String,
    pub audio_features: Vec<AudioFeature>,
    pub backup_codec_policy: BackupCodecPolicy,
    pub version: Option<TimedVersion>,
    /// Set once the corresponding SDP m-line has been negotiated on both
    /// sides; before that the track exists in the registry but isn't
    /// flowing media yet.
    pub live: bool,
}

impl From<wire::TrackInfo> for TrackInfo {
    fn from(t: wire::TrackInfo) -> Self {
        Self {
            sid: t.sid.into(),
            kind: TrackKind::from(t.r#type),
            name: t.name,
            muted: t.muted,
            width: t.width,
            height: t.height,
            simulcast: t.simulcast,
            disable_dtx: t.disable_dtx,
            source: TrackSource::from(t.source),
            layers: t.layers.into_iter().map(VideoLayer::from).collect(),
            mime_type: t.mime_type,
            mid: t.mid,
            codecs: t.codecs.into_iter().map(SimulcastCodecInfo::from).collect(),
            stereo: t.stereo,
            disable_red: t.disable_red,
            encryption: EncryptionType::from(t.encryption),
            stream: t.stream,
            audio_features: t.audio_features.into_iter().map(AudioFeature::from).collect(),
            backup_codec_policy: BackupCodecPolicy::from(t.backup_codec_policy),
            version: t.version.map(TimedVersion::from),
            live: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_track_type_defaults_to_audio() {
        assert_eq!(TrackKind::from(999), TrackKind::Audio);
    }

    #[test]
    fn known_track_type_maps_through() {
        assert_eq!(TrackKind::from(wire::TrackType::Video as i32), TrackKind::Video);
    }

    #[test]
    fn unknown_backup_codec_policy_defaults_to_prefer_regression() {
        assert_eq!(
            BackupCodecPolicy::from(999),
            BackupCodecPolicy::PreferRegression
        );
    }

    #[test]
    fn track_info_conversion_preserves_sid_and_kind() {
        let wire_track = wire::TrackInfo {
            sid: "TR_1".into(),
            r#type: wire::TrackType::Video as i32,
            ..Default::default()
        };
        let track = TrackInfo::from(wire_track);
        assert_eq!(track.sid.as_str(), "TR_1");
        assert_eq!(track.kind, TrackKind::Video);
        assert!(!track.live);
    }
}
