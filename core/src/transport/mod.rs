//! Transport Manager (§4.3): owns the publisher and subscriber peer
//! connections, drives SDP negotiation and ICE trickling over the
//! Signalling Client, and runs the reconnection state machine.

pub mod data_channel;
pub mod negotiation;
pub mod peer;
pub mod reconnect;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::ice_transport::ice_transport_policy::RTCIceTransportPolicy;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::track::track_local::TrackLocal;

use livekit_client_proto::{
    signal_request, ICEServer as WireIceServer, SessionDescription as WireSessionDescription, SignalRequest,
    SignalTarget as WireSignalTarget, TrickleRequest,
};

use crate::codec::TrickleCandidateInit;
use crate::error::LiveKitError;
use crate::signal::SignalClient;

pub use data_channel::{LOSSY_DATA_CHANNEL_LABEL, RELIABLE_DATA_CHANNEL_LABEL};
pub use negotiation::NegotiationDebouncer;
pub use peer::PeerHandle;
pub use reconnect::{ReconnectMode, ReconnectPolicy};

/// The two peer connections a session owns (§3 "Peer connection state").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalTarget {
    Publisher,
    Subscriber,
}

impl SignalTarget {
    pub fn to_wire(self) -> WireSignalTarget {
        match self {
            Self::Publisher => WireSignalTarget::Publisher,
            Self::Subscriber => WireSignalTarget::Subscriber,
        }
    }

    pub fn from_wire(v: i32) -> Self {
        match WireSignalTarget::try_from(v) {
            Ok(WireSignalTarget::Publisher) => Self::Publisher,
            Ok(WireSignalTarget::Subscriber) => Self::Subscriber,
            Err(_) => {
                warn!(value = v, "unknown SignalTarget on the wire, defaulting to Publisher");
                Self::Publisher
            }
        }
    }
}

/// Aggregate ICE/RTC configuration derived from `JoinResponse`/
/// `ReconnectResponse` (§6).
#[derive(Debug, Clone, Default)]
pub struct RtcConfig {
    pub ice_servers: Vec<WireIceServer>,
    pub force_relay: bool,
}

impl RtcConfig {
    pub fn to_webrtc_configuration(&self) -> RTCConfiguration {
        RTCConfiguration {
            ice_servers: self
                .ice_servers
                .iter()
                .map(|s| RTCIceServer {
                    urls: s.urls.clone(),
                    username: s.username.clone(),
                    credential: s.credential.clone(),
                    ..Default::default()
                })
                .collect(),
            ice_transport_policy: if self.force_relay {
                RTCIceTransportPolicy::Relay
            } else {
                RTCIceTransportPolicy::All
            },
            ..Default::default()
        }
    }
}

/// Listener for Transport Manager events the Session Orchestrator cares
/// about: aggregate connection state, per-track negotiation completion,
/// and ICE/negotiation failures that should drive reconnection.
#[async_trait::async_trait]
pub trait TransportListener: Send + Sync {
    async fn on_publisher_state(&self, state: RTCPeerConnectionState);
    async fn on_subscriber_state(&self, state: RTCPeerConnectionState);
    /// Fired once a publisher answer has been applied with an m-line
    /// matching `mid`; the Session Orchestrator uses this to flip a
    /// pending local track to `live` (§4.5 step 5).
    async fn on_publisher_negotiated(&self, mid: String);
}

/// Owns both peer connections and the negotiation/reconnection machinery
/// that drives them. Constructed once per session; torn down and
/// recreated wholesale on a full reconnect (§4.3 "Reconnection").
pub struct TransportManager {
    signal: Arc<SignalClient>,
    negotiation_delay: Duration,
    max_negotiation_delay: Duration,
    backpressure_threshold: usize,

    publisher: RwLock<Option<Arc<PeerHandle>>>,
    subscriber: RwLock<Option<Arc<PeerHandle>>>,
    data_channels: Arc<data_channel::PublisherDataChannels>,

    debouncer: RwLock<Option<NegotiationDebouncer>>,
    negotiate_lock: AsyncMutex<()>,
    subscriber_primary: AtomicBool,
    fast_publish: AtomicBool,
    listener: Arc<RwLock<Option<Arc<dyn TransportListener>>>>,

    /// Remote candidates buffered for a target whose peer connection has
    /// not yet had its remote description set; flushed once negotiation
    /// completes, mirroring trickle-before-offer races.
    pending_remote_candidates: Mutex2<Vec<(SignalTarget, RTCIceCandidateInit)>>,
}

/// A small alias so this module doesn't have two different mutex types
/// named `Mutex` in scope (std-only state, no `.await` while held).
type Mutex2<T> = parking_lot::Mutex<T>;

impl TransportManager {
    pub fn new(
        signal: Arc<SignalClient>,
        negotiation_delay: Duration,
        max_negotiation_delay: Duration,
        backpressure_threshold: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            signal,
            negotiation_delay,
            max_negotiation_delay,
            backpressure_threshold,
            publisher: RwLock::new(None),
            subscriber: RwLock::new(None),
            data_channels: data_channel::PublisherDataChannels::new(backpressure_threshold),
            debouncer: RwLock::new(None),
            negotiate_lock: AsyncMutex::new(()),
            subscriber_primary: AtomicBool::new(false),
            fast_publish: AtomicBool::new(false),
            listener: Arc::new(RwLock::new(None)),
            pending_remote_candidates: Mutex2::new(Vec::new()),
        })
    }

    pub fn set_listener(&self, listener: Arc<dyn TransportListener>) {
        *self.listener.write() = Some(listener);
    }

    pub fn data_channels(&self) -> Arc<data_channel::PublisherDataChannels> {
        self.data_channels.clone()
    }

    /// Creates both peer connections fresh against `config`, per the join
    /// protocol (§4.4 step 4) or a full reconnect (§4.3). Any previously
    /// held peer connections are dropped (closed by the caller first via
    /// `close()` on a reconnect).
    pub async fn build_peer_connections(
        self: &Arc<Self>,
        config: &RtcConfig,
        subscriber_primary: bool,
        fast_publish: bool,
        will_publish: bool,
    ) -> webrtc::error::Result<()> {
        self.subscriber_primary.store(subscriber_primary, Ordering::SeqCst);
        self.fast_publish.store(fast_publish, Ordering::SeqCst);

        let rtc_config = config.to_webrtc_configuration();

        let publisher = PeerHandle::new(SignalTarget::Publisher, rtc_config.clone()).await?;
        let subscriber = PeerHandle::new(SignalTarget::Subscriber, rtc_config).await?;

        if will_publish {
            self.data_channels.create(publisher.raw()).await?;
        }

        self.install_state_watchers(&publisher, &subscriber);
        self.install_ice_candidate_forwarding(&publisher);
        self.install_ice_candidate_forwarding(&subscriber);

        *self.publisher.write() = Some(publisher);
        *self.subscriber.write() = Some(subscriber);

        *self.debouncer.write() = Some(NegotiationDebouncer::spawn(
            self.negotiation_delay,
            self.max_negotiation_delay,
        ));
        self.spawn_negotiation_driver();

        Ok(())
    }

    fn install_state_watchers(&self, publisher: &Arc<PeerHandle>, subscriber: &Arc<PeerHandle>) {
        spawn_state_forwarder(publisher.subscribe_state(), self.listener.clone(), true);
        spawn_state_forwarder(subscriber.subscribe_state(), self.listener.clone(), false);
    }

    fn install_ice_candidate_forwarding(&self, peer: &Arc<PeerHandle>) {
        let signal = self.signal.clone();
        let target = peer.target();
        peer.raw().on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let signal = signal.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                let Ok(init) = candidate.to_json() else {
                    return;
                };
                let candidate_init = TrickleCandidateInit {
                    candidate: init.candidate,
                    sdp_mid: init.sdp_mid.unwrap_or_default(),
                    sdp_m_line_index: init.sdp_mline_index.map(|v| v as i32).unwrap_or_default(),
                    username_fragment: init.username_fragment,
                };
                signal.send(SignalRequest::new(signal_request::Message::Trickle(TrickleRequest {
                    candidate_init: candidate_init.to_json(),
                    target: target.to_wire() as i32,
                    r#final: false,
                })));
            })
        }));
    }

    /// Schedules a publisher renegotiation after the configured debounce
    /// delay, or immediately if `force` is set (§4.3 step 1).
    pub fn negotiate(&self, force: bool) {
        if let Some(debouncer) = self.debouncer.read().as_ref() {
            debouncer.request(force);
        }
    }

    fn spawn_negotiation_driver(self: &Arc<Self>) {
        let Some(debouncer) = self.debouncer.read().as_ref().map(|d| d.fire_notify()) else {
            return;
        };
        let this = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                debouncer.notified().await;
                this.fire_publisher_offer().await;
            }
        });
    }

    /// Creates an offer on the publisher, sets it as local, sends it, and
    /// awaits the server's answer asynchronously via `set_remote_answer`
    /// (§4.3 step 2).
    async fn fire_publisher_offer(&self) {
        let _guard = self.negotiate_lock.lock().await;
        let Some(publisher) = self.publisher.read().clone() else {
            return;
        };

        let offer = match publisher.raw().create_offer(None).await {
            Ok(offer) => offer,
            Err(err) => {
                warn!(error = %err, "failed to create publisher offer");
                return;
            }
        };
        if let Err(err) = publisher.raw().set_local_description(offer.clone()).await {
            warn!(error = %err, "failed to set publisher local description");
            return;
        }

        self.signal.send(SignalRequest::new(signal_request::Message::Offer(WireSessionDescription {
            r#type: "offer".into(),
            sdp: offer.sdp,
        })));
    }

    /// Applies a server-pushed offer to the subscriber and replies with
    /// an answer (§4.3 "Subscriber side").
    pub async fn set_remote_offer(&self, sdp: WireSessionDescription) -> Result<(), LiveKitError> {
        let Some(subscriber) = self.subscriber.read().clone() else {
            return Err(LiveKitError::Rtc("no subscriber peer connection".into()));
        };

        let desc = parse_session_description(&sdp)?;
        subscriber
            .raw()
            .set_remote_description(desc)
            .await
            .map_err(|err| LiveKitError::Rtc(err.to_string()))?;
        subscriber.mark_remote_description_set();
        self.flush_pending_candidates(SignalTarget::Subscriber).await;

        let answer = subscriber
            .raw()
            .create_answer(None)
            .await
            .map_err(|err| LiveKitError::Rtc(err.to_string()))?;
        subscriber
            .raw()
            .set_local_description(answer.clone())
            .await
            .map_err(|err| LiveKitError::Rtc(err.to_string()))?;

        self.signal.send(SignalRequest::new(signal_request::Message::Answer(WireSessionDescription {
            r#type: "answer".into(),
            sdp: answer.sdp,
        })));
        Ok(())
    }

    /// Applies a server-sent answer to the publisher (§4.3 step 2).
    pub async fn set_remote_answer(&self, sdp: WireSessionDescription) -> Result<(), LiveKitError> {
        let Some(publisher) = self.publisher.read().clone() else {
            return Err(LiveKitError::Rtc("no publisher peer connection".into()));
        };
        let desc = parse_session_description(&sdp)?;

        let mid = extract_first_mid(&desc.sdp);
        publisher
            .raw()
            .set_remote_description(desc)
            .await
            .map_err(|err| LiveKitError::Rtc(err.to_string()))?;
        publisher.mark_remote_description_set();
        self.flush_pending_candidates(SignalTarget::Publisher).await;

        if let Some(mid) = mid {
            if let Some(listener) = self.listener.read().clone() {
                listener.on_publisher_negotiated(mid).await;
            }
        }
        Ok(())
    }

    /// Applies a remote ICE candidate to the named transport. Buffered
    /// (not applied) if that side's remote description isn't set yet.
    pub async fn add_ice_candidate(&self, target: SignalTarget, candidate: RTCIceCandidateInit) -> Result<(), LiveKitError> {
        let peer = match target {
            SignalTarget::Publisher => self.publisher.read().clone(),
            SignalTarget::Subscriber => self.subscriber.read().clone(),
        };
        let Some(peer) = peer else {
            self.pending_remote_candidates.lock().push((target, candidate));
            return Ok(());
        };

        if !peer.has_remote_description() {
            self.pending_remote_candidates.lock().push((target, candidate));
            return Ok(());
        }

        peer.raw()
            .add_ice_candidate(candidate)
            .await
            .map_err(|err| LiveKitError::Rtc(err.to_string()))
    }

    async fn flush_pending_candidates(&self, target: SignalTarget) {
        let pending: Vec<_> = {
            let mut guard = self.pending_remote_candidates.lock();
            let (matching, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut *guard)
                .into_iter()
                .partition(|(t, _)| *t == target);
            *guard = rest;
            matching
        };

        let peer = match target {
            SignalTarget::Publisher => self.publisher.read().clone(),
            SignalTarget::Subscriber => self.subscriber.read().clone(),
        };
        let Some(peer) = peer else { return };

        for (_, candidate) in pending {
            if let Err(err) = peer.raw().add_ice_candidate(candidate).await {
                warn!(error = %err, "failed to apply buffered ice candidate");
            }
        }
    }

    /// Adds an outgoing media track to the publisher and triggers
    /// negotiation (§4.3 "add_track/remove_track"). Returns the RTP
    /// sender so the caller can later `remove_track` the same track on
    /// unpublish.
    pub async fn add_track(
        &self,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Result<Arc<webrtc::rtp_transceiver::rtp_sender::RTCRtpSender>, LiveKitError> {
        let Some(publisher) = self.publisher.read().clone() else {
            return Err(LiveKitError::Rtc("no publisher peer connection".into()));
        };
        let sender = publisher
            .raw()
            .add_track(track)
            .await
            .map_err(|err| LiveKitError::Rtc(err.to_string()))?;
        self.negotiate(false);
        Ok(sender)
    }

    pub async fn remove_track(&self, sender: Arc<webrtc::rtp_transceiver::rtp_sender::RTCRtpSender>) -> Result<(), LiveKitError> {
        let Some(publisher) = self.publisher.read().clone() else {
            return Err(LiveKitError::Rtc("no publisher peer connection".into()));
        };
        publisher
            .raw()
            .remove_track(&sender)
            .await
            .map_err(|err| LiveKitError::Rtc(err.to_string()))?;
        self.negotiate(false);
        Ok(())
    }

    /// True once the primary transport (subscriber if `subscriber_primary`,
    /// else publisher) is connected, per §3 "Peer connection state".
    pub fn is_session_ready(&self) -> bool {
        let primary = if self.subscriber_primary.load(Ordering::SeqCst) {
            self.subscriber.read().clone()
        } else {
            self.publisher.read().clone()
        };
        primary.map(|p| p.state() == RTCPeerConnectionState::Connected).unwrap_or(false)
    }

    pub async fn close(&self) {
        if let Some(p) = self.publisher.write().take() {
            let _ = p.raw().close().await;
        }
        if let Some(s) = self.subscriber.write().take() {
            let _ = s.raw().close().await;
        }
        self.debouncer.write().take();
        self.pending_remote_candidates.lock().clear();
        info!("transport manager closed both peer connections");
    }
}

/// Spawns a task that forwards every change on `state_rx` to the
/// currently-installed `TransportListener`, if any. Runs for the lifetime
/// of the peer connection; `watch::Receiver::changed` returns `Err` once
/// the sender (owned by the peer connection's callback closure) is
/// dropped, which is this task's own exit signal.
fn spawn_state_forwarder(
    mut state_rx: tokio::sync::watch::Receiver<RTCPeerConnectionState>,
    listener: Arc<RwLock<Option<Arc<dyn TransportListener>>>>,
    is_publisher: bool,
) {
    tokio::spawn(async move {
        loop {
            let state = *state_rx.borrow();
            if let Some(listener) = listener.read().clone() {
                if is_publisher {
                    listener.on_publisher_state(state).await;
                } else {
                    listener.on_subscriber_state(state).await;
                }
            }
            if state_rx.changed().await.is_err() {
                return;
            }
        }
    });
}

/// Converts a decoded trickle JSON payload (§6) into the `webrtc-rs`
/// candidate init shape `add_ice_candidate` expects.
pub fn trickle_to_ice_candidate_init(candidate: &TrickleCandidateInit) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate.clone(),
        sdp_mid: Some(candidate.sdp_mid.clone()),
        sdp_mline_index: Some(candidate.sdp_m_line_index as u16),
        username_fragment: candidate.username_fragment.clone(),
    }
}

fn parse_session_description(desc: &WireSessionDescription) -> Result<RTCSessionDescription, LiveKitError> {
    match desc.r#type.as_str() {
        "offer" => RTCSessionDescription::offer(desc.sdp.clone()),
        "answer" => RTCSessionDescription::answer(desc.sdp.clone()),
        "pranswer" => RTCSessionDescription::pranswer(desc.sdp.clone()),
        other => return Err(LiveKitError::Rtc(format!("unknown sdp type: {other}"))),
    }
    .map_err(|err| LiveKitError::Rtc(err.to_string()))
}

/// Pulls the first `a=mid:` line out of an SDP blob. Used to correlate a
/// just-applied answer with the publish that triggered it (§4.5 step 5);
/// a full SDP parser is the media stack's job (out of scope, §1), this is
/// just enough string-scanning to find the newest m-line.
fn extract_first_mid(sdp: &str) -> Option<String> {
    sdp.lines()
        .find_map(|line| line.strip_prefix("a=mid:").map(|mid| mid.trim().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_target_round_trips_through_wire_values() {
        assert_eq!(SignalTarget::from_wire(WireSignalTarget::Subscriber as i32), SignalTarget::Subscriber);
        assert_eq!(SignalTarget::Publisher.to_wire(), WireSignalTarget::Publisher);
    }

    #[test]
    fn unknown_signal_target_defaults_to_publisher() {
        assert_eq!(SignalTarget::from_wire(999), SignalTarget::Publisher);
    }

    #[test]
    fn extract_first_mid_finds_the_mid_line() {
        let sdp = "v=0\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\na=mid:0\r\n";
        assert_eq!(extract_first_mid(sdp), Some("0".to_string()));
    }

    #[test]
    fn extract_first_mid_is_none_without_a_mid_line() {
        assert_eq!(extract_first_mid("v=0\r\n"), None);
    }

    #[test]
    fn rtc_config_maps_force_relay_to_ice_transport_policy() {
        let config = RtcConfig {
            ice_servers: vec![],
            force_relay: true,
        };
        assert_eq!(
            config.to_webrtc_configuration().ice_transport_policy,
            RTCIceTransportPolicy::Relay
        );
    }
}
