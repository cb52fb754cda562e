//! Session Orchestrator (§4.4): composes the Signalling Client, Transport
//! Manager, Participant Registry, Data Packet Router, and Key Provider
//! into the application-facing `Room` API.

pub mod listener;
pub mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{oneshot, watch, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::track::track_local::TrackLocal;

use livekit_client_proto::{
    data_packet, signal_request, signal_response, AddTrackRequest, ChatMessage, DataPacket, DataPacketKind,
    DisconnectReason, JoinResponse, LeaveRequestAction, MuteTrackRequest, ReconnectResponse, RpcAck, RpcRequest,
    RpcResponse, SessionDescription as WireSessionDescription, SignalRequest, SignalResponse, SimulateScenario,
    SyncState, UpdateLocalAudioTrack, UpdateLocalVideoTrack, UpdateParticipantMetadata, UpdateSubscription,
    UpdateTrackSettings, UserPacket,
};

use crate::codec::TrickleCandidateInit;
use crate::config::RoomOptions;
use crate::crypto::KeyProvider;
use crate::error::{LiveKitError, WireCodecError};
use crate::ids::{ClientTrackId, ParticipantIdentity, TrackSid};
use crate::model::{ParticipantKind, RemoteParticipant, RoomInfo};
use crate::registry::{ParticipantDiff, ParticipantRegistry, RegistryListener};
use crate::router::stream_assembly::CompletedStream;
use crate::router::{DataPacketRouter, DataRouterListener, SpeakerUpdate};
use crate::signal::url::ConnectParams;
use crate::signal::{ConnectOutcome, SignalClient, SignalListener, SignallingState};
use crate::transport::reconnect::{ReconnectMode, ReconnectPolicy};
use crate::transport::{self, RtcConfig, SignalTarget, TransportListener, TransportManager};

pub use listener::RoomListener;
pub use state::{SessionState, SessionTransitionResult};

/// A session's pending publish, awaiting the server's
/// `TrackPublishedResponse` to correlate with the `cid` it was sent with
/// (§4.5 "Track publication (local)").
type PendingPublish = oneshot::Sender<crate::model::TrackInfo>;

/// A published local track's republish material, kept so a full
/// reconnect (§4.3) can re-`AddTrackRequest` it under a fresh
/// `ClientTrackId` without the application republishing by hand.
type RepublishEntry = (AddTrackRequest, Arc<dyn TrackLocal + Send + Sync>);

/// The RTP sender returned by the publisher when a local track was
/// added, kept so `unpublish_track` can remove the exact same track.
type PublishedSender = Arc<webrtc::rtp_transceiver::rtp_sender::RTCRtpSender>;

struct RoomInner {
    options: RoomOptions,
    signal: Arc<SignalClient>,
    transport: Arc<TransportManager>,
    registry: Arc<ParticipantRegistry>,
    router: Arc<DataPacketRouter>,
    key_provider: Arc<KeyProvider>,

    state_tx: watch::Sender<SessionState>,
    state_rx: watch::Receiver<SessionState>,
    room_info: RwLock<RoomInfo>,
    listener: RwLock<Option<Arc<dyn RoomListener>>>,

    join_result: parking_lot::Mutex<Option<oneshot::Sender<Result<RoomInfo, LiveKitError>>>>,
    pending_publishes: dashmap::DashMap<ClientTrackId, PendingPublish>,
    republish: dashmap::DashMap<TrackSid, RepublishEntry>,
    published_senders: dashmap::DashMap<TrackSid, PublishedSender>,
    last_pong_at: watch::Sender<Instant>,
    subscriber_primary: AtomicBool,
    /// Reconnect vs. full-reconnect decision made when the transport
    /// reports loss; consumed by the reconnection task.
    reconnect_notify: Arc<Notify>,
    reconnect_mode: parking_lot::Mutex<Option<ReconnectMode>>,
    reconnect_result: parking_lot::Mutex<Option<oneshot::Sender<bool>>>,
    host: RwLock<Option<String>>,
    auth_token: RwLock<Option<String>>,
}

/// The application-facing LiveKit room session. Composes the Signalling
/// Client, Transport Manager, Participant Registry, Data Packet Router
/// and Key Provider behind one connect/disconnect/publish/send API.
#[derive(Clone)]
pub struct Room {
    inner: Arc<RoomInner>,
}

impl Room {
    pub fn new(options: RoomOptions) -> Self {
        let signal = SignalClient::new(options.socket_connect_timeout);
        let transport = TransportManager::new(
            signal.clone(),
            options.negotiation_delay,
            options.max_negotiation_delay,
            options.data_channel_backpressure_threshold,
        );
        let registry = Arc::new(ParticipantRegistry::new(ParticipantIdentity::from(String::new())));
        let router = Arc::new(DataPacketRouter::new(
            transport.data_channels(),
            options.stream_chunk_buffer_window,
        ));
        let key_provider = Arc::new(KeyProvider::new(options.key_provider.clone().unwrap_or_default()));

        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let (pong_tx, _) = watch::channel(Instant::now());

        let inner = Arc::new(RoomInner {
            options,
            signal,
            transport,
            registry,
            router,
            key_provider,
            state_tx,
            state_rx,
            room_info: RwLock::new(RoomInfo::default()),
            listener: RwLock::new(None),
            join_result: parking_lot::Mutex::new(None),
            pending_publishes: dashmap::DashMap::new(),
            republish: dashmap::DashMap::new(),
            published_senders: dashmap::DashMap::new(),
            last_pong_at: pong_tx,
            subscriber_primary: AtomicBool::new(false),
            reconnect_notify: Arc::new(Notify::new()),
            reconnect_mode: parking_lot::Mutex::new(None),
            reconnect_result: parking_lot::Mutex::new(None),
            host: RwLock::new(None),
            auth_token: RwLock::new(None),
        });

        inner.signal.set_server_listener(Arc::new(SignalBridge { inner: Arc::downgrade(&inner) }));
        inner.transport.set_listener(Arc::new(TransportBridge { inner: Arc::downgrade(&inner) }));
        inner.registry.add_listener(Arc::new(RegistryBridge { inner: Arc::downgrade(&inner) }));
        inner.router.add_listener(Arc::new(RouterBridge { inner: Arc::downgrade(&inner) }));

        RoomInner::spawn_reconnect_driver(&inner);

        Self { inner }
    }

    pub fn set_listener(&self, listener: Arc<dyn RoomListener>) {
        *self.inner.listener.write() = Some(listener);
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_rx.clone()
    }

    pub fn registry(&self) -> Arc<ParticipantRegistry> {
        self.inner.registry.clone()
    }

    pub fn router(&self) -> Arc<DataPacketRouter> {
        self.inner.router.clone()
    }

    pub fn key_provider(&self) -> Arc<KeyProvider> {
        self.inner.key_provider.clone()
    }

    pub fn room_info(&self) -> RoomInfo {
        self.inner.room_info.read().clone()
    }

    /// Join protocol (§4.4). Opens the signalling WebSocket, waits for the
    /// server's `JoinResponse`, builds both peer connections, and starts
    /// keep-alive. Resolves once the session is Connected, or with
    /// `LiveKitError` if the join does not complete within
    /// `primary_transport_connect_timeout`.
    pub async fn connect(&self, host: &str, auth_token: &str) -> Result<RoomInfo, LiveKitError> {
        if self.inner.apply_transition(SessionState::Connecting) != SessionTransitionResult::Changed {
            return Err(LiveKitError::Transport("connect() called from an unreachable session state".into()));
        }

        *self.inner.host.write() = Some(host.to_string());
        *self.inner.auth_token.write() = Some(auth_token.to_string());

        let (tx, rx) = oneshot::channel();
        *self.inner.join_result.lock() = Some(tx);

        let params = ConnectParams {
            auth_token,
            auto_subscribe: self.inner.options.auto_subscribe,
            adaptive_stream: self.inner.options.adaptive_stream,
            reconnect: false,
            resuming_participant_sid: None,
        };

        match self.inner.signal.connect(host, &params).await? {
            ConnectOutcome::Rejected => {
                return Err(LiveKitError::Transport("signalling client rejected connect".into()));
            }
            ConnectOutcome::Connected => {}
        }

        let timeout = self.inner.options.primary_transport_connect_timeout;
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(LiveKitError::Transport("join handshake dropped".into())),
            Err(_) => {
                self.inner.apply_transition(SessionState::Disconnected);
                Err(LiveKitError::Transport("timed out waiting for JoinResponse".into()))
            }
        }
    }

    /// Application `disconnect()` (§4.4): sends `LeaveRequest`, transitions
    /// to a terminal state, then tears down both peer connections and the
    /// WebSocket.
    pub async fn disconnect(&self) {
        if self.inner.apply_transition(SessionState::Disconnected) == SessionTransitionResult::Rejected {
            return;
        }

        self.inner.signal.send(SignalRequest::new(signal_request::Message::Leave(
            livekit_client_proto::LeaveRequest {
                can_reconnect: false,
                reason: DisconnectReason::ClientInitiated as i32,
                action: LeaveRequestAction::Disconnect as i32,
            },
        )));
        self.inner.transport.close().await;
        self.inner.signal.disconnect().await;

        if let Some(listener) = self.inner.listener.read().clone() {
            listener.on_disconnected(None).await;
        }
    }

    /// Publishes a local track (§4.5 "Track publication (local)"). Sends
    /// `AddTrackRequest`, awaits the matching `TrackPublishedResponse`,
    /// attaches `track` to the publisher, and triggers negotiation.
    pub async fn publish_track(
        &self,
        request: AddTrackRequest,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Result<TrackSid, LiveKitError> {
        self.inner.publish_track(request, track).await
    }

    /// Mutes or unmutes one of the local participant's published tracks
    /// (`SignalRequest::mute`).
    pub fn set_track_muted(&self, track_sid: &TrackSid, muted: bool) -> bool {
        self.inner.signal.send(SignalRequest::new(signal_request::Message::Mute(MuteTrackRequest {
            sid: track_sid.to_string(),
            muted,
        })))
    }

    /// Subscribes to or unsubscribes from remote tracks
    /// (`SignalRequest::subscription`).
    pub fn update_subscription(&self, subscription: UpdateSubscription) -> bool {
        self.inner
            .signal
            .send(SignalRequest::new(signal_request::Message::Subscription(subscription)))
    }

    /// Adjusts simulcast/quality settings for subscribed tracks
    /// (`SignalRequest::track_setting`).
    pub fn update_track_settings(&self, settings: UpdateTrackSettings) -> bool {
        self.inner
            .signal
            .send(SignalRequest::new(signal_request::Message::TrackSetting(settings)))
    }

    /// Requests a change in published simulcast layers
    /// (`SignalRequest::update_layers`).
    pub fn update_video_layers(&self, update: UpdateSubscription) -> bool {
        self.inner
            .signal
            .send(SignalRequest::new(signal_request::Message::UpdateLayers(update)))
    }

    /// Grants or revokes subscription permissions
    /// (`SignalRequest::subscription_permission`).
    pub fn set_subscription_permissions(&self, permissions: UpdateSubscription) -> bool {
        self.inner
            .signal
            .send(SignalRequest::new(signal_request::Message::SubscriptionPermission(permissions)))
    }

    /// Requests a scripted failure scenario from the server, for
    /// integration testing (`SignalRequest::simulate`).
    pub fn simulate_scenario(&self, scenario: SimulateScenario) -> bool {
        self.inner
            .signal
            .send(SignalRequest::new(signal_request::Message::Simulate(scenario)))
    }

    /// Updates the local participant's metadata and attributes
    /// (`SignalRequest::update_metadata`).
    pub fn update_metadata(&self, metadata: String, attributes: std::collections::HashMap<String, String>) -> bool {
        self.inner.signal.send(SignalRequest::new(signal_request::Message::UpdateMetadata(
            UpdateParticipantMetadata { metadata, attributes, request_id: 0 },
        )))
    }

    /// Updates a published local audio track's enabled features
    /// (`SignalRequest::update_audio_track`).
    pub fn update_local_audio_track(&self, track_sid: &TrackSid, features: Vec<i32>) -> bool {
        self.inner.signal.send(SignalRequest::new(signal_request::Message::UpdateAudioTrack(
            UpdateLocalAudioTrack { track_sid: track_sid.to_string(), features },
        )))
    }

    /// Updates a published local video track's dimensions
    /// (`SignalRequest::update_video_track`).
    pub fn update_local_video_track(&self, track_sid: &TrackSid, width: u32, height: u32) -> bool {
        self.inner.signal.send(SignalRequest::new(signal_request::Message::UpdateVideoTrack(
            UpdateLocalVideoTrack { track_sid: track_sid.to_string(), width, height },
        )))
    }

    /// Removes a previously published local track from the publisher and
    /// drops its republish bookkeeping. There is no dedicated
    /// `UnpublishTrack` wire request in this protocol version — the
    /// server infers the unpublish from the track's m-line disappearing
    /// on the next publisher renegotiation, mirroring how `add_track`
    /// has no matching "ack my add" wire round trip either.
    pub async fn unpublish_track(&self, track_sid: &TrackSid) -> Result<(), LiveKitError> {
        self.inner.republish.remove(track_sid);
        let Some((_, sender)) = self.inner.published_senders.remove(track_sid) else {
            return Err(LiveKitError::Rtc("no published sender for this track sid".into()));
        };
        self.inner.transport.remove_track(sender).await
    }

    /// Sends one outbound data packet on the channel matching its `kind`
    /// (§4.6 "Outbound").
    pub fn send_data(&self, packet: DataPacket) -> bool {
        self.inner.router.send(packet)
    }

    /// Convenience wrapper over `send_data` for an application payload
    /// (`DataPacket::user`).
    pub fn send_user_packet(
        &self,
        payload: Vec<u8>,
        reliable: bool,
        topic: Option<String>,
        destination_identities: Vec<String>,
    ) -> bool {
        let packet = DataPacket {
            kind: reliable_kind(reliable),
            destination_identities,
            value: Some(data_packet::Value::User(UserPacket {
                payload: payload.into(),
                topic: topic.unwrap_or_default(),
                ..Default::default()
            })),
            ..Default::default()
        };
        self.inner.router.send(packet)
    }

    /// Convenience wrapper over `send_data` for a chat message
    /// (`DataPacket::chat_message`). Chat is always sent reliably.
    pub fn send_chat_message(&self, message: String, destination_identities: Vec<String>) -> bool {
        let chat = ChatMessage {
            id: crate::ids::ClientTrackId::generate().to_string(),
            timestamp: now_millis(),
            message,
            ..Default::default()
        };
        let packet = DataPacket {
            kind: DataPacketKind::Reliable as i32,
            destination_identities,
            value: Some(data_packet::Value::ChatMessage(chat)),
            ..Default::default()
        };
        self.inner.router.send(packet)
    }

    /// Sends an RPC invocation to `destination_identity`
    /// (`DataPacket::rpc_request`). RPC is always sent reliably.
    pub fn send_rpc_request(&self, request: RpcRequest, destination_identity: String) -> bool {
        self.send_rpc(data_packet::Value::RpcRequest(request), destination_identity)
    }

    /// Acknowledges receipt of an RPC invocation (`DataPacket::rpc_ack`).
    pub fn send_rpc_ack(&self, ack: RpcAck, destination_identity: String) -> bool {
        self.send_rpc(data_packet::Value::RpcAck(ack), destination_identity)
    }

    /// Returns the result of an RPC invocation (`DataPacket::rpc_response`).
    pub fn send_rpc_response(&self, response: RpcResponse, destination_identity: String) -> bool {
        self.send_rpc(data_packet::Value::RpcResponse(response), destination_identity)
    }

    /// Reports a frame decrypt failure from the (external) frame cryptor.
    /// Tracks the failure against the key provider's `failure_tolerance`
    /// and, once crossed, notifies the application via
    /// `RoomListener::on_track_crypto_error` (§4.7).
    pub async fn report_crypto_failure(&self, identity: &ParticipantIdentity, track_sid: TrackSid, reason: String) {
        if self.inner.key_provider.record_failure(identity) {
            if let Some(listener) = self.inner.listener.read().clone() {
                listener.on_track_crypto_error(track_sid, reason).await;
            }
        }
    }

    fn send_rpc(&self, value: data_packet::Value, destination_identity: String) -> bool {
        let packet = DataPacket {
            kind: DataPacketKind::Reliable as i32,
            destination_identities: vec![destination_identity],
            value: Some(value),
            ..Default::default()
        };
        self.inner.router.send(packet)
    }
}

fn reliable_kind(reliable: bool) -> i32 {
    if reliable {
        DataPacketKind::Reliable as i32
    } else {
        DataPacketKind::Lossy as i32
    }
}

/// `ChatMessage`/`UserPacket` need a millisecond timestamp and this core
/// otherwise never touches wall-clock time directly.
fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl RoomInner {
    fn apply_transition(&self, to: SessionState) -> SessionTransitionResult {
        let from = *self.state_tx.borrow();
        let result = from.check_transition(to);
        if result == SessionTransitionResult::Changed {
            let _ = self.state_tx.send(to);
        }
        result
    }

    async fn publish_track(
        self: &Arc<Self>,
        mut request: AddTrackRequest,
        track: Arc<dyn TrackLocal + Send + Sync>,
    ) -> Result<TrackSid, LiveKitError> {
        let cid = ClientTrackId::generate();
        request.cid = cid.to_string();

        let (tx, rx) = oneshot::channel();
        self.pending_publishes.insert(cid.clone(), tx);
        self.registry.with_local_mut(|local| {
            crate::registry::local::begin_publish(local, cid.clone(), &request);
        });

        self.signal
            .send(SignalRequest::new(signal_request::Message::AddTrack(request.clone())));

        let track_info = tokio::time::timeout(self.options.publisher_transport_connect_timeout, rx)
            .await
            .map_err(|_| LiveKitError::Rtc("timed out waiting for TrackPublishedResponse".into()))?
            .map_err(|_| LiveKitError::Rtc("publish response channel dropped".into()))?;

        let sender = self.transport.add_track(track.clone()).await?;
        self.published_senders.insert(track_info.sid.clone(), sender);
        self.republish.insert(track_info.sid.clone(), (request, track));
        Ok(track_info.sid)
    }

    /// Spawns the long-lived task that drives reconnection (§4.3):
    /// awaits `reconnect_notify`, runs the bounded retry policy over one
    /// attempt per `ReconnectMode`, and resolves to Connected or a
    /// terminal Disconnected.
    fn spawn_reconnect_driver(inner: &Arc<Self>) {
        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            loop {
                inner.reconnect_notify.notified().await;
                inner.run_reconnect_cycle().await;
            }
        });
    }

    async fn run_reconnect_cycle(self: &Arc<Self>) {
        let mode = self.reconnect_mode.lock().take().unwrap_or(ReconnectMode::Reconnect);
        let policy = ReconnectPolicy::new(self.options.reconnect_attempts, self.options.reconnect_attempt_delay);

        let this = Arc::clone(self);
        let outcome = policy
            .retry(move |attempt| {
                let this = Arc::clone(&this);
                async move { this.try_reconnect_once(mode, attempt).await }
            })
            .await;

        match outcome {
            Ok(()) => {
                self.apply_transition(SessionState::Connected);
                if let Some(listener) = self.listener.read().clone() {
                    listener.on_reconnected().await;
                }
            }
            Err(()) => {
                self.apply_transition(SessionState::Disconnected);
                self.transport.close().await;
                self.signal.disconnect().await;
                if let Some(listener) = self.listener.read().clone() {
                    listener
                        .on_disconnected(Some(LiveKitError::Transport("reconnect attempts exhausted".into())))
                        .await;
                }
            }
        }
    }

    async fn try_reconnect_once(self: &Arc<Self>, mode: ReconnectMode, attempt: u32) -> bool {
        debug!(?mode, attempt, "attempting reconnection");

        let Some(host) = self.host.read().clone() else { return false };
        let Some(token) = self.auth_token.read().clone() else { return false };

        if self.signal.state() != SignallingState::Disconnected {
            self.signal.disconnect().await;
        }

        let resuming_sid = self.registry.with_local(|local| local.sid.to_string());
        let params = ConnectParams {
            auth_token: &token,
            auto_subscribe: self.options.auto_subscribe,
            adaptive_stream: self.options.adaptive_stream,
            reconnect: true,
            resuming_participant_sid: (!resuming_sid.is_empty()).then_some(resuming_sid.as_str()),
        };

        let connected = matches!(self.signal.connect(&host, &params).await, Ok(ConnectOutcome::Connected));
        if !connected {
            return false;
        }

        match mode {
            ReconnectMode::Resume => {
                self.send_sync_state();
                true
            }
            ReconnectMode::Reconnect => {
                self.transport.close().await;

                let (tx, rx) = oneshot::channel();
                *self.reconnect_result.lock() = Some(tx);

                match tokio::time::timeout(self.options.primary_transport_connect_timeout, rx).await {
                    Ok(Ok(result)) => result,
                    _ => false,
                }
            }
        }
    }

    /// §4.3 Resume: sends `SyncState` describing currently-held publish
    /// and data-channel state so the server can reconcile without a full
    /// renegotiation.
    fn send_sync_state(&self) {
        let publish_tracks = self.republish.iter().map(|e| e.key().to_string()).collect();
        self.signal.send(SignalRequest::new(signal_request::Message::SyncState(SyncState {
            answer: None,
            subscription: Some(UpdateSubscription::default()),
            publish_tracks,
            data_channels: vec!["_reliable".to_string(), "_lossy".to_string()],
            offer: None,
        })));
    }

    /// §4.3 Reconnect: rebuilds both peer connections from the fresh
    /// `ReconnectResponse` ICE servers and re-publishes every track that
    /// survived the prior session under a new `ClientTrackId`.
    async fn handle_reconnect_response(self: &Arc<Self>, resp: ReconnectResponse) {
        let rtc_config = RtcConfig {
            ice_servers: resp.ice_servers,
            force_relay: resp
                .client_configuration
                .as_ref()
                .map(|c| c.force_relay == livekit_client_proto::ClientConfigSetting::Enabled as i32)
                .unwrap_or(false),
        };

        let subscriber_primary = self.subscriber_primary.load(Ordering::SeqCst);
        if let Err(err) = self
            .transport
            .build_peer_connections(&rtc_config, subscriber_primary, false, true)
            .await
        {
            warn!(error = %err, "failed to rebuild peer connections after full reconnect");
            if let Some(tx) = self.reconnect_result.lock().take() {
                let _ = tx.send(false);
            }
            return;
        }

        let to_republish: Vec<RepublishEntry> = self.republish.iter().map(|e| e.value().clone()).collect();
        self.republish.clear();
        self.published_senders.clear();
        for (request, track) in to_republish {
            if let Err(err) = self.publish_track(request, track).await {
                warn!(error = %err, "failed to re-publish a track after full reconnect");
            }
        }

        if let Some(tx) = self.reconnect_result.lock().take() {
            let _ = tx.send(true);
        }
    }

    /// Called when a primary peer connection's state signals connectivity
    /// loss while the session is Connected; decides Resume vs. full
    /// Reconnect per the §4.3 trigger table.
    async fn handle_transport_state_change(self: &Arc<Self>, is_publisher: bool, state: RTCPeerConnectionState) {
        if *self.state_rx.borrow() != SessionState::Connected {
            return;
        }

        let is_primary = if self.subscriber_primary.load(Ordering::SeqCst) { !is_publisher } else { is_publisher };
        if !is_primary {
            return;
        }

        match state {
            RTCPeerConnectionState::Failed => self.trigger_reconnect(ReconnectMode::Reconnect).await,
            RTCPeerConnectionState::Disconnected => self.trigger_reconnect(ReconnectMode::Resume).await,
            _ => {}
        }
    }

    async fn trigger_reconnect(self: &Arc<Self>, mode: ReconnectMode) {
        if self.apply_transition(SessionState::Reconnecting) != SessionTransitionResult::Changed {
            return;
        }
        *self.reconnect_mode.lock() = Some(mode);
        if let Some(listener) = self.listener.read().clone() {
            listener.on_reconnecting().await;
        }
        self.reconnect_notify.notify_one();
    }

    async fn handle_join(self: &Arc<Self>, join: JoinResponse) {
        if *self.state_rx.borrow() != SessionState::Connecting {
            warn!("received JoinResponse outside of Connecting; treating as a protocol violation");
            return;
        }

        let room_info = join.room.clone().map(RoomInfo::from).unwrap_or_default();
        *self.room_info.write() = room_info.clone();

        let local_info = join.participant.clone().unwrap_or_default();
        self.registry.with_local_mut(|local| {
            local.identity = local_info.identity.clone().into();
            local.sid = local_info.sid.clone().into();
            local.name = local_info.name.clone();
            local.metadata = local_info.metadata.clone();
            local.attributes = local_info.attributes.clone();
            local.kind = ParticipantKind::from(local_info.kind);
        });
        self.router.set_local_identity(local_info.identity.clone());

        // §4.4 step 5: materialize every other participant before any
        // offer arrives.
        self.registry.seed_other_participants(join.other_participants.clone());

        if join.sif_trailer_present {
            self.key_provider.set_sif_trailer(join.sif_trailer.to_vec());
        }

        let subscriber_primary = join.subscriber_primary;
        self.subscriber_primary.store(subscriber_primary, Ordering::SeqCst);

        let rtc_config = RtcConfig {
            ice_servers: join.ice_servers.clone(),
            force_relay: join
                .client_configuration
                .as_ref()
                .map(|c| c.force_relay == livekit_client_proto::ClientConfigSetting::Enabled as i32)
                .unwrap_or(false),
        };

        let will_publish = true; // the core always installs publisher data channels (§3 "Data channels")
        if let Err(err) = self
            .transport
            .build_peer_connections(&rtc_config, subscriber_primary, join.fast_publish, will_publish)
            .await
        {
            self.fail_join(LiveKitError::Rtc(err.to_string()));
            return;
        }

        if join.ping_interval > 0 && join.ping_timeout > 0 {
            let signal = self.signal.clone();
            let pong_rx = self.last_pong_at.subscribe();
            tokio::spawn(crate::signal::client::run_keepalive(
                signal,
                std::time::Duration::from_secs(join.ping_interval as u64),
                std::time::Duration::from_secs(join.ping_timeout as u64),
                pong_rx,
            ));
        }

        self.apply_transition(SessionState::Connected);

        if let Some(tx) = self.join_result.lock().take() {
            let _ = tx.send(Ok(room_info.clone()));
        }
        if let Some(listener) = self.listener.read().clone() {
            listener.on_connected(room_info).await;
        }
    }

    fn fail_join(&self, error: LiveKitError) {
        self.apply_transition(SessionState::Disconnected);
        if let Some(tx) = self.join_result.lock().take() {
            let _ = tx.send(Err(error));
        }
    }

    async fn handle_signal_response(self: &Arc<Self>, response: SignalResponse) {
        let Some(message) = response.message else { return };
        use signal_response::Message as M;

        match message {
            M::Join(join) => self.handle_join(join).await,
            M::Offer(sdp) => self.handle_offer(sdp).await,
            M::Answer(sdp) => self.handle_answer(sdp).await,
            M::Trickle(trickle) => self.handle_trickle(trickle).await,
            M::Update(update) => self.registry.apply_update(update).await,
            M::TrackPublished(resp) => self.handle_track_published(resp),
            M::TrackUnpublished(resp) => {
                self.registry.remove_track(&resp.track_sid.into());
            }
            M::Mute(mute) => {
                self.registry.set_track_muted(&mute.sid.into(), mute.muted);
            }
            M::Leave(leave) => self.handle_leave(leave).await,
            M::SpeakersChanged(update) => {
                if let Some(listener) = self.listener.read().clone() {
                    let speakers = update
                        .speakers
                        .into_iter()
                        .map(|s| SpeakerUpdate { sid: s.sid, level: s.level, active: s.active })
                        .collect();
                    listener.on_active_speakers_changed(speakers).await;
                }
            }
            M::RoomUpdate(update) => {
                if let Some(room) = update.room {
                    *self.room_info.write() = RoomInfo::from(room);
                }
            }
            M::ConnectionQuality(update) => {
                for entry in update.updates {
                    self.registry.update_connection_quality(
                        &entry.participant_sid.into(),
                        crate::model::ConnectionQuality::from(entry.quality),
                        entry.score,
                    );
                }
            }
            M::Reconnect(reconnect) => self.handle_reconnect_response(reconnect).await,
            M::Pong(timestamp) => {
                debug!(timestamp, "deprecated scalar pong received");
                let _ = self.last_pong_at.send(Instant::now());
            }
            M::PongResp(_pong) => {
                let _ = self.last_pong_at.send(Instant::now());
            }
            M::StreamStateUpdate(_)
            | M::SubscribedQualityUpdate(_)
            | M::SubscriptionPermissionUpdate(_)
            | M::RefreshToken(_)
            | M::SubscriptionResponse(_) => {
                debug!("received a signal response this core does not act on beyond logging");
            }
        }
    }

    async fn handle_offer(self: &Arc<Self>, sdp: WireSessionDescription) {
        if let Err(err) = self.transport.set_remote_offer(sdp).await {
            warn!(error = %err, "failed to apply server offer");
        }
    }

    async fn handle_answer(self: &Arc<Self>, sdp: WireSessionDescription) {
        if let Err(err) = self.transport.set_remote_answer(sdp).await {
            warn!(error = %err, "failed to apply server answer");
        }
    }

    async fn handle_trickle(self: &Arc<Self>, trickle: livekit_client_proto::TrickleRequest) {
        let init = match TrickleCandidateInit::from_json(&trickle.candidate_init) {
            Ok(init) => init,
            Err(err) => {
                warn!(error = %err, "dropping malformed trickle candidate");
                return;
            }
        };
        let target = SignalTarget::from_wire(trickle.target);
        let candidate = transport::trickle_to_ice_candidate_init(&init);
        if let Err(err) = self.transport.add_ice_candidate(target, candidate).await {
            warn!(error = %err, "failed to apply remote ice candidate");
        }
    }

    fn handle_track_published(&self, resp: livekit_client_proto::TrackPublishedResponse) {
        let cid = ClientTrackId::from(resp.cid.clone());
        let sid = resp.track.as_ref().map(|t| TrackSid::from(t.sid.clone()));

        let applied = self
            .registry
            .with_local_mut(|local| crate::registry::local::apply_track_published(local, resp));
        if !applied {
            warn!("TrackPublishedResponse cid did not match any pending publish");
            return;
        }

        let Some(sid) = sid else { return };
        if let Some((_, tx)) = self.pending_publishes.remove(&cid) {
            let track = self
                .registry
                .with_local(|local| local.published_tracks.get(&sid).cloned());
            if let Some(track) = track {
                let _ = tx.send(track);
            }
        }
    }

    async fn handle_leave(self: &Arc<Self>, leave: livekit_client_proto::LeaveRequest) {
        let action = LeaveRequestAction::try_from(leave.action).unwrap_or(LeaveRequestAction::Disconnect);
        let reason = DisconnectReason::try_from(leave.reason).unwrap_or(DisconnectReason::UnknownReason);
        let error = LiveKitError::from_disconnect_reason(reason);

        match action {
            LeaveRequestAction::Resume => self.trigger_reconnect(ReconnectMode::Resume).await,
            LeaveRequestAction::Reconnect => self.trigger_reconnect(ReconnectMode::Reconnect).await,
            LeaveRequestAction::Disconnect => {
                self.apply_transition(SessionState::Disconnected);
                self.transport.close().await;
                if let Some(listener) = self.listener.read().clone() {
                    listener.on_disconnected(error).await;
                }
            }
        }
    }
}

/// Bridges `SignalListener` callbacks back into the orchestrator without
/// the `SignalClient` holding a strong reference to `RoomInner` (which
/// itself holds the `SignalClient`).
struct SignalBridge {
    inner: std::sync::Weak<RoomInner>,
}

#[async_trait::async_trait]
impl SignalListener for SignalBridge {
    async fn on_signal_response(&self, response: SignalResponse) {
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_signal_response(response).await;
        }
    }

    async fn on_transport_state(&self, state: SignallingState) {
        debug!(?state, "signalling transport state changed");
    }

    async fn on_response_parse_error(&self, error: WireCodecError) {
        if let Some(inner) = self.inner.upgrade() {
            if let Some(listener) = inner.listener.read().clone() {
                listener.on_error(LiveKitError::Transport(error.to_string())).await;
            }
        }
    }

    async fn on_error(&self, error: LiveKitError) {
        if let Some(inner) = self.inner.upgrade() {
            inner.fail_join(error.clone());
            if let Some(listener) = inner.listener.read().clone() {
                listener.on_error(error).await;
            }
        }
    }
}

struct TransportBridge {
    inner: std::sync::Weak<RoomInner>,
}

#[async_trait::async_trait]
impl TransportListener for TransportBridge {
    async fn on_publisher_state(&self, state: RTCPeerConnectionState) {
        debug!(?state, "publisher peer connection state changed");
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_transport_state_change(true, state).await;
        }
    }

    async fn on_subscriber_state(&self, state: RTCPeerConnectionState) {
        debug!(?state, "subscriber peer connection state changed");
        if let Some(inner) = self.inner.upgrade() {
            inner.handle_transport_state_change(false, state).await;
        }
    }

    async fn on_publisher_negotiated(&self, mid: String) {
        let Some(inner) = self.inner.upgrade() else { return };
        inner.registry.with_local_mut(|local| {
            for track in local.published_tracks.values_mut() {
                if track.mid == mid {
                    track.live = true;
                }
            }
        });
    }
}

struct RegistryBridge {
    inner: std::sync::Weak<RoomInner>,
}

#[async_trait::async_trait]
impl RegistryListener for RegistryBridge {
    async fn on_participant_connected(&self, participant: RemoteParticipant) {
        if let Some(inner) = self.inner.upgrade() {
            if let Some(listener) = inner.listener.read().clone() {
                listener.on_participant_connected(participant).await;
            }
        }
    }

    async fn on_participant_disconnected(&self, sid: crate::ids::ParticipantSid) {
        if let Some(inner) = self.inner.upgrade() {
            if let Some(listener) = inner.listener.read().clone() {
                listener.on_participant_disconnected(sid).await;
            }
        }
    }

    async fn on_participant_updated(&self, participant: RemoteParticipant, diff: ParticipantDiff) {
        if let Some(inner) = self.inner.upgrade() {
            if let Some(listener) = inner.listener.read().clone() {
                listener.on_participant_updated(participant, diff).await;
            }
        }
    }
}

struct RouterBridge {
    inner: std::sync::Weak<RoomInner>,
}

#[async_trait::async_trait]
impl DataRouterListener for RouterBridge {
    async fn on_user_packet(
        &self,
        source_identity: String,
        payload: Vec<u8>,
        topic: Option<String>,
        _destination_identities: Vec<String>,
        _id: Option<String>,
    ) {
        if let Some(inner) = self.inner.upgrade() {
            if let Some(listener) = inner.listener.read().clone() {
                listener.on_data_received(source_identity, payload, topic).await;
            }
        }
    }

    async fn on_active_speakers_update(&self, speakers: Vec<SpeakerUpdate>) {
        if let Some(inner) = self.inner.upgrade() {
            if let Some(listener) = inner.listener.read().clone() {
                listener.on_active_speakers_changed(speakers).await;
            }
        }
    }

    async fn on_transcription(&self, _participant_identity: String, _track_id: String, _id: String) {}

    async fn on_chat_message(&self, _sender_identity: String, _message: livekit_client_proto::ChatMessage) {}

    async fn on_stream_started(&self, _stream_id: String) {}

    async fn on_rpc_request(&self, _caller_identity: String, _request: livekit_client_proto::RpcRequest) {}

    async fn on_rpc_ack(&self, _ack: livekit_client_proto::RpcAck) {}

    async fn on_rpc_response(&self, _response: livekit_client_proto::RpcResponse) {}

    async fn on_stream_completed(&self, stream: CompletedStream) {
        if let Some(inner) = self.inner.upgrade() {
            if let Some(listener) = inner.listener.read().clone() {
                listener.on_data_stream_received(stream).await;
            }
        }
    }

    async fn on_stream_error(&self, error: crate::error::StreamAssemblyError) {
        warn!(error = %error, "data stream assembly error");
    }

    async fn on_metrics(&self, _batch: livekit_client_proto::MetricsBatch) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn reliable_kind_maps_bool_to_wire_enum() {
        assert_eq!(reliable_kind(true), DataPacketKind::Reliable as i32);
        assert_eq!(reliable_kind(false), DataPacketKind::Lossy as i32);
    }

    #[test]
    fn now_millis_is_nonzero_and_monotonic_enough() {
        let a = now_millis();
        let b = now_millis();
        assert!(a > 0);
        assert!(b >= a);
    }

    #[tokio::test]
    async fn send_user_packet_before_connecting_is_refused() {
        let room = Room::new(RoomOptions::default());
        // No local identity has been set on the router yet (that only
        // happens once the join handshake completes), so every send
        // must fail closed rather than emit a packet with a blank
        // `participant_identity`.
        assert!(!room.send_user_packet(b"hi".to_vec(), true, None, vec![]));
        assert!(!room.send_chat_message("hello".into(), vec![]));
    }

    #[tokio::test]
    async fn unpublish_track_without_a_prior_publish_errors() {
        let room = Room::new(RoomOptions::default());
        let sid = TrackSid::from("TR_doesnotexist".to_string());
        let err = room.unpublish_track(&sid).await.unwrap_err();
        assert!(matches!(err, LiveKitError::Rtc(_)));
    }

    struct RecordingListener {
        crypto_errors: StdMutex<Vec<(TrackSid, String)>>,
    }

    #[async_trait::async_trait]
    impl RoomListener for RecordingListener {
        async fn on_connected(&self, _room: RoomInfo) {}
        async fn on_reconnecting(&self) {}
        async fn on_reconnected(&self) {}
        async fn on_disconnected(&self, _reason: Option<LiveKitError>) {}
        async fn on_error(&self, _error: LiveKitError) {}
        async fn on_participant_connected(&self, _participant: RemoteParticipant) {}
        async fn on_participant_disconnected(&self, _sid: crate::ids::ParticipantSid) {}
        async fn on_participant_updated(&self, _participant: RemoteParticipant, _diff: ParticipantDiff) {}
        async fn on_data_received(&self, _source_identity: String, _payload: Vec<u8>, _topic: Option<String>) {}
        async fn on_active_speakers_changed(&self, _speakers: Vec<SpeakerUpdate>) {}
        async fn on_data_stream_received(&self, _stream: CompletedStream) {}
        async fn on_track_crypto_error(&self, track_sid: TrackSid, reason: String) {
            self.crypto_errors.lock().unwrap().push((track_sid, reason));
        }
    }

    #[tokio::test]
    async fn report_crypto_failure_notifies_listener_once_tolerance_crosses() {
        let room = Room::new(RoomOptions::default());
        let listener = Arc::new(RecordingListener {
            crypto_errors: StdMutex::new(Vec::new()),
        });
        room.set_listener(listener.clone());

        let identity = ParticipantIdentity::from("bob".to_string());
        let track_sid = TrackSid::from("TR_abc".to_string());
        let tolerance = room.inner.options.key_provider.clone().unwrap_or_default().failure_tolerance;

        for _ in 0..tolerance - 1 {
            room.report_crypto_failure(&identity, track_sid.clone(), "decrypt failed".into()).await;
        }
        assert!(listener.crypto_errors.lock().unwrap().is_empty());

        room.report_crypto_failure(&identity, track_sid.clone(), "decrypt failed".into()).await;
        let errors = listener.crypto_errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, track_sid);
    }
}
