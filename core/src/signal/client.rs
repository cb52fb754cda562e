//! Signalling Client (§4.2): owns the WebSocket endpoint, the transport
//! state machine, and keep-alive.
//!
//! Reads, writes, and state-machine mutations are all serialized onto one
//! task (the "signalling executor" of §5) so the rest of the core never
//! has to reason about concurrent WebSocket access; public methods here
//! just post onto that task's channels.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use livekit_client_proto::{signal_request, signal_response, Ping, SignalRequest, SignalResponse};

use crate::codec;
use crate::error::LiveKitError;
use crate::signal::listener::SignalListener;
use crate::signal::state::{SignallingState, TransitionResult};
use crate::signal::url::{build_signalling_url, ConnectParams};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Result of a `connect()`/`disconnect()` call: mirrors the state machine's
/// own `TransitionResult` so application misuse (calling connect twice) is
/// distinguishable from a real transport failure.
#[derive(Debug)]
pub enum ConnectOutcome {
    Connected,
    Rejected,
}

pub struct SignalClient {
    client_id: u64,
    state_tx: watch::Sender<SignallingState>,
    state_rx: watch::Receiver<SignallingState>,
    outbound_tx: RwLock<Option<mpsc::UnboundedSender<SignalRequest>>>,
    listener: RwLock<Option<Arc<dyn SignalListener>>>,
    last_ping_sent_at: AtomicI64,
    socket_connect_timeout: Duration,
}

impl SignalClient {
    pub fn new(socket_connect_timeout: Duration) -> Arc<Self> {
        let (state_tx, state_rx) = watch::channel(SignallingState::Disconnected);
        Arc::new(Self {
            client_id: rand::thread_rng().gen(),
            state_tx,
            state_rx,
            outbound_tx: RwLock::new(None),
            listener: RwLock::new(None),
            last_ping_sent_at: AtomicI64::new(0),
            socket_connect_timeout,
        })
    }

    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    pub fn state(&self) -> SignallingState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SignallingState> {
        self.state_rx.clone()
    }

    pub fn set_server_listener(&self, listener: Arc<dyn SignalListener>) {
        *self.listener.write() = Some(listener);
    }

    /// Opens a WebSocket connection. Transitions
    /// Disconnected→Connecting→Connected on a successful upgrade. Returns
    /// `Rejected` synchronously (no error, no listener notification) if
    /// the state machine is not in `Disconnected`.
    pub async fn connect(
        self: &Arc<Self>,
        host: &str,
        params: &ConnectParams<'_>,
    ) -> Result<ConnectOutcome, LiveKitError> {
        if self.apply_transition(SignallingState::Connecting) != TransitionResult::Changed {
            return Ok(ConnectOutcome::Rejected);
        }

        let url = build_signalling_url(host, params)
            .map_err(|err| LiveKitError::Transport(format!("invalid signalling url: {err}")))?;

        let connect_fut = tokio_tungstenite::connect_async(url.as_str());
        let (ws_stream, _response) = tokio::time::timeout(self.socket_connect_timeout, connect_fut)
            .await
            .map_err(|_| LiveKitError::Transport("socket connect timed out".into()))?
            .map_err(|err| LiveKitError::Transport(err.to_string()))?;

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        *self.outbound_tx.write() = Some(outbound_tx);

        self.apply_transition(SignallingState::Connected);

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_connection(ws_stream, outbound_rx).await;
        });

        Ok(ConnectOutcome::Connected)
    }

    /// Connected/Connecting → Disconnecting → Disconnected.
    pub async fn disconnect(&self) {
        if self.apply_transition(SignallingState::Disconnecting) != TransitionResult::Changed {
            return;
        }
        self.outbound_tx.write().take();
        self.apply_transition(SignallingState::Disconnected);
    }

    /// Serializes and sends one request. Returns false if the underlying
    /// transport is not writable (not connected, or the peer already
    /// closed the outbound sender).
    pub fn send(&self, request: SignalRequest) -> bool {
        match self.outbound_tx.read().as_ref() {
            Some(tx) => tx.send(request).is_ok(),
            None => false,
        }
    }

    pub fn send_ping(&self) -> bool {
        let now = now_millis();
        self.last_ping_sent_at.store(now, Ordering::SeqCst);
        self.send(SignalRequest::new(signal_request::Message::PingReq(Ping {
            timestamp: now,
            rtt: 0,
        })))
    }

    fn apply_transition(&self, to: SignallingState) -> TransitionResult {
        let from = *self.state_tx.borrow();
        let result = from.check_transition(to);
        if result == TransitionResult::Changed {
            let _ = self.state_tx.send(to);
        }
        result
    }

    async fn run_connection(
        self: Arc<Self>,
        ws_stream: WsStream,
        mut outbound_rx: mpsc::UnboundedReceiver<SignalRequest>,
    ) {
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        loop {
            tokio::select! {
                inbound = ws_rx.next() => {
                    match inbound {
                        Some(Ok(WsMessage::Binary(bytes))) => {
                            self.handle_inbound_bytes(&bytes).await;
                        }
                        Some(Ok(WsMessage::Close(_))) | None => {
                            debug!(client_id = self.client_id, "signalling websocket closed");
                            break;
                        }
                        Some(Ok(_)) => {
                            // Text/ping/pong control frames carry no signalling
                            // payload on this transport; ignore.
                        }
                        Some(Err(err)) => {
                            warn!(client_id = self.client_id, error = %err, "signalling websocket error");
                            self.notify_error(LiveKitError::Transport(err.to_string())).await;
                            break;
                        }
                    }
                }
                outbound = outbound_rx.recv() => {
                    match outbound {
                        Some(request) => {
                            let bytes = codec::encode(&request);
                            if !bytes.is_empty() {
                                if let Err(err) = ws_tx.send(WsMessage::Binary(bytes)).await {
                                    warn!(client_id = self.client_id, error = %err, "failed to write to signalling websocket");
                                    break;
                                }
                            }
                        }
                        None => {
                            // Outbound sender dropped: disconnect() already
                            // transitioned state, just tear down the socket.
                            let _ = ws_tx.close().await;
                            break;
                        }
                    }
                }
            }
        }

        if self.state() != SignallingState::Disconnected {
            self.apply_transition(SignallingState::Disconnected);
            let listener = self.listener.read().clone();
            if let Some(listener) = listener {
                listener.on_transport_state(SignallingState::Disconnected).await;
            }
        }
    }

    async fn handle_inbound_bytes(&self, bytes: &[u8]) {
        match codec::decode_response(bytes) {
            Ok(response) => {
                if let Some(signal_response::Message::PongResp(pong)) = &response.message {
                    debug!(client_id = self.client_id, pong_ts = pong.timestamp, "pong received");
                }
                let listener = self.listener.read().clone();
                if let Some(listener) = listener {
                    listener.on_signal_response(response).await;
                }
            }
            Err(err) => {
                warn!(client_id = self.client_id, error = %err, "failed to parse signal response");
                let listener = self.listener.read().clone();
                if let Some(listener) = listener {
                    listener.on_response_parse_error(err).await;
                }
            }
        }
    }

    async fn notify_error(&self, error: LiveKitError) {
        let listener = self.listener.read().clone();
        if let Some(listener) = listener {
            listener.on_error(error).await;
        }
    }
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Runs the keep-alive loop described in §4.2: sends a `Ping` every
/// `ping_interval`, and treats the connection as dead (notifying the
/// listener and disconnecting) if the last ping goes unanswered for
/// `ping_timeout`. The caller is expected to mark each received pong by
/// updating `last_pong_at`, typically from the `SignalListener` impl that
/// also forwards responses to the Session Orchestrator.
pub async fn run_keepalive(
    client: Arc<SignalClient>,
    ping_interval: Duration,
    ping_timeout: Duration,
    last_pong_at: watch::Receiver<Instant>,
) {
    if ping_interval.is_zero() {
        return;
    }

    let mut ticker = tokio::time::interval(ping_interval);
    loop {
        ticker.tick().await;
        if client.state() != SignallingState::Connected {
            return;
        }

        client.send_ping();
        let deadline = Instant::now() + ping_timeout;
        let sent_at = Instant::now();

        loop {
            if tokio::time::timeout(deadline.saturating_duration_since(Instant::now()), async {
                let mut rx = last_pong_at.clone();
                loop {
                    if *rx.borrow() >= sent_at {
                        return;
                    }
                    if rx.changed().await.is_err() {
                        return;
                    }
                }
            })
            .await
            .is_err()
            {
                warn!("no pong received within ping_timeout, disconnecting");
                client.disconnect().await;
                client.notify_error(LiveKitError::ServerPingTimedOut).await;
                return;
            }
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_client_starts_disconnected() {
        let client = SignalClient::new(Duration::from_secs(10));
        assert_eq!(client.state(), SignallingState::Disconnected);
    }

    #[test]
    fn send_without_a_connection_returns_false() {
        let client = SignalClient::new(Duration::from_secs(10));
        let sent = client.send(SignalRequest::new(signal_request::Message::PingReq(Ping {
            timestamp: 0,
            rtt: 0,
        })));
        assert!(!sent);
    }

    #[test]
    fn client_ids_are_not_trivially_predictable_across_instances() {
        let a = SignalClient::new(Duration::from_secs(10));
        let b = SignalClient::new(Duration::from_secs(10));
        assert_ne!(a.client_id(), b.client_id());
    }
}
