//! A single named peer connection (publisher or subscriber) plus the bit
//! of state the Transport Manager needs alongside it: whether a remote
//! description has been applied yet (so ICE candidates can be buffered
//! until then) and a watchable stream of its `RTCPeerConnectionState`.
//!
//! `webrtc-rs` peer connections take a single state-change handler, not a
//! registry, so this owns that one handler and republishes it as a
//! `tokio::sync::watch` channel the Transport Manager (and tests) can
//! subscribe to independently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use webrtc::api::APIBuilder;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;

use super::SignalTarget;

pub struct PeerHandle {
    target: SignalTarget,
    pc: Arc<RTCPeerConnection>,
    has_remote_description: AtomicBool,
    state_rx: watch::Receiver<RTCPeerConnectionState>,
}

impl PeerHandle {
    pub async fn new(target: SignalTarget, config: RTCConfiguration) -> webrtc::error::Result<Arc<Self>> {
        let api = APIBuilder::new().build();
        let pc = Arc::new(api.new_peer_connection(config).await?);

        let (state_tx, state_rx) = watch::channel(RTCPeerConnectionState::New);
        pc.on_peer_connection_state_change(Box::new(move |state| {
            let _ = state_tx.send(state);
            Box::pin(async {})
        }));

        Ok(Arc::new(Self {
            target,
            pc,
            has_remote_description: AtomicBool::new(false),
            state_rx,
        }))
    }

    pub fn target(&self) -> SignalTarget {
        self.target
    }

    pub fn raw(&self) -> &RTCPeerConnection {
        &self.pc
    }

    pub fn state(&self) -> RTCPeerConnectionState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RTCPeerConnectionState> {
        self.state_rx.clone()
    }

    pub fn has_remote_description(&self) -> bool {
        self.has_remote_description.load(Ordering::SeqCst)
    }

    pub fn mark_remote_description_set(&self) {
        self.has_remote_description.store(true, Ordering::SeqCst);
    }
}
