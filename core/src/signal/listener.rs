//! The typed listener interface the Signalling Client notifies.
//!
//! The source pattern of listener registries with weak pointers doesn't
//! translate directly; instead there is one owned, replaceable listener
//! behind a lock, matching "set_server_listener replaces the single typed
//! listener" in §4.2 rather than a multi-observer registry (that pattern
//! is reserved for the Participant Registry, which really does have many
//! independent observers).

use async_trait::async_trait;

use livekit_client_proto::SignalResponse;

use crate::error::{LiveKitError, WireCodecError};
use crate::signal::state::SignallingState;

#[async_trait]
pub trait SignalListener: Send + Sync {
    async fn on_signal_response(&self, response: SignalResponse);

    async fn on_transport_state(&self, state: SignallingState);

    /// A malformed inbound frame. Per §7, this is logged and the
    /// connection continues.
    async fn on_response_parse_error(&self, error: WireCodecError);

    /// A terminal error for this connection attempt (ping timeout,
    /// transport close, connect failure after retries exhausted).
    async fn on_error(&self, error: LiveKitError);
}
