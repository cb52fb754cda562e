//! Session-wide configuration knobs.
//!
//! These are the superset of fields found across the source's two
//! parallel `Options` definitions; fields that one header carried and the
//! other didn't are kept here with the more conservative default.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RoomOptions {
    /// Debounce delay before firing a publisher renegotiation.
    pub negotiation_delay: Duration,
    /// Hard ceiling on the debounce above, regardless of coalescing.
    pub max_negotiation_delay: Duration,
    pub socket_connect_timeout: Duration,
    pub primary_transport_connect_timeout: Duration,
    pub publisher_transport_connect_timeout: Duration,
    pub reconnect_attempts: u32,
    pub reconnect_attempt_delay: Duration,
    /// Size in bytes at which a data channel is considered backpressured
    /// and further sends are rejected rather than queued.
    pub data_channel_backpressure_threshold: usize,
    /// Bounded window of chunks buffered for a stream whose header has not
    /// yet arrived.
    pub stream_chunk_buffer_window: usize,
    pub auto_subscribe: bool,
    pub adaptive_stream: bool,
    pub key_provider: Option<KeyProviderOptions>,
}

impl Default for RoomOptions {
    fn default() -> Self {
        Self {
            negotiation_delay: Duration::from_millis(50),
            max_negotiation_delay: Duration::from_millis(100),
            socket_connect_timeout: Duration::from_secs(10),
            primary_transport_connect_timeout: Duration::from_secs(10),
            publisher_transport_connect_timeout: Duration::from_secs(10),
            reconnect_attempts: 3,
            reconnect_attempt_delay: Duration::from_secs(2),
            data_channel_backpressure_threshold: 1024 * 1024,
            stream_chunk_buffer_window: 64,
            auto_subscribe: true,
            adaptive_stream: false,
            key_provider: None,
        }
    }
}

/// Per-session AES-GCM key material configuration, consumed by the key
/// provider and the (external) frame cryptor.
#[derive(Debug, Clone)]
pub struct KeyProviderOptions {
    pub shared_key: bool,
    pub ratchet_salt: Vec<u8>,
    pub ratchet_window_size: u32,
    pub key_ring_size: usize,
    pub failure_tolerance: u32,
    pub uncrypted_magic_bytes: Option<Vec<u8>>,
}

impl Default for KeyProviderOptions {
    fn default() -> Self {
        Self {
            shared_key: false,
            ratchet_salt: Vec::new(),
            ratchet_window_size: 8,
            key_ring_size: 16,
            failure_tolerance: 10,
            uncrypted_magic_bytes: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_session_behaviour() {
        let opts = RoomOptions::default();
        assert_eq!(opts.negotiation_delay, Duration::from_millis(50));
        assert_eq!(opts.max_negotiation_delay, Duration::from_millis(100));
        assert_eq!(opts.reconnect_attempts, 3);
    }

    #[test]
    fn key_provider_defaults_match_documented_ring_sizes() {
        let opts = KeyProviderOptions::default();
        assert_eq!(opts.key_ring_size, 16);
        assert_eq!(opts.ratchet_window_size, 8);
        assert_eq!(opts.failure_tolerance, 10);
    }
}
