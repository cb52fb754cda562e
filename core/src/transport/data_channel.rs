//! Publisher data channels (§4.3, §3): the `_reliable` (ordered, retransmit
//! until acked) and `_lossy` (unordered, `max_retransmits=0`) channel pair
//! that backs the Data Packet Router's `DataChannelSink`.

use std::sync::Arc;

use tracing::warn;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::RTCPeerConnection;

use crate::router::DataChannelSink;

pub const RELIABLE_DATA_CHANNEL_LABEL: &str = "_reliable";
pub const LOSSY_DATA_CHANNEL_LABEL: &str = "_lossy";

/// Owns the publisher's two data channels and implements the router's
/// `DataChannelSink` seam over them. A channel that hasn't opened yet (or
/// has since closed) silently drops sends rather than queueing them, per
/// the "no queueing is performed at this layer" backpressure rule.
pub struct PublisherDataChannels {
    reliable: parking_lot::RwLock<Option<Arc<RTCDataChannel>>>,
    lossy: parking_lot::RwLock<Option<Arc<RTCDataChannel>>>,
    backpressure_threshold: usize,
}

impl PublisherDataChannels {
    pub fn new(backpressure_threshold: usize) -> Arc<Self> {
        Arc::new(Self {
            reliable: parking_lot::RwLock::new(None),
            lossy: parking_lot::RwLock::new(None),
            backpressure_threshold,
        })
    }

    /// Creates both channels on the publisher peer connection. Must be
    /// called once, before the first publisher offer is sent, so both
    /// channels are described in the initial SDP.
    pub async fn create(&self, pc: &RTCPeerConnection) -> webrtc::error::Result<()> {
        let reliable = pc
            .create_data_channel(
                RELIABLE_DATA_CHANNEL_LABEL,
                Some(RTCDataChannelInit {
                    ordered: Some(true),
                    ..Default::default()
                }),
            )
            .await?;
        *self.reliable.write() = Some(reliable);

        let lossy = pc
            .create_data_channel(
                LOSSY_DATA_CHANNEL_LABEL,
                Some(RTCDataChannelInit {
                    ordered: Some(false),
                    max_retransmits: Some(0),
                    ..Default::default()
                }),
            )
            .await?;
        *self.lossy.write() = Some(lossy);

        Ok(())
    }

    fn send_on(channel: &parking_lot::RwLock<Option<Arc<RTCDataChannel>>>, bytes: Vec<u8>, threshold: usize, label: &str) -> bool {
        let Some(dc) = channel.read().clone() else {
            warn!(label, "dropping send: data channel not yet open");
            return false;
        };

        if dc.buffered_amount() as usize > threshold {
            warn!(label, "dropping send: data channel backpressured");
            return false;
        }

        let dc = dc;
        let bytes = bytes::Bytes::from(bytes);
        // `send` returns a future; spawn it rather than block the caller,
        // matching the fire-and-forget semantics `DataChannelSink::send_*`
        // exposes synchronously.
        tokio::spawn(async move {
            if let Err(err) = dc.send(&bytes).await {
                warn!(error = %err, "data channel send failed");
            }
        });
        true
    }
}

impl DataChannelSink for PublisherDataChannels {
    fn send_reliable(&self, bytes: Vec<u8>) -> bool {
        Self::send_on(&self.reliable, bytes, self.backpressure_threshold, RELIABLE_DATA_CHANNEL_LABEL)
    }

    fn send_lossy(&self, bytes: Vec<u8>) -> bool {
        Self::send_on(&self.lossy, bytes, self.backpressure_threshold, LOSSY_DATA_CHANNEL_LABEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_before_channels_open_is_rejected() {
        let channels = PublisherDataChannels::new(1024 * 1024);
        assert!(!channels.send_reliable(b"hi".to_vec()));
        assert!(!channels.send_lossy(b"hi".to_vec()));
    }
}
