//! Data Packet Router (§4.6): serializes outbound packets onto the
//! correct data channel and demultiplexes inbound packets into typed
//! events.

pub mod listener;
pub mod stream_assembly;

use std::sync::Arc;

use parking_lot::Mutex;
use prost::Message as _;
use tracing::warn;

use livekit_client_proto::{data_packet, DataPacket, DataPacketKind};

pub use listener::{DataRouterListener, SpeakerUpdate};
use stream_assembly::StreamAssembler;

/// Abstraction over "a data channel that can carry binary frames",
/// implemented by the Transport Manager's publisher data channels. Kept
/// as a trait so the router never has to know about `webrtc`'s data
/// channel type directly.
pub trait DataChannelSink: Send + Sync {
    fn send_reliable(&self, bytes: Vec<u8>) -> bool;
    fn send_lossy(&self, bytes: Vec<u8>) -> bool;
}

pub struct DataPacketRouter {
    local_identity: parking_lot::RwLock<String>,
    sink: Arc<dyn DataChannelSink>,
    listeners: parking_lot::RwLock<Vec<Arc<dyn DataRouterListener>>>,
    streams: Mutex<StreamAssembler>,
}

impl DataPacketRouter {
    pub fn new(sink: Arc<dyn DataChannelSink>, chunk_buffer_window: usize) -> Self {
        Self {
            local_identity: parking_lot::RwLock::new(String::new()),
            sink,
            listeners: parking_lot::RwLock::new(Vec::new()),
            streams: Mutex::new(StreamAssembler::new(chunk_buffer_window)),
        }
    }

    pub fn set_local_identity(&self, identity: String) {
        *self.local_identity.write() = identity;
    }

    pub fn add_listener(&self, listener: Arc<dyn DataRouterListener>) {
        self.listeners.write().push(listener);
    }

    /// Routes an outbound packet to the channel matching its `kind`.
    /// Rejects (returns false) without sending if the local identity is
    /// empty, per §4.6.
    pub fn send(&self, mut packet: DataPacket) -> bool {
        let identity = self.local_identity.read().clone();
        if identity.is_empty() {
            warn!("refusing to send a data packet with no local participant identity set");
            return false;
        }
        packet.participant_identity = identity;

        let mut bytes = Vec::with_capacity(packet.encoded_len());
        if packet.encode(&mut bytes).is_err() {
            return false;
        }

        match DataPacketKind::try_from(packet.kind).unwrap_or(DataPacketKind::Reliable) {
            DataPacketKind::Reliable => self.sink.send_reliable(bytes),
            DataPacketKind::Lossy => self.sink.send_lossy(bytes),
        }
    }

    /// Decodes and dispatches an inbound data-channel frame.
    pub async fn handle_inbound(&self, bytes: &[u8]) {
        let packet = match DataPacket::decode(bytes) {
            Ok(packet) => packet,
            Err(err) => {
                warn!(error = %err, "failed to decode inbound data packet");
                return;
            }
        };

        let Some(value) = packet.value else {
            return;
        };

        let listeners = self.listeners.read().clone();

        match value {
            data_packet::Value::User(user) => {
                for l in &listeners {
                    l.on_user_packet(
                        user.participant_identity.clone(),
                        user.payload.to_vec(),
                        (!user.topic.is_empty()).then(|| user.topic.clone()),
                        user.destination_identities.clone(),
                        (!user.id.is_empty()).then(|| user.id.clone()),
                    )
                    .await;
                }
            }
            data_packet::Value::Speaker(update) => {
                let speakers = update
                    .speakers
                    .into_iter()
                    .map(|s| SpeakerUpdate {
                        sid: s.sid,
                        level: s.level,
                        active: s.active,
                    })
                    .collect::<Vec<_>>();
                for l in &listeners {
                    l.on_active_speakers_update(speakers.clone()).await;
                }
            }
            data_packet::Value::Transcription(t) => {
                for l in &listeners {
                    l.on_transcription(
                        t.transcribed_participant_identity.clone(),
                        t.track_id.clone(),
                        t.id.clone(),
                    )
                    .await;
                }
            }
            data_packet::Value::ChatMessage(chat) => {
                for l in &listeners {
                    l.on_chat_message(packet.participant_identity.clone(), chat.clone()).await;
                }
            }
            data_packet::Value::RpcRequest(req) => {
                for l in &listeners {
                    l.on_rpc_request(packet.participant_identity.clone(), req.clone()).await;
                }
            }
            data_packet::Value::RpcAck(ack) => {
                for l in &listeners {
                    l.on_rpc_ack(ack.clone()).await;
                }
            }
            data_packet::Value::RpcResponse(resp) => {
                for l in &listeners {
                    l.on_rpc_response(resp.clone()).await;
                }
            }
            data_packet::Value::StreamHeader(header) => {
                let stream_id = header.stream_id.clone();
                self.streams.lock().on_header(header);
                for l in &listeners {
                    l.on_stream_started(stream_id.clone()).await;
                }
            }
            data_packet::Value::StreamChunk(chunk) => {
                self.streams.lock().on_chunk(chunk);
            }
            data_packet::Value::StreamTrailer(trailer) => {
                let result = self.streams.lock().on_trailer(trailer);
                match result {
                    Ok(Some(completed)) => {
                        for l in &listeners {
                            l.on_stream_completed(completed.clone()).await;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        for l in &listeners {
                            l.on_stream_error(err.clone()).await;
                        }
                    }
                }
            }
            data_packet::Value::Metrics(batch) => {
                for l in &listeners {
                    l.on_metrics(batch.clone()).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livekit_client_proto::{data_packet, UserPacket};
    use std::sync::atomic::{AtomicBool, Ordering};

    struct RecordingSink {
        reliable_called: AtomicBool,
        lossy_called: AtomicBool,
    }

    impl DataChannelSink for RecordingSink {
        fn send_reliable(&self, _bytes: Vec<u8>) -> bool {
            self.reliable_called.store(true, Ordering::SeqCst);
            true
        }
        fn send_lossy(&self, _bytes: Vec<u8>) -> bool {
            self.lossy_called.store(true, Ordering::SeqCst);
            true
        }
    }

    #[test]
    fn reliable_kind_routes_to_reliable_channel() {
        let sink = Arc::new(RecordingSink {
            reliable_called: AtomicBool::new(false),
            lossy_called: AtomicBool::new(false),
        });
        let router = DataPacketRouter::new(sink.clone(), 64);
        router.set_local_identity("alice".into());

        let sent = router.send(DataPacket {
            kind: DataPacketKind::Reliable as i32,
            value: Some(data_packet::Value::User(UserPacket::default())),
            ..Default::default()
        });

        assert!(sent);
        assert!(sink.reliable_called.load(Ordering::SeqCst));
        assert!(!sink.lossy_called.load(Ordering::SeqCst));
    }

    #[test]
    fn lossy_kind_routes_to_lossy_channel() {
        let sink = Arc::new(RecordingSink {
            reliable_called: AtomicBool::new(false),
            lossy_called: AtomicBool::new(false),
        });
        let router = DataPacketRouter::new(sink.clone(), 64);
        router.set_local_identity("alice".into());

        router.send(DataPacket {
            kind: DataPacketKind::Lossy as i32,
            value: Some(data_packet::Value::User(UserPacket::default())),
            ..Default::default()
        });

        assert!(sink.lossy_called.load(Ordering::SeqCst));
        assert!(!sink.reliable_called.load(Ordering::SeqCst));
    }

    #[test]
    fn send_with_no_local_identity_is_rejected() {
        let sink = Arc::new(RecordingSink {
            reliable_called: AtomicBool::new(false),
            lossy_called: AtomicBool::new(false),
        });
        let router = DataPacketRouter::new(sink, 64);

        let sent = router.send(DataPacket::default());
        assert!(!sent);
    }

    struct RecordingListener {
        started_stream_ids: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl DataRouterListener for RecordingListener {
        async fn on_user_packet(
            &self,
            _source_identity: String,
            _payload: Vec<u8>,
            _topic: Option<String>,
            _destination_identities: Vec<String>,
            _id: Option<String>,
        ) {
        }
        async fn on_active_speakers_update(&self, _speakers: Vec<SpeakerUpdate>) {}
        async fn on_transcription(&self, _participant_identity: String, _track_id: String, _id: String) {}
        async fn on_chat_message(&self, _sender_identity: String, _message: livekit_client_proto::ChatMessage) {}
        async fn on_stream_started(&self, stream_id: String) {
            self.started_stream_ids.lock().push(stream_id);
        }
        async fn on_rpc_request(&self, _caller_identity: String, _request: livekit_client_proto::RpcRequest) {}
        async fn on_rpc_ack(&self, _ack: livekit_client_proto::RpcAck) {}
        async fn on_rpc_response(&self, _response: livekit_client_proto::RpcResponse) {}
        async fn on_stream_completed(&self, _stream: crate::router::stream_assembly::CompletedStream) {}
        async fn on_stream_error(&self, _error: crate::error::StreamAssemblyError) {}
        async fn on_metrics(&self, _batch: livekit_client_proto::MetricsBatch) {}
    }

    #[tokio::test]
    async fn stream_header_emits_stream_started_and_nothing_else() {
        use livekit_client_proto::DataStreamHeader;

        let sink = Arc::new(RecordingSink {
            reliable_called: AtomicBool::new(false),
            lossy_called: AtomicBool::new(false),
        });
        let router = DataPacketRouter::new(sink, 64);
        let listener = Arc::new(RecordingListener {
            started_stream_ids: parking_lot::Mutex::new(Vec::new()),
        });
        router.add_listener(listener.clone());

        let packet = DataPacket {
            value: Some(data_packet::Value::StreamHeader(DataStreamHeader {
                stream_id: "s1".into(),
                ..Default::default()
            })),
            ..Default::default()
        };
        let mut bytes = Vec::with_capacity(packet.encoded_len());
        packet.encode(&mut bytes).unwrap();

        router.handle_inbound(&bytes).await;

        assert_eq!(listener.started_stream_ids.lock().clone(), vec!["s1".to_string()]);
    }
}
