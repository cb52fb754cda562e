use async_trait::async_trait;

use livekit_client_proto::{ChatMessage, RpcAck, RpcRequest, RpcResponse};

use crate::error::StreamAssemblyError;
use crate::router::stream_assembly::CompletedStream;

#[derive(Debug, Clone)]
pub struct SpeakerUpdate {
    pub sid: String,
    pub level: f32,
    pub active: bool,
}

#[async_trait]
pub trait DataRouterListener: Send + Sync {
    async fn on_user_packet(
        &self,
        source_identity: String,
        payload: Vec<u8>,
        topic: Option<String>,
        destination_identities: Vec<String>,
        id: Option<String>,
    );
    async fn on_active_speakers_update(&self, speakers: Vec<SpeakerUpdate>);
    async fn on_transcription(&self, participant_identity: String, track_id: String, id: String);
    async fn on_chat_message(&self, sender_identity: String, message: ChatMessage);
    async fn on_stream_started(&self, stream_id: String);
    async fn on_rpc_request(&self, caller_identity: String, request: RpcRequest);
    async fn on_rpc_ack(&self, ack: RpcAck);
    async fn on_rpc_response(&self, response: RpcResponse);
    async fn on_stream_completed(&self, stream: CompletedStream);
    async fn on_stream_error(&self, error: StreamAssemblyError);
    async fn on_metrics(&self, batch: livekit_client_proto::MetricsBatch);
}
