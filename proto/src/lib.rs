//! Generated protobuf types for the signalling (`livekit_rtc.proto`) and
//! shared model (`livekit_models.proto`) schemas, plus small hand-written
//! helpers that don't belong in generated code.

#![allow(clippy::large_enum_variant)]

include!(concat!(env!("OUT_DIR"), "/livekit.rs"));

impl SignalRequest {
    pub fn new(message: signal_request::Message) -> Self {
        Self {
            message: Some(message),
        }
    }
}

impl SignalResponse {
    pub fn new(message: signal_response::Message) -> Self {
        Self {
            message: Some(message),
        }
    }
}

impl DataPacket {
    pub fn kind(&self) -> DataPacketKind {
        DataPacketKind::try_from(self.kind).unwrap_or(DataPacketKind::Reliable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_request_round_trips_through_prost() {
        use prost::Message;

        let req = SignalRequest::new(signal_request::Message::Leave(LeaveRequest {
            can_reconnect: true,
            reason: DisconnectReason::ClientInitiated as i32,
            action: LeaveRequestAction::Disconnect as i32,
        }));

        let mut buf = Vec::new();
        req.encode(&mut buf).unwrap();
        let decoded = SignalRequest::decode(buf.as_slice()).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn data_packet_kind_defaults_to_reliable_on_unknown_tag() {
        let packet = DataPacket {
            kind: 99,
            ..Default::default()
        };
        assert_eq!(packet.kind(), DataPacketKind::Reliable);
    }
}
