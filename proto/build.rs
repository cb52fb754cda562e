fn main() {
    let mut config = prost_build::Config::new();
    config.bytes(["."]);

    config
        .compile_protos(
            &["proto/livekit_models.proto", "proto/livekit_rtc.proto"],
            &["proto/"],
        )
        .expect("failed to compile livekit signalling protobuf schema");
}
