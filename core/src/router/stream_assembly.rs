//! Multi-chunk data stream assembly (§4.6, "Stream assembly invariants").
//!
//! A stream is uniquely identified by `stream_id`. Chunks that arrive
//! before their header are buffered up to a bounded window then dropped
//! with a warning; a trailer without a header is ignored; a `total_length`
//! mismatch at the trailer surfaces `StreamLengthMismatch` instead of
//! silently truncating or padding the payload.

use std::collections::HashMap;

use tracing::warn;

use livekit_client_proto::{DataStreamChunk, DataStreamHeader, DataStreamTrailer};

use crate::error::StreamAssemblyError;

#[derive(Debug, Clone)]
pub struct CompletedStream {
    pub stream_id: String,
    pub topic: String,
    pub mime_type: String,
    pub attributes: HashMap<String, String>,
    pub payload: Vec<u8>,
}

struct OpenStream {
    header: DataStreamHeader,
    chunks: HashMap<u64, Vec<u8>>,
    total_received: u64,
}

/// Buffers chunks that raced ahead of their header, bounded so a
/// misbehaving or malicious peer can't grow this unboundedly.
struct PendingChunks {
    by_stream: HashMap<String, Vec<DataStreamChunk>>,
    window: usize,
}

pub struct StreamAssembler {
    open: HashMap<String, OpenStream>,
    pending: PendingChunks,
}

impl StreamAssembler {
    pub fn new(chunk_buffer_window: usize) -> Self {
        Self {
            open: HashMap::new(),
            pending: PendingChunks {
                by_stream: HashMap::new(),
                window: chunk_buffer_window,
            },
        }
    }

    pub fn on_header(&mut self, header: DataStreamHeader) {
        let stream_id = header.stream_id.clone();
        let mut stream = OpenStream {
            header,
            chunks: HashMap::new(),
            total_received: 0,
        };

        if let Some(buffered) = self.pending.by_stream.remove(&stream_id) {
            for chunk in buffered {
                apply_chunk(&mut stream, chunk);
            }
        }

        self.open.insert(stream_id, stream);
    }

    /// Chunks never themselves produce a listener event per §4.6; only
    /// the router's `StreamHeader` arm emits `on_stream_started`.
    pub fn on_chunk(&mut self, chunk: DataStreamChunk) {
        if let Some(stream) = self.open.get_mut(&chunk.stream_id) {
            apply_chunk(stream, chunk);
            return;
        }

        let entry = self.pending.by_stream.entry(chunk.stream_id.clone()).or_default();
        if entry.len() >= self.pending.window {
            warn!(
                stream_id = %chunk.stream_id,
                "dropping data stream chunk: header has not arrived within the buffer window"
            );
            return;
        }
        entry.push(chunk);
    }

    pub fn on_trailer(&mut self, trailer: DataStreamTrailer) -> Result<Option<CompletedStream>, StreamAssemblyError> {
        self.pending.by_stream.remove(&trailer.stream_id);

        let Some(stream) = self.open.remove(&trailer.stream_id) else {
            return Err(StreamAssemblyError::TrailerWithoutHeader(trailer.stream_id));
        };

        if let Some(expected) = stream.header.total_length {
            if stream.total_received != expected {
                return Err(StreamAssemblyError::LengthMismatch {
                    stream_id: trailer.stream_id,
                    expected,
                    actual: stream.total_received,
                });
            }
        }

        let mut ordered_indices: Vec<u64> = stream.chunks.keys().copied().collect();
        ordered_indices.sort_unstable();
        let mut payload = Vec::with_capacity(stream.total_received as usize);
        for idx in ordered_indices {
            payload.extend_from_slice(&stream.chunks[&idx]);
        }

        Ok(Some(CompletedStream {
            stream_id: stream.header.stream_id,
            topic: stream.header.topic,
            mime_type: stream.header.mime_type,
            attributes: stream.header.attributes,
            payload,
        }))
    }
}

fn apply_chunk(stream: &mut OpenStream, chunk: DataStreamChunk) {
    // Duplicates (a chunk index already recorded) are dropped silently,
    // per the "enforce monotonically increasing chunk_index; drop
    // duplicates" invariant.
    if stream.chunks.contains_key(&chunk.chunk_index) {
        return;
    }
    stream.total_received += chunk.content.len() as u64;
    stream.chunks.insert(chunk.chunk_index, chunk.content.to_vec());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(stream_id: &str, total_length: Option<u64>) -> DataStreamHeader {
        DataStreamHeader {
            stream_id: stream_id.into(),
            total_length,
            ..Default::default()
        }
    }

    fn chunk(stream_id: &str, idx: u64, content: &str) -> DataStreamChunk {
        DataStreamChunk {
            stream_id: stream_id.into(),
            chunk_index: idx,
            content: content.as_bytes().to_vec().into(),
            ..Default::default()
        }
    }

    #[test]
    fn header_then_chunks_then_trailer_assembles_payload_in_order() {
        let mut assembler = StreamAssembler::new(64);
        assembler.on_header(header("s1", Some(10)));
        assembler.on_chunk(chunk("s1", 0, "hello"));
        assembler.on_chunk(chunk("s1", 1, "world"));

        let completed = assembler
            .on_trailer(DataStreamTrailer {
                stream_id: "s1".into(),
                ..Default::default()
            })
            .unwrap()
            .unwrap();

        assert_eq!(completed.payload, b"helloworld");
    }

    #[test]
    fn chunks_arriving_before_header_are_buffered_and_applied_on_header() {
        let mut assembler = StreamAssembler::new(64);
        assembler.on_chunk(chunk("s1", 0, "hello"));
        assembler.on_chunk(chunk("s1", 1, "world"));
        assembler.on_header(header("s1", Some(10)));

        let completed = assembler
            .on_trailer(DataStreamTrailer {
                stream_id: "s1".into(),
                ..Default::default()
            })
            .unwrap()
            .unwrap();

        assert_eq!(completed.payload, b"helloworld");
    }

    #[test]
    fn trailer_without_header_is_rejected() {
        let mut assembler = StreamAssembler::new(64);
        let result = assembler.on_trailer(DataStreamTrailer {
            stream_id: "missing".into(),
            ..Default::default()
        });
        assert!(matches!(result, Err(StreamAssemblyError::TrailerWithoutHeader(_))));
    }

    #[test]
    fn total_length_mismatch_surfaces_stream_length_mismatch() {
        let mut assembler = StreamAssembler::new(64);
        assembler.on_header(header("s1", Some(999)));
        assembler.on_chunk(chunk("s1", 0, "hello"));

        let result = assembler.on_trailer(DataStreamTrailer {
            stream_id: "s1".into(),
            ..Default::default()
        });
        assert!(matches!(result, Err(StreamAssemblyError::LengthMismatch { .. })));
    }

    #[test]
    fn duplicate_chunk_index_is_dropped() {
        let mut assembler = StreamAssembler::new(64);
        assembler.on_header(header("s1", Some(5)));
        assembler.on_chunk(chunk("s1", 0, "hello"));
        assembler.on_chunk(chunk("s1", 0, "WORLD"));

        let completed = assembler
            .on_trailer(DataStreamTrailer {
                stream_id: "s1".into(),
                ..Default::default()
            })
            .unwrap()
            .unwrap();
        assert_eq!(completed.payload, b"hello");
    }

    #[test]
    fn chunk_buffer_window_drops_oldest_when_exceeded() {
        let mut assembler = StreamAssembler::new(2);
        assembler.on_chunk(chunk("s1", 0, "a"));
        assembler.on_chunk(chunk("s1", 1, "b"));
        assembler.on_chunk(chunk("s1", 2, "c")); // dropped, window is full

        assembler.on_header(header("s1", None));
        let completed = assembler
            .on_trailer(DataStreamTrailer {
                stream_id: "s1".into(),
                ..Default::default()
            })
            .unwrap()
            .unwrap();
        assert_eq!(completed.payload, b"ab");
    }
}
