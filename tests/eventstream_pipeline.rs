//! End-to-end tests for the Bedrock wire pipeline, fully offline.
//!
//! Synthetic `vnd.amazon.eventstream` bytes are driven through the binary
//! decoder, the SSE bridge, and a model-family adapter, the same path a
//! live `invoke-with-response-stream` response takes.

use base64::Engine as _;
use weir::eventstream::{EventStreamDecoder, EventStreamToSse};
use weir::llm::providers::{AnthropicChunkStream, NovaChunkStream};
use weir::sse::{SseParser, SseSource, SseWriter};
use weir::streaming::{ChunkStream, FinishReason, StreamChunk, StreamError};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Wire-format encoder mirroring the framing the decoder consumes:
/// 12-byte prelude with CRC, string headers, payload, trailing CRC.
fn encode_event(message_type: &str, event_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut headers = Vec::new();
    for (name, value) in [(":message-type", message_type), (":event-type", event_type)] {
        headers.push(name.len() as u8);
        headers.extend_from_slice(name.as_bytes());
        headers.push(7u8);
        headers.extend_from_slice(&(value.len() as u16).to_be_bytes());
        headers.extend_from_slice(value.as_bytes());
    }

    let total_len = (12 + headers.len() + payload.len() + 4) as u32;
    let mut out = Vec::with_capacity(total_len as usize);
    out.extend_from_slice(&total_len.to_be_bytes());
    out.extend_from_slice(&(headers.len() as u32).to_be_bytes());
    out.extend_from_slice(&crc32fast::hash(&out[..8]).to_be_bytes());
    out.extend_from_slice(&headers);
    out.extend_from_slice(payload);
    out.extend_from_slice(&crc32fast::hash(&out).to_be_bytes());
    out
}

fn encode_chunk(inner: &str) -> Vec<u8> {
    let wrapped = format!(
        "{{\"bytes\":\"{}\"}}",
        base64::engine::general_purpose::STANDARD.encode(inner)
    );
    encode_event("event", "chunk", wrapped.as_bytes())
}

async fn collect(stream: &mut dyn ChunkStream) -> Result<Vec<StreamChunk>, StreamError> {
    let mut chunks = Vec::new();
    while let Some(chunk) = stream.next_chunk().await? {
        chunks.push(chunk);
    }
    Ok(chunks)
}

#[tokio::test]
async fn claude_stream_survives_the_full_pipeline() -> anyhow::Result<()> {
    init_tracing();
    let deltas = [
        "{\"type\":\"message_start\",\"message\":{\"role\":\"assistant\"}}",
        "{\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}",
        "{\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"The river \"}}",
        "{\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"slows at \"}}",
        "{\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"the weir.\"}}",
        "{\"type\":\"content_block_stop\",\"index\":0}",
        "{\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":12}}",
    ];
    let mut wire = Vec::new();
    for delta in deltas {
        wire.extend(encode_chunk(delta));
    }
    wire.extend(encode_event("event", "messageStop", b""));

    let decoder = EventStreamDecoder::new(&wire[..]);
    let mut stream = AnthropicChunkStream::new(EventStreamToSse::new(decoder));
    let chunks = collect(&mut stream).await?;

    let text: String = chunks
        .iter()
        .filter_map(|chunk| match chunk {
            StreamChunk::Text { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(text, "The river slows at the weir.");
    assert_eq!(
        chunks.last(),
        Some(&StreamChunk::Finish {
            reason: FinishReason::Stop
        })
    );

    // End-of-stream stays terminal no matter how often it is pulled.
    for _ in 0..3 {
        assert!(stream.next_chunk().await?.is_none());
    }
    Ok(())
}

#[tokio::test]
async fn nova_stream_survives_the_full_pipeline() {
    let mut wire = Vec::new();
    wire.extend(encode_chunk(
        "{\"messageStart\":{\"role\":\"assistant\"}}",
    ));
    wire.extend(encode_chunk(
        "{\"contentBlockDelta\":{\"delta\":{\"text\":\"42\"},\"contentBlockIndex\":0}}",
    ));
    wire.extend(encode_chunk("{\"messageStop\":{\"stopReason\":\"end_turn\"}}"));
    wire.extend(encode_event("event", "messageStop", b""));

    let mut stream = NovaChunkStream::new(EventStreamToSse::from_reader(&wire[..]));
    let chunks = collect(&mut stream).await.unwrap();
    assert_eq!(
        chunks,
        vec![
            StreamChunk::Text {
                content: "42".into()
            },
            StreamChunk::Finish {
                reason: FinishReason::Stop
            },
        ]
    );
}

#[tokio::test]
async fn bridged_sse_text_reparses_identically() {
    // Push the transform output through the writer, then read it back with
    // the SSE parser: the bridge's output is plain, valid SSE.
    let mut wire = Vec::new();
    wire.extend(encode_chunk("{\"type\":\"content_block_delta\",\"delta\":{\"text\":\"hi\"}}"));
    wire.extend(encode_event("event", "messageStop", b""));

    let mut transform = EventStreamToSse::from_reader(&wire[..]);
    let mut writer = SseWriter::new(Vec::new());
    transform.transform_to_sse(&mut writer).await.unwrap();
    let sse_text = writer.into_inner();

    let mut parser = SseParser::new(&sse_text[..]);
    let first = parser.next_event().await.unwrap().unwrap();
    assert_eq!(
        first.data,
        "{\"type\":\"content_block_delta\",\"delta\":{\"text\":\"hi\"}}"
    );
    let second = parser.next_event().await.unwrap().unwrap();
    assert!(second.is_done());
    assert!(parser.next_event().await.unwrap().is_none());
}

#[tokio::test]
async fn backend_exception_is_distinct_from_clean_end() {
    let mut wire = Vec::new();
    wire.extend(encode_chunk("{\"type\":\"content_block_delta\",\"delta\":{\"text\":\"partial\"}}"));
    wire.extend(encode_event(
        "exception",
        "throttlingException",
        b"rate exceeded",
    ));

    let mut stream = AnthropicChunkStream::new(EventStreamToSse::from_reader(&wire[..]));
    assert_eq!(
        stream.next_chunk().await.unwrap(),
        Some(StreamChunk::Text {
            content: "partial".into()
        })
    );
    let err = stream.next_chunk().await.unwrap_err();
    assert_eq!(err, StreamError::upstream("rate exceeded"));
    // The failure is sticky, not converted into a clean end.
    assert_eq!(stream.next_chunk().await.unwrap_err(), err);
}

#[tokio::test]
async fn corruption_anywhere_fails_the_whole_pipeline() {
    let mut wire = encode_chunk("{\"type\":\"content_block_delta\",\"delta\":{\"text\":\"x\"}}");
    let mid = wire.len() / 2;
    wire[mid] ^= 0x10;

    let mut stream = AnthropicChunkStream::new(EventStreamToSse::from_reader(&wire[..]));
    let err = stream.next_chunk().await.unwrap_err();
    assert!(matches!(
        err,
        StreamError::Integrity { .. } | StreamError::Framing { .. }
    ));
}

#[tokio::test]
async fn empty_response_body_is_a_clean_end() {
    let mut stream = NovaChunkStream::new(EventStreamToSse::from_reader(&b""[..]));
    assert!(stream.next_chunk().await.unwrap().is_none());
}

#[tokio::test]
async fn chunk_streams_bridge_into_futures_streams() {
    use futures::StreamExt;
    use weir::streaming::into_stream;

    let mut wire = Vec::new();
    wire.extend(encode_chunk("{\"contentBlockDelta\":{\"delta\":{\"text\":\"a\"}}}"));
    wire.extend(encode_chunk("{\"contentBlockDelta\":{\"delta\":{\"text\":\"b\"}}}"));
    wire.extend(encode_event("event", "messageStop", b""));
    let wire: &'static [u8] = wire.leak();

    let chunks: Box<dyn ChunkStream> =
        Box::new(NovaChunkStream::new(EventStreamToSse::from_reader(wire)));
    let collected: Vec<_> = into_stream(chunks).collect().await;
    assert_eq!(collected.len(), 2);
    assert!(collected.iter().all(|item| item.is_ok()));
}
