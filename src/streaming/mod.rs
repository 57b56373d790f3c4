//! Canonical streaming contract shared by every provider.
//!
//! Each backend speaks its own delta schema over its own wire framing, but
//! callers only ever see one thing: a pull-based, finite sequence of
//! [`StreamChunk`]s produced by a [`ChunkStream`]. A stream is driven
//! exclusively by sequential `next_chunk()` calls; the only suspension point
//! is the underlying network read. Once a stream reports end-of-stream or a
//! terminal error, every further pull repeats that outcome.

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::llm::traits::ToolCall;

/// Errors produced by the wire-protocol layer (SSE parsing, EventStream
/// decoding, stream adaptation).
///
/// `Clone` is required so terminal states can re-return the same error on
/// every pull after a failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Underlying read or write failed. Sticky and non-retryable in place.
    #[error("transport error: {message}")]
    Transport { message: String },

    /// A CRC32 check failed in the binary decoder. The stream is presumed
    /// corrupt and is never resynchronized.
    #[error("integrity error in {section}: expected crc {expected:#010x}, computed {computed:#010x}")]
    Integrity {
        section: &'static str,
        expected: u32,
        computed: u32,
    },

    /// The wire framing itself was malformed (short read, bad header tag,
    /// inconsistent lengths).
    #[error("framing error in {section}: {message}")]
    Framing {
        section: &'static str,
        message: String,
    },

    /// A delta payload was not syntactically valid JSON. Valid JSON that
    /// merely doesn't match a recognized shape is skipped, not an error.
    #[error("invalid json in stream: {message}")]
    Json { message: String },

    /// The backend reported an error mid-stream (an EventStream `exception`
    /// message or an explicit `error` SSE event). Distinct from clean
    /// end-of-stream.
    #[error("upstream error: {message}")]
    Upstream { message: String },
}

impl StreamError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn framing(section: &'static str, message: impl Into<String>) -> Self {
        Self::Framing {
            section,
            message: message.into(),
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for StreamError {
    fn from(error: std::io::Error) -> Self {
        StreamError::Transport {
            message: error.to_string(),
        }
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(error: serde_json::Error) -> Self {
        StreamError::Json {
            message: error.to_string(),
        }
    }
}

/// Why a stream finished, normalized across provider vocabularies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
    Other,
}

impl FinishReason {
    /// Translate a provider's native finish/stop reason string.
    ///
    /// Unrecognized strings map to `Other`, never to an error.
    pub fn from_provider(reason: &str) -> Self {
        match reason {
            "stop" | "end_turn" | "stop_sequence" | "COMPLETE" | "STOP_SEQUENCE" => Self::Stop,
            "length" | "max_tokens" | "MAX_TOKENS" => Self::Length,
            "tool_calls" | "tool_use" | "TOOL_CALL" => Self::ToolCalls,
            "content_filter" | "content_filtered" => Self::ContentFilter,
            "error" | "ERROR" => Self::Error,
            _ => Self::Other,
        }
    }
}

/// Point-in-time token usage reported mid-stream.
///
/// May appear zero or more times per stream and is not guaranteed to be
/// cumulative or final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub input_tokens: Option<u32>,
    pub output_tokens: u32,
}

/// One canonical unit of streamed generation output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamChunk {
    /// Incremental text delta. Order-significant; concatenating all text
    /// chunks in arrival order yields the full response text.
    Text { content: String },
    /// A fully-resolved tool invocation request. Arguments arrive atomically
    /// with the call, not character-by-character.
    ToolCall(ToolCall),
    /// Usage snapshot.
    Usage(UsageSnapshot),
    /// Terminal chunk for this stream. No further chunks are semantically
    /// expected, though the iterator may still need to observe end-of-input.
    Finish { reason: FinishReason },
}

/// Terminal-state tracking for parsers, decoders and adapters.
///
/// The "never resume after termination" invariant is held explicitly here
/// rather than by a captured sentinel value.
#[derive(Debug, Clone)]
pub enum StreamState {
    Open,
    Done,
    Failed(StreamError),
}

impl StreamState {
    pub fn is_open(&self) -> bool {
        matches!(self, StreamState::Open)
    }

    /// If the stream already terminated, the repeated outcome for `T`-valued
    /// pulls; `None` while the stream is still open.
    pub fn terminal_outcome<T>(&self) -> Option<Result<Option<T>, StreamError>> {
        match self {
            StreamState::Open => None,
            StreamState::Done => Some(Ok(None)),
            StreamState::Failed(e) => Some(Err(e.clone())),
        }
    }
}

/// A pull-based, finite, non-restartable sequence of canonical chunks.
///
/// Implementations exclusively own their underlying HTTP response body and
/// release it when the stream is closed or exhausted. A single stream is
/// driven through `&mut self` and must not be shared; independent streams
/// are fully independent.
#[async_trait]
pub trait ChunkStream: Send {
    /// Pull the next canonical chunk.
    ///
    /// `Ok(None)` is clean end-of-stream and is sticky: every subsequent
    /// call returns it again. A returned error is equally sticky.
    async fn next_chunk(&mut self) -> Result<Option<StreamChunk>, StreamError>;

    /// Release the underlying response body. Idempotent; the body is
    /// released exactly once no matter how often this is called or whether
    /// the stream was already exhausted.
    fn close(&mut self);
}

/// Bridge a [`ChunkStream`] into a `futures::Stream` for callers that prefer
/// combinator-style consumption. The stream ends after the first error.
pub fn into_stream(
    mut chunks: Box<dyn ChunkStream>,
) -> impl Stream<Item = Result<StreamChunk, StreamError>> {
    async_stream::stream! {
        loop {
            match chunks.next_chunk().await {
                Ok(Some(chunk)) => yield Ok(chunk),
                Ok(None) => break,
                Err(e) => {
                    yield Err(e);
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(FinishReason::from_provider("stop"), FinishReason::Stop);
        assert_eq!(FinishReason::from_provider("end_turn"), FinishReason::Stop);
        assert_eq!(FinishReason::from_provider("COMPLETE"), FinishReason::Stop);
        assert_eq!(FinishReason::from_provider("length"), FinishReason::Length);
        assert_eq!(
            FinishReason::from_provider("MAX_TOKENS"),
            FinishReason::Length
        );
        assert_eq!(
            FinishReason::from_provider("tool_use"),
            FinishReason::ToolCalls
        );
        assert_eq!(
            FinishReason::from_provider("content_filter"),
            FinishReason::ContentFilter
        );
        assert_eq!(
            FinishReason::from_provider("banana"),
            FinishReason::Other
        );
    }

    #[test]
    fn terminal_outcome_repeats() {
        let open = StreamState::Open;
        assert!(open.terminal_outcome::<StreamChunk>().is_none());

        let done = StreamState::Done;
        assert!(matches!(
            done.terminal_outcome::<StreamChunk>(),
            Some(Ok(None))
        ));

        let failed = StreamState::Failed(StreamError::transport("boom"));
        for _ in 0..3 {
            let outcome = failed.terminal_outcome::<StreamChunk>().unwrap();
            assert_eq!(outcome, Err(StreamError::transport("boom")));
        }
    }

    #[test]
    fn stream_error_display_names_both_crcs() {
        let err = StreamError::Integrity {
            section: "prelude",
            expected: 0xdeadbeef,
            computed: 0x12345678,
        };
        let text = err.to_string();
        assert!(text.contains("0xdeadbeef"));
        assert!(text.contains("0x12345678"));
        assert!(text.contains("prelude"));
    }
}
