//! Server-Sent Events wire format.
//!
//! SSE (`text/event-stream`) is the text framing every HTTP provider here
//! streams over, and the common protocol the binary Bedrock framing is
//! normalized into. This module owns both directions: [`SseParser`] turns a
//! byte stream into discrete records, [`SseWriter`] serializes records back
//! to the wire.

pub mod parser;
pub mod writer;

pub use parser::SseParser;
pub use writer::SseWriter;

use async_trait::async_trait;

use crate::streaming::StreamError;

/// The literal completion sentinel used by OpenAI-style streams.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One parsed Server-Sent-Event record.
///
/// Produced fresh per parse cycle and immutable once returned. The common
/// case is a default-event record: no `event` field, non-empty `data`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field, if present.
    pub event: Option<String>,
    /// The `data:` field; multi-line values are joined with `\n`.
    pub data: String,
    /// The `id:` field, if present.
    pub id: Option<String>,
    /// The `retry:` field in milliseconds, if present. Malformed integers
    /// degrade to 0 rather than erroring.
    pub retry_ms: Option<u64>,
}

impl SseEvent {
    /// A data-only record (the default event).
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    /// A named-event record.
    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
            ..Self::default()
        }
    }

    /// Whether this record marks stream completion: either the literal
    /// `[DONE]` data sentinel or an explicit `done` event.
    pub fn is_done(&self) -> bool {
        self.data == DONE_SENTINEL || self.event.as_deref() == Some("done")
    }
}

/// Anything that can be pulled for SSE records.
///
/// Implemented by [`SseParser`] over raw `text/event-stream` bytes and by
/// [`crate::eventstream::EventStreamToSse`] over Bedrock's binary framing,
/// so stream adapters consume one protocol regardless of transport.
#[async_trait]
pub trait SseSource: Send {
    /// Pull the next record. `Ok(None)` is sticky end-of-stream; errors are
    /// equally sticky.
    async fn next_event(&mut self) -> Result<Option<SseEvent>, StreamError>;
}
