//! Binary-to-SSE bridge.
//!
//! Consumes the [`EventStreamDecoder`] and re-emits the embedded provider
//! deltas as SSE records, either pushed into an [`SseWriter`] or pulled one
//! record at a time. Downstream stream adapters consume only SSE, so this is
//! the single point where the binary framing disappears.

use base64::Engine as _;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

use super::{
    EventStreamDecoder, EventStreamMessage, EVENT_TYPE_CHUNK, EVENT_TYPE_MESSAGE_STOP,
    MESSAGE_TYPE_EVENT,
};
use crate::sse::{SseEvent, SseSource, SseWriter, DONE_SENTINEL};
use crate::streaming::{StreamError, StreamState};
use async_trait::async_trait;

/// Pull-based transformer over a decoded EventStream.
///
/// Buffer discipline: each pull decodes exactly one message; frames with no
/// SSE representation (unknown type combinations) are skipped in an internal
/// loop without returning control to the caller.
pub struct EventStreamToSse<R> {
    decoder: EventStreamDecoder<R>,
    state: StreamState,
}

impl<R: AsyncRead + Unpin + Send> EventStreamToSse<R> {
    pub fn new(decoder: EventStreamDecoder<R>) -> Self {
        Self {
            decoder,
            state: StreamState::Open,
        }
    }

    pub fn from_reader(reader: R) -> Self {
        Self::new(EventStreamDecoder::new(reader))
    }

    /// Release the underlying reader. Idempotent.
    pub fn close(&mut self) {
        self.decoder.close();
        if self.state.is_open() {
            self.state = StreamState::Done;
        }
    }

    /// Push form: drain the whole binary stream into `writer` as SSE text.
    ///
    /// A backend `exception` message is written as one synthetic error
    /// record and then propagated as the returned error. This is the only
    /// case where a broken stream surfaces as an application-visible error
    /// rather than a clean end.
    pub async fn transform_to_sse<W: AsyncWrite + Unpin + Send>(
        &mut self,
        writer: &mut SseWriter<W>,
    ) -> Result<(), StreamError> {
        loop {
            match self.next_event().await {
                Ok(Some(event)) => writer.write_event(&event).await?,
                Ok(None) => return Ok(()),
                Err(StreamError::Upstream { message }) => {
                    let record = format!(
                        "{{\"type\":\"error\",\"error\":{}}}",
                        serde_json::to_string(&message)?
                    );
                    writer.write_data(&record).await?;
                    return Err(StreamError::Upstream { message });
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn pull(&mut self) -> Result<Option<SseEvent>, StreamError> {
        loop {
            let message = match self.decoder.read_event().await? {
                Some(m) => m,
                None => {
                    self.state = StreamState::Done;
                    return Ok(None);
                }
            };

            if message.is_exception() {
                // Raw payload text travels in the error so callers can
                // distinguish "backend reported an error" from a clean end.
                let text = String::from_utf8_lossy(&message.payload).into_owned();
                tracing::warn!("eventstream exception frame: {}", text);
                return Err(StreamError::upstream(text));
            }

            match (message.message_type.as_str(), message.event_type.as_str()) {
                (MESSAGE_TYPE_EVENT, EVENT_TYPE_CHUNK) => {
                    if let Some(inner) = decode_chunk_payload(&message)? {
                        return Ok(Some(SseEvent::data(inner)));
                    }
                    // Valid JSON without the expected shape is uninteresting,
                    // not an error.
                    continue;
                }
                (MESSAGE_TYPE_EVENT, EVENT_TYPE_MESSAGE_STOP) => {
                    self.state = StreamState::Done;
                    self.decoder.close();
                    return Ok(Some(SseEvent::data(DONE_SENTINEL)));
                }
                (message_type, event_type) => {
                    tracing::trace!(
                        "skipping eventstream frame: type={} event={}",
                        message_type,
                        event_type
                    );
                    continue;
                }
            }
        }
    }
}

/// Unwrap a `chunk` payload: JSON `{"bytes": "<base64>"}` whose decoded
/// bytes are the provider's native delta, emitted verbatim downstream.
fn decode_chunk_payload(message: &EventStreamMessage) -> Result<Option<String>, StreamError> {
    let outer: Value = serde_json::from_slice(&message.payload)?;
    let Some(encoded) = outer.get("bytes").and_then(|b| b.as_str()) else {
        tracing::trace!("chunk frame without 'bytes' field, skipping");
        return Ok(None);
    };
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| StreamError::framing("chunk payload", format!("invalid base64: {}", e)))?;
    Ok(Some(String::from_utf8_lossy(&decoded).into_owned()))
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> SseSource for EventStreamToSse<R> {
    async fn next_event(&mut self) -> Result<Option<SseEvent>, StreamError> {
        if let Some(outcome) = self.state.terminal_outcome() {
            return outcome;
        }
        match self.pull().await {
            Ok(event) => Ok(event),
            Err(e) => {
                self.state = StreamState::Failed(e.clone());
                self.decoder.close();
                Err(e)
            }
        }
    }
}
