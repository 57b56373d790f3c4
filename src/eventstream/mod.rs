//! AWS `application/vnd.amazon.eventstream` binary framing.
//!
//! Bedrock's `invoke-with-response-stream` endpoint frames its response in
//! this checksum-verified binary protocol instead of SSE. The
//! [`EventStreamDecoder`] recovers discrete messages from the raw bytes and
//! [`EventStreamToSse`] re-emits their embedded payloads as SSE records so
//! the rest of the streaming stack speaks a single protocol.
//!
//! Wire layout per message, all integers big-endian:
//!
//! ```text
//! [total_length:4][headers_length:4][prelude_crc:4] [headers...] [payload...] [message_crc:4]
//! ```
//!
//! Both CRC32 checksums (IEEE polynomial) are recomputed and compared on
//! every message. A mismatch is fatal for the remainder of the stream; there
//! is no resynchronization. Retrying means opening a new request.

pub mod decoder;
pub mod transform;

pub use decoder::EventStreamDecoder;
pub use transform::EventStreamToSse;

use bytes::Bytes;

/// Fixed size of the message prelude (two lengths plus their CRC).
pub const PRELUDE_LEN: usize = 12;

/// Header value-type tag for strings, the only supported value type.
pub const HEADER_TYPE_STRING: u8 = 7;

/// Required header naming the message kind (`event` or `exception`).
pub const HEADER_MESSAGE_TYPE: &str = ":message-type";

/// Required header naming the event kind (`chunk`, `messageStop`, ...).
pub const HEADER_EVENT_TYPE: &str = ":event-type";

/// `:message-type` value for ordinary events.
pub const MESSAGE_TYPE_EVENT: &str = "event";

/// `:message-type` value for backend-reported errors.
pub const MESSAGE_TYPE_EXCEPTION: &str = "exception";

/// `:event-type` value carrying a base64-wrapped provider delta.
pub const EVENT_TYPE_CHUNK: &str = "chunk";

/// `:event-type` value marking the end of the logical message.
pub const EVENT_TYPE_MESSAGE_STOP: &str = "messageStop";

/// One decoded EventStream message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventStreamMessage {
    /// Value of the `:message-type` header.
    pub message_type: String,
    /// Value of the `:event-type` header.
    pub event_type: String,
    /// Opaque payload bytes; for `chunk` events this is JSON of the shape
    /// `{"bytes": "<base64>"}`.
    pub payload: Bytes,
}

impl EventStreamMessage {
    pub fn is_exception(&self) -> bool {
        self.message_type == MESSAGE_TYPE_EXCEPTION
    }
}

/// Wire-format encoder for test fixtures.
#[cfg(test)]
pub(crate) mod testutil {
    use super::*;

    /// Encode one message with string-typed headers. `value_type` lets tests
    /// produce unsupported tags on purpose.
    pub fn encode_message_with_tag(
        headers: &[(&str, u8, &str)],
        payload: &[u8],
    ) -> Vec<u8> {
        let mut header_bytes = Vec::new();
        for (name, tag, value) in headers {
            header_bytes.push(name.len() as u8);
            header_bytes.extend_from_slice(name.as_bytes());
            header_bytes.push(*tag);
            if *tag == HEADER_TYPE_STRING {
                header_bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
                header_bytes.extend_from_slice(value.as_bytes());
            }
        }

        let total_len = (PRELUDE_LEN + header_bytes.len() + payload.len() + 4) as u32;
        let mut out = Vec::with_capacity(total_len as usize);
        out.extend_from_slice(&total_len.to_be_bytes());
        out.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
        out.extend_from_slice(&crc32fast::hash(&out[..8]).to_be_bytes());
        out.extend_from_slice(&header_bytes);
        out.extend_from_slice(payload);
        out.extend_from_slice(&crc32fast::hash(&out).to_be_bytes());
        out
    }

    /// Encode one well-formed message with the standard type headers.
    pub fn encode_event(message_type: &str, event_type: &str, payload: &[u8]) -> Vec<u8> {
        encode_message_with_tag(
            &[
                (HEADER_MESSAGE_TYPE, HEADER_TYPE_STRING, message_type),
                (HEADER_EVENT_TYPE, HEADER_TYPE_STRING, event_type),
            ],
            payload,
        )
    }

    /// Encode a `chunk` event wrapping `inner` as base64 JSON, the way
    /// Bedrock delivers provider deltas.
    pub fn encode_chunk(inner: &str) -> Vec<u8> {
        use base64::Engine as _;
        let wrapped = format!(
            "{{\"bytes\":\"{}\"}}",
            base64::engine::general_purpose::STANDARD.encode(inner)
        );
        encode_event(MESSAGE_TYPE_EVENT, EVENT_TYPE_CHUNK, wrapped.as_bytes())
    }
}
