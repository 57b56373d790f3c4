//! Binary EventStream decoder with checksum enforcement.

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::StreamReader;

use super::{
    EventStreamMessage, HEADER_EVENT_TYPE, HEADER_MESSAGE_TYPE, HEADER_TYPE_STRING, PRELUDE_LEN,
};
use crate::streaming::{StreamError, StreamState};

/// Reader over an HTTP response body, as handed to
/// [`EventStreamDecoder::from_response`].
pub type HttpBodyReader = StreamReader<BoxStream<'static, std::io::Result<Bytes>>, Bytes>;

/// Decodes `application/vnd.amazon.eventstream` bytes into discrete
/// messages, verifying both the prelude CRC and the whole-message CRC.
///
/// The decoder performs no resynchronization after a failure: a single
/// corrupted frame invalidates the remainder of the stream, and every
/// subsequent `read_event` call repeats the same error.
pub struct EventStreamDecoder<R> {
    reader: Option<R>,
    state: StreamState,
}

impl<R: AsyncRead + Unpin + Send> EventStreamDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(reader),
            state: StreamState::Open,
        }
    }

    /// Release the underlying reader. Idempotent.
    pub fn close(&mut self) {
        self.reader = None;
        if self.state.is_open() {
            self.state = StreamState::Done;
        }
    }

    /// Read and verify the next message. `Ok(None)` is clean end-of-stream
    /// (sticky); any decode error is fatal and equally sticky.
    pub async fn read_event(&mut self) -> Result<Option<EventStreamMessage>, StreamError> {
        if let Some(outcome) = self.state.terminal_outcome() {
            return outcome;
        }
        match self.read_frame().await {
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => {
                self.state = StreamState::Done;
                self.reader = None;
                Ok(None)
            }
            Err(e) => {
                self.state = StreamState::Failed(e.clone());
                self.reader = None;
                Err(e)
            }
        }
    }

    async fn read_frame(&mut self) -> Result<Option<EventStreamMessage>, StreamError> {
        let reader = match self.reader.as_mut() {
            Some(r) => r,
            None => return Ok(None),
        };

        // Prelude: read by hand so a clean stream end (zero bytes) is
        // distinguishable from a truncated prelude.
        let mut prelude = [0u8; PRELUDE_LEN];
        let mut filled = 0;
        while filled < PRELUDE_LEN {
            let n = reader.read(&mut prelude[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            return Ok(None);
        }
        if filled < PRELUDE_LEN {
            return Err(StreamError::framing(
                "prelude",
                format!("truncated prelude: {} of {} bytes", filled, PRELUDE_LEN),
            ));
        }

        let total_length = u32::from_be_bytes(prelude[0..4].try_into().unwrap());
        let headers_length = u32::from_be_bytes(prelude[4..8].try_into().unwrap());
        let prelude_crc = u32::from_be_bytes(prelude[8..12].try_into().unwrap());

        let computed = crc32fast::hash(&prelude[..8]);
        if computed != prelude_crc {
            return Err(StreamError::Integrity {
                section: "prelude",
                expected: prelude_crc,
                computed,
            });
        }

        let payload_length = total_length
            .checked_sub(PRELUDE_LEN as u32 + 4)
            .and_then(|n| n.checked_sub(headers_length))
            .ok_or_else(|| {
                StreamError::framing(
                    "prelude",
                    format!(
                        "inconsistent lengths: total {} headers {}",
                        total_length, headers_length
                    ),
                )
            })?;

        let mut headers = vec![0u8; headers_length as usize];
        read_section(reader, &mut headers, "headers").await?;

        let mut payload = vec![0u8; payload_length as usize];
        read_section(reader, &mut payload, "payload").await?;

        let mut crc_bytes = [0u8; 4];
        read_section(reader, &mut crc_bytes, "message crc").await?;
        let message_crc = u32::from_be_bytes(crc_bytes);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&prelude);
        hasher.update(&headers);
        hasher.update(&payload);
        let computed = hasher.finalize();
        if computed != message_crc {
            return Err(StreamError::Integrity {
                section: "message",
                expected: message_crc,
                computed,
            });
        }

        let (message_type, event_type) = parse_headers(&headers)?;
        tracing::trace!(
            "decoded eventstream message: type={} event={} payload={}B",
            message_type,
            event_type,
            payload.len()
        );

        Ok(Some(EventStreamMessage {
            message_type,
            event_type,
            payload: Bytes::from(payload),
        }))
    }
}

impl EventStreamDecoder<HttpBodyReader> {
    /// Wrap an HTTP response body, taking exclusive ownership of it.
    pub fn from_response(response: reqwest::Response) -> Self {
        let body: BoxStream<'static, std::io::Result<Bytes>> =
            Box::pin(response.bytes_stream().map_err(std::io::Error::other));
        Self::new(StreamReader::new(body))
    }
}

/// `read_exact` with section context: a short read inside a message is a
/// framing error, not a clean end.
async fn read_section<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8],
    section: &'static str,
) -> Result<(), StreamError> {
    reader.read_exact(buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            StreamError::framing(section, format!("truncated: expected {} bytes", buf.len()))
        } else {
            StreamError::from(e)
        }
    })?;
    Ok(())
}

/// Walk the header block: 1-byte name length, name, 1-byte value-type tag,
/// and for strings a 2-byte big-endian value length plus value bytes. Any
/// non-string tag is unsupported and fatal.
fn parse_headers(buf: &[u8]) -> Result<(String, String), StreamError> {
    let mut message_type = None;
    let mut event_type = None;

    let mut i = 0;
    while i < buf.len() {
        let name_len = buf[i] as usize;
        i += 1;
        let name = take(buf, &mut i, name_len)?;
        let name = std::str::from_utf8(name)
            .map_err(|_| StreamError::framing("headers", "header name is not utf-8"))?;

        let tag = take(buf, &mut i, 1)?[0];
        if tag != HEADER_TYPE_STRING {
            return Err(StreamError::framing(
                "headers",
                format!("unsupported value type {} for header '{}'", tag, name),
            ));
        }

        let value_len = u16::from_be_bytes(take(buf, &mut i, 2)?.try_into().unwrap()) as usize;
        let value = take(buf, &mut i, value_len)?;
        let value = std::str::from_utf8(value)
            .map_err(|_| StreamError::framing("headers", "header value is not utf-8"))?;

        match name {
            HEADER_MESSAGE_TYPE => message_type = Some(value.to_string()),
            HEADER_EVENT_TYPE => event_type = Some(value.to_string()),
            _ => {}
        }
    }

    let message_type = message_type.ok_or_else(|| {
        StreamError::framing("headers", format!("missing {} header", HEADER_MESSAGE_TYPE))
    })?;
    let event_type = event_type.ok_or_else(|| {
        StreamError::framing("headers", format!("missing {} header", HEADER_EVENT_TYPE))
    })?;
    Ok((message_type, event_type))
}

fn take<'a>(buf: &'a [u8], i: &mut usize, len: usize) -> Result<&'a [u8], StreamError> {
    let end = i
        .checked_add(len)
        .filter(|&end| end <= buf.len())
        .ok_or_else(|| StreamError::framing("headers", "header block ends mid-entry"))?;
    let slice = &buf[*i..end];
    *i = end;
    Ok(slice)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventstream::testutil::{encode_event, encode_message_with_tag};
    use crate::eventstream::{EVENT_TYPE_CHUNK, MESSAGE_TYPE_EVENT};

    #[tokio::test]
    async fn decodes_basic_chunk_message() {
        let wire = encode_event(MESSAGE_TYPE_EVENT, EVENT_TYPE_CHUNK, b"{\"bytes\":\"aGVsbG8=\"}");
        let mut decoder = EventStreamDecoder::new(&wire[..]);

        let message = decoder.read_event().await.unwrap().unwrap();
        assert_eq!(message.message_type, "event");
        assert_eq!(message.event_type, "chunk");
        assert_eq!(&message.payload[..], b"{\"bytes\":\"aGVsbG8=\"}");

        assert!(decoder.read_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn decodes_back_to_back_messages() {
        let mut wire = encode_event(MESSAGE_TYPE_EVENT, EVENT_TYPE_CHUNK, b"one");
        wire.extend(encode_event(MESSAGE_TYPE_EVENT, "messageStop", b""));
        let mut decoder = EventStreamDecoder::new(&wire[..]);

        assert_eq!(
            decoder.read_event().await.unwrap().unwrap().payload[..],
            b"one"[..]
        );
        let stop = decoder.read_event().await.unwrap().unwrap();
        assert_eq!(stop.event_type, "messageStop");
        assert!(stop.payload.is_empty());
        assert!(decoder.read_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_input_is_end_of_stream_not_error() {
        let mut decoder = EventStreamDecoder::new(&b""[..]);
        assert!(decoder.read_event().await.unwrap().is_none());
        assert!(decoder.read_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_prelude_is_a_framing_error() {
        let wire = encode_event(MESSAGE_TYPE_EVENT, EVENT_TYPE_CHUNK, b"x");
        let mut decoder = EventStreamDecoder::new(&wire[..7]);
        let err = decoder.read_event().await.unwrap_err();
        assert!(matches!(
            err,
            StreamError::Framing {
                section: "prelude",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn truncated_payload_is_a_framing_error() {
        let wire = encode_event(MESSAGE_TYPE_EVENT, EVENT_TYPE_CHUNK, b"payload");
        let cut = wire.len() - 6;
        let mut decoder = EventStreamDecoder::new(&wire[..cut]);
        let err = decoder.read_event().await.unwrap_err();
        assert!(matches!(err, StreamError::Framing { .. }));
    }

    #[tokio::test]
    async fn any_flipped_bit_fails_a_crc_check() {
        let wire = encode_event(MESSAGE_TYPE_EVENT, EVENT_TYPE_CHUNK, b"{\"bytes\":\"aGk=\"}");
        // Skip the CRC fields themselves: corrupting a stored CRC still has
        // to fail, but as a mismatch against the recomputed value, which the
        // loop below also covers by flipping bytes 8..12.
        for position in 0..wire.len() {
            let mut corrupt = wire.clone();
            corrupt[position] ^= 0x01;
            let mut decoder = EventStreamDecoder::new(&corrupt[..]);
            let result = decoder.read_event().await;
            assert!(
                result.is_err(),
                "flipping byte {} decoded successfully",
                position
            );
        }
    }

    #[tokio::test]
    async fn prelude_crc_mismatch_names_both_values() {
        let mut wire = encode_event(MESSAGE_TYPE_EVENT, EVENT_TYPE_CHUNK, b"x");
        wire[9] ^= 0xff;
        let mut decoder = EventStreamDecoder::new(&wire[..]);
        match decoder.read_event().await.unwrap_err() {
            StreamError::Integrity {
                section,
                expected,
                computed,
            } => {
                assert_eq!(section, "prelude");
                assert_ne!(expected, computed);
            }
            other => panic!("expected integrity error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn message_crc_mismatch_is_fatal_and_sticky() {
        let mut wire = encode_event(MESSAGE_TYPE_EVENT, EVENT_TYPE_CHUNK, b"body");
        let last = wire.len() - 1;
        wire[last] ^= 0xff;
        let mut decoder = EventStreamDecoder::new(&wire[..]);

        let first = decoder.read_event().await.unwrap_err();
        assert!(matches!(
            first,
            StreamError::Integrity {
                section: "message",
                ..
            }
        ));
        // The failure state repeats; the decoder never resynchronizes.
        let second = decoder.read_event().await.unwrap_err();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unsupported_header_value_type_is_fatal() {
        let wire = encode_message_with_tag(
            &[
                (HEADER_MESSAGE_TYPE, HEADER_TYPE_STRING, "event"),
                (HEADER_EVENT_TYPE, 4, ""),
            ],
            b"",
        );
        let mut decoder = EventStreamDecoder::new(&wire[..]);
        let err = decoder.read_event().await.unwrap_err();
        match err {
            StreamError::Framing { section, message } => {
                assert_eq!(section, "headers");
                assert!(message.contains("unsupported value type 4"));
            }
            other => panic!("expected framing error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_required_header_is_fatal() {
        let wire = encode_message_with_tag(
            &[(HEADER_MESSAGE_TYPE, HEADER_TYPE_STRING, "event")],
            b"",
        );
        let mut decoder = EventStreamDecoder::new(&wire[..]);
        let err = decoder.read_event().await.unwrap_err();
        assert!(matches!(err, StreamError::Framing { .. }));
    }

    #[tokio::test]
    async fn inconsistent_lengths_are_rejected() {
        // total_length smaller than the fixed overhead
        let mut wire = Vec::new();
        wire.extend_from_slice(&8u32.to_be_bytes());
        wire.extend_from_slice(&0u32.to_be_bytes());
        wire.extend_from_slice(&crc32fast::hash(&wire[..8]).to_be_bytes());
        let mut decoder = EventStreamDecoder::new(&wire[..]);
        let err = decoder.read_event().await.unwrap_err();
        assert!(matches!(
            err,
            StreamError::Framing {
                section: "prelude",
                ..
            }
        ));
    }
}
