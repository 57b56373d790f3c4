//! Pull-based SSE parser.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::io::StreamReader;

use super::{SseEvent, SseSource};
use crate::streaming::{StreamError, StreamState};

/// Reader over an HTTP response body, as handed to [`SseParser::from_response`].
pub type HttpBodyReader = StreamReader<BoxStream<'static, std::io::Result<Bytes>>, Bytes>;

/// Parses a byte stream into discrete SSE records.
///
/// The parser exclusively owns its underlying reader. Lines are processed
/// per the `text/event-stream` grammar: `:`-prefixed comments are skipped,
/// lines without a `:` are tolerated silently, a blank line terminates the
/// record accumulated so far. End-of-stream and read errors are sticky.
pub struct SseParser<R> {
    reader: Option<BufReader<R>>,
    state: StreamState,
    pending: PendingEvent,
}

/// Fields accumulated since the last record terminator.
#[derive(Default)]
struct PendingEvent {
    event: Option<String>,
    data_lines: Vec<String>,
    id: Option<String>,
    retry_ms: Option<u64>,
    seen_field: bool,
}

impl PendingEvent {
    fn take(&mut self) -> SseEvent {
        let event = SseEvent {
            event: self.event.take(),
            data: std::mem::take(&mut self.data_lines).join("\n"),
            id: self.id.take(),
            retry_ms: self.retry_ms.take(),
        };
        self.seen_field = false;
        event
    }
}

impl<R: AsyncRead + Unpin + Send> SseParser<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: Some(BufReader::new(reader)),
            state: StreamState::Open,
            pending: PendingEvent::default(),
        }
    }

    /// Release the underlying reader. Idempotent.
    pub fn close(&mut self) {
        self.reader = None;
        if self.state.is_open() {
            self.state = StreamState::Done;
        }
    }

    async fn pull(&mut self) -> Result<Option<SseEvent>, StreamError> {
        let reader = match self.reader.as_mut() {
            Some(r) => r,
            None => return Ok(None),
        };

        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line).await?;
            if n == 0 {
                // End of input: a partially accumulated record is emitted
                // once before the sticky end-of-stream state takes over.
                self.state = StreamState::Done;
                self.reader = None;
                if self.pending.seen_field {
                    return Ok(Some(self.pending.take()));
                }
                return Ok(None);
            }

            let line = line.trim_end_matches('\n').trim_end_matches('\r');

            if line.is_empty() {
                // Record terminator. Blank lines between records are not
                // themselves records.
                if self.pending.seen_field {
                    return Ok(Some(self.pending.take()));
                }
                continue;
            }

            if line.starts_with(':') {
                // Comment line, never surfaced.
                continue;
            }

            let Some((field, value)) = line.split_once(':') else {
                tracing::trace!("ignoring malformed sse line: '{}'", line);
                continue;
            };
            let value = value.strip_prefix(' ').unwrap_or(value);

            match field {
                "event" => {
                    self.pending.event = Some(value.to_string());
                    self.pending.seen_field = true;
                }
                "data" => {
                    self.pending.data_lines.push(value.to_string());
                    self.pending.seen_field = true;
                }
                "id" => {
                    self.pending.id = Some(value.to_string());
                    self.pending.seen_field = true;
                }
                "retry" => {
                    self.pending.retry_ms = Some(value.parse().unwrap_or(0));
                    self.pending.seen_field = true;
                }
                _ => {
                    tracing::trace!("ignoring unknown sse field: '{}'", field);
                }
            }
        }
    }
}

impl SseParser<HttpBodyReader> {
    /// Wrap an HTTP response body, taking exclusive ownership of it.
    pub fn from_response(response: reqwest::Response) -> Self {
        let body: BoxStream<'static, std::io::Result<Bytes>> =
            Box::pin(response.bytes_stream().map_err(std::io::Error::other));
        Self::new(StreamReader::new(body))
    }
}

#[async_trait]
impl<R: AsyncRead + Unpin + Send> SseSource for SseParser<R> {
    async fn next_event(&mut self) -> Result<Option<SseEvent>, StreamError> {
        if let Some(outcome) = self.state.terminal_outcome() {
            return outcome;
        }
        match self.pull().await {
            Ok(event) => Ok(event),
            Err(e) => {
                self.state = StreamState::Failed(e.clone());
                self.reader = None;
                Err(e)
            }
        }
    }
}
