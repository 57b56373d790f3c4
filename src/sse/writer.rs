//! SSE serialization, the inverse of the parser.
//!
//! Used when re-emitting a transformed stream (the Bedrock binary bridge)
//! and by tests that need wire-exact fixtures.

use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::{SseEvent, DONE_SENTINEL};
use crate::streaming::StreamError;

/// Serializes [`SseEvent`]s to `text/event-stream` wire format.
pub struct SseWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> SseWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one record: `event:`, `id:` and `retry:` lines (each omitted
    /// when unset or zero), one `data:` line per line of the data value,
    /// then the blank terminator line.
    pub async fn write_event(&mut self, event: &SseEvent) -> Result<(), StreamError> {
        let mut out = String::new();
        if let Some(name) = &event.event {
            out.push_str("event: ");
            out.push_str(name);
            out.push('\n');
        }
        if let Some(id) = &event.id {
            out.push_str("id: ");
            out.push_str(id);
            out.push('\n');
        }
        if let Some(retry) = event.retry_ms {
            if retry > 0 {
                out.push_str(&format!("retry: {}\n", retry));
            }
        }
        for line in event.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');

        self.writer.write_all(out.as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Write a data-only record.
    pub async fn write_data(&mut self, data: &str) -> Result<(), StreamError> {
        self.write_event(&SseEvent::data(data)).await
    }

    /// Write a named-event record.
    pub async fn write_named(&mut self, event: &str, data: &str) -> Result<(), StreamError> {
        self.write_event(&SseEvent::named(event, data)).await
    }

    /// Write the completion sentinel: `event: done` / `data: [DONE]`.
    pub async fn write_done(&mut self) -> Result<(), StreamError> {
        self.write_named("done", DONE_SENTINEL).await
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::{SseParser, SseSource};

    async fn write_to_string(events: &[SseEvent]) -> String {
        let mut writer = SseWriter::new(Vec::new());
        for event in events {
            writer.write_event(event).await.unwrap();
        }
        String::from_utf8(writer.into_inner()).unwrap()
    }

    #[tokio::test]
    async fn serializes_in_field_order() {
        let event = SseEvent {
            event: Some("update".into()),
            data: "payload".into(),
            id: Some("7".into()),
            retry_ms: Some(2500),
        };
        let wire = write_to_string(&[event]).await;
        assert_eq!(
            wire,
            "event: update\nid: 7\nretry: 2500\ndata: payload\n\n"
        );
    }

    #[tokio::test]
    async fn omits_unset_and_zero_fields() {
        let mut event = SseEvent::data("x");
        event.retry_ms = Some(0);
        let wire = write_to_string(&[event]).await;
        assert_eq!(wire, "data: x\n\n");
    }

    #[tokio::test]
    async fn splits_multi_line_data() {
        let wire = write_to_string(&[SseEvent::data("a\nb")]).await;
        assert_eq!(wire, "data: a\ndata: b\n\n");
    }

    #[tokio::test]
    async fn done_sentinel_wire_format() {
        let mut writer = SseWriter::new(Vec::new());
        writer.write_done().await.unwrap();
        let wire = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(wire, "event: done\ndata: [DONE]\n\n");
    }

    #[tokio::test]
    async fn round_trips_through_parser() {
        let originals = vec![
            SseEvent::data("plain"),
            SseEvent::named("delta", "{\"text\":\"hi\"}"),
            SseEvent {
                event: Some("chunk".into()),
                data: "line one\nline two\n".into(),
                id: Some("evt-9".into()),
                retry_ms: Some(300),
            },
            SseEvent::data(""),
        ];
        let wire = write_to_string(&originals).await;

        let mut parser = SseParser::new(wire.as_bytes());
        let mut parsed = Vec::new();
        while let Some(event) = parser.next_event().await.unwrap() {
            parsed.push(event);
        }
        assert_eq!(parsed, originals);
    }
}
