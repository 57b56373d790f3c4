//! Shared pull loop for per-provider stream adapters.
//!
//! Every adapter is the same machine: pull one SSE record, stop on the done
//! sentinel, JSON-decode the data, hand the value to a provider-specific
//! interpreter, and skip records that carry nothing of interest. Only the
//! interpreter differs per backend, so it is the strategy injected here.

use serde_json::Value;

use crate::sse::{SseEvent, SseSource};
use crate::streaming::{StreamChunk, StreamError, StreamState};

/// What a provider interpreter made of one delta record.
pub(crate) enum Interpretation {
    /// A canonical chunk to surface to the caller.
    Chunk(StreamChunk),
    /// Nothing of interest (role-only delta, heartbeat, unknown shape).
    Skip,
    /// An explicit terminal frame (`message_stop` and friends).
    End,
}

/// Per-provider delta interpreter: receives the SSE record and its parsed
/// JSON payload, in that provider's native schema.
pub(crate) type Interpreter = fn(&SseEvent, &Value) -> Result<Interpretation, StreamError>;

/// Source ownership and sticky-state handling common to all adapters.
pub(crate) struct AdapterCore<S> {
    source: Option<S>,
    state: StreamState,
}

impl<S: SseSource> AdapterCore<S> {
    pub(crate) fn new(source: S) -> Self {
        Self {
            source: Some(source),
            state: StreamState::Open,
        }
    }

    /// Pull the next canonical chunk using `interpret` for the provider's
    /// delta schema. No-op records are consumed in a loop and never
    /// surfaced.
    pub(crate) async fn next_with(
        &mut self,
        interpret: Interpreter,
    ) -> Result<Option<StreamChunk>, StreamError> {
        if let Some(outcome) = self.state.terminal_outcome() {
            return outcome;
        }
        loop {
            let source = match self.source.as_mut() {
                Some(s) => s,
                None => {
                    self.state = StreamState::Done;
                    return Ok(None);
                }
            };

            let event = match source.next_event().await {
                Ok(Some(event)) => event,
                Ok(None) => {
                    self.finish();
                    return Ok(None);
                }
                Err(e) => {
                    self.fail(e.clone());
                    return Err(e);
                }
            };

            if event.is_done() {
                self.finish();
                return Ok(None);
            }
            if event.data.is_empty() {
                // Event-only records carry no delta to decode.
                continue;
            }

            let json: Value = match serde_json::from_str(&event.data) {
                Ok(value) => value,
                Err(e) => {
                    let err = StreamError::from(e);
                    self.fail(err.clone());
                    return Err(err);
                }
            };

            match interpret(&event, &json) {
                Ok(Interpretation::Chunk(chunk)) => return Ok(Some(chunk)),
                Ok(Interpretation::Skip) => continue,
                Ok(Interpretation::End) => {
                    self.finish();
                    return Ok(None);
                }
                Err(e) => {
                    self.fail(e.clone());
                    return Err(e);
                }
            }
        }
    }

    /// Release the source. Idempotent; the body is dropped exactly once.
    pub(crate) fn close(&mut self) {
        self.source = None;
        if self.state.is_open() {
            self.state = StreamState::Done;
        }
    }

    fn finish(&mut self) {
        self.source = None;
        self.state = StreamState::Done;
    }

    fn fail(&mut self, error: StreamError) {
        self.source = None;
        self.state = StreamState::Failed(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::SseParser;
    use crate::streaming::FinishReason;

    fn interpret_test(_event: &SseEvent, json: &Value) -> Result<Interpretation, StreamError> {
        if let Some(text) = json.get("text").and_then(|t| t.as_str()) {
            return Ok(Interpretation::Chunk(StreamChunk::Text {
                content: text.to_string(),
            }));
        }
        if json.get("stop").is_some() {
            return Ok(Interpretation::End);
        }
        if json.get("fail").is_some() {
            return Err(StreamError::upstream("interpreter failure"));
        }
        Ok(Interpretation::Skip)
    }

    async fn drive(input: &str) -> (Vec<StreamChunk>, Option<StreamError>) {
        let mut core = AdapterCore::new(SseParser::new(input.as_bytes()));
        let mut chunks = Vec::new();
        loop {
            match core.next_with(interpret_test).await {
                Ok(Some(chunk)) => chunks.push(chunk),
                Ok(None) => return (chunks, None),
                Err(e) => return (chunks, Some(e)),
            }
        }
    }

    #[tokio::test]
    async fn surfaces_chunks_in_order() {
        let (chunks, err) =
            drive("data: {\"text\":\"a\"}\n\ndata: {\"text\":\"b\"}\n\ndata: [DONE]\n\n").await;
        assert!(err.is_none());
        assert_eq!(
            chunks,
            vec![
                StreamChunk::Text { content: "a".into() },
                StreamChunk::Text { content: "b".into() },
            ]
        );
    }

    #[tokio::test]
    async fn skips_uninteresting_records_silently() {
        let (chunks, err) =
            drive("data: {\"role\":\"assistant\"}\n\ndata: {\"text\":\"x\"}\n\n").await;
        assert!(err.is_none());
        assert_eq!(chunks.len(), 1);
    }

    #[tokio::test]
    async fn explicit_end_frame_terminates() {
        let (chunks, err) =
            drive("data: {\"stop\":true}\n\ndata: {\"text\":\"never\"}\n\n").await;
        assert!(err.is_none());
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn invalid_json_is_a_hard_sticky_error() {
        let mut core = AdapterCore::new(SseParser::new(&b"data: {broken\n\n"[..]));
        let first = core.next_with(interpret_test).await.unwrap_err();
        assert!(matches!(first, StreamError::Json { .. }));
        let second = core.next_with(interpret_test).await.unwrap_err();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn interpreter_errors_are_sticky() {
        let mut core = AdapterCore::new(SseParser::new(&b"data: {\"fail\":1}\n\n"[..]));
        assert!(core.next_with(interpret_test).await.is_err());
        assert_eq!(
            core.next_with(interpret_test).await.unwrap_err(),
            StreamError::upstream("interpreter failure")
        );
    }

    #[tokio::test]
    async fn end_of_stream_is_idempotent() {
        let mut core = AdapterCore::new(SseParser::new(&b"data: [DONE]\n\n"[..]));
        for _ in 0..3 {
            assert!(core.next_with(interpret_test).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn close_is_idempotent_and_terminal() {
        let mut core = AdapterCore::new(SseParser::new(&b"data: {\"text\":\"x\"}\n\n"[..]));
        core.close();
        core.close();
        assert!(core.next_with(interpret_test).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn finish_chunks_pass_through() {
        fn finish(_: &SseEvent, _: &Value) -> Result<Interpretation, StreamError> {
            Ok(Interpretation::Chunk(StreamChunk::Finish {
                reason: FinishReason::Stop,
            }))
        }
        let mut core = AdapterCore::new(SseParser::new(&b"data: {}\n\n"[..]));
        assert_eq!(
            core.next_with(finish).await.unwrap(),
            Some(StreamChunk::Finish {
                reason: FinishReason::Stop
            })
        );
    }
}
