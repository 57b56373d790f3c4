//! Cohere provider implementation.
//!
//! Speaks the v2 chat API. Streaming uses typed SSE records
//! (`content-delta`, `tool-call-start`, `message-end`) with an uppercase
//! finish-reason vocabulary.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::adapter::{AdapterCore, Interpretation};
use crate::llm::traits::{
    ChatConfig, ChatResponse, EmbeddingResponse, HealthStatus, LlmError, LlmProvider,
    ProviderCapabilities, ProviderType, RerankResponse, RerankResult, Tool, ToolCall, Usage,
};
use crate::sse::{SseEvent, SseParser, SseSource};
use crate::streaming::{ChunkStream, FinishReason, StreamChunk, StreamError, UsageSnapshot};
use crate::types::{ContentBlock, MessageRole, Messages};

/// Cohere v2 chat provider.
#[derive(Debug)]
pub struct CohereProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl CohereProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Result<Self, LlmError> {
        Ok(Self {
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.cohere.com".to_string()),
            client: reqwest::Client::new(),
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .header("Content-Type", "application/json")
            .bearer_auth(&self.api_key)
    }

    fn build_request_body(
        &self,
        model_id: &str,
        messages: &Messages,
        tools: &[Tool],
        config: &ChatConfig,
        stream: bool,
    ) -> Value {
        let mut body = json!({
            "model": model_id,
            "messages": convert_messages(messages),
            "stream": stream,
        });
        if let Some(max_tokens) = config.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if let Some(temperature) = config.temperature {
            body["temperature"] = json!(temperature);
        }
        if !tools.is_empty() {
            body["tools"] = Value::Array(
                tools
                    .iter()
                    .map(|tool| {
                        json!({
                            "type": "function",
                            "function": {
                                "name": tool.name,
                                "description": tool.description,
                                "parameters": tool.input_schema,
                            }
                        })
                    })
                    .collect(),
            );
        }
        for (key, value) in &config.additional_params {
            body[key] = value.clone();
        }
        body
    }

    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response, LlmError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        Err(parse_error_envelope(status, &body))
    }
}

#[async_trait]
impl LlmProvider for CohereProvider {
    async fn chat(
        &self,
        model_id: &str,
        messages: &Messages,
        tools: &[Tool],
        config: &ChatConfig,
    ) -> Result<ChatResponse, LlmError> {
        tracing::info!("Cohere chat request for model: {}", model_id);

        let body = self.build_request_body(model_id, messages, tools, config, false);
        let response = self
            .request("/v2/chat")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError {
                message: format!("Cohere API request failed: {}", e),
                source: Some(Box::new(e)),
            })?;
        let response = self.check_status(response).await?;

        let response_json: Value = response.json().await.map_err(|e| LlmError::ProviderError {
            provider: ProviderType::Cohere,
            message: format!("Failed to parse Cohere JSON: {}", e),
            source: Some(Box::new(e)),
        })?;

        parse_chat_response(&response_json)
    }

    async fn chat_streaming(
        &self,
        model_id: &str,
        messages: &Messages,
        tools: &[Tool],
        config: &ChatConfig,
    ) -> Result<Box<dyn ChunkStream>, LlmError> {
        tracing::info!("🌊 Cohere streaming request for model: {}", model_id);

        let body = self.build_request_body(model_id, messages, tools, config, true);
        let response = self
            .request("/v2/chat")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError {
                message: format!("Cohere streaming request failed: {}", e),
                source: Some(Box::new(e)),
            })?;
        let response = self.check_status(response).await?;

        Ok(Box::new(CohereChunkStream::new(SseParser::from_response(
            response,
        ))))
    }

    async fn embed(
        &self,
        model_id: &str,
        texts: &[String],
    ) -> Result<EmbeddingResponse, LlmError> {
        tracing::info!(
            "Cohere embedding request for {} texts with model: {}",
            texts.len(),
            model_id
        );

        let body = json!({
            "model": model_id,
            "texts": texts,
            "input_type": "search_document",
            "embedding_types": ["float"],
        });
        let response = self
            .request("/v2/embed")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError {
                message: format!("Cohere embed request failed: {}", e),
                source: Some(Box::new(e)),
            })?;
        let response = self.check_status(response).await?;

        let response_json: Value = response.json().await.map_err(|e| LlmError::ProviderError {
            provider: ProviderType::Cohere,
            message: format!("Failed to parse Cohere embed JSON: {}", e),
            source: Some(Box::new(e)),
        })?;
        parse_embed_response(&response_json)
    }

    async fn rerank(
        &self,
        model_id: &str,
        query: &str,
        documents: &[String],
    ) -> Result<RerankResponse, LlmError> {
        tracing::info!(
            "Cohere rerank request for {} documents with model: {}",
            documents.len(),
            model_id
        );

        let body = json!({
            "model": model_id,
            "query": query,
            "documents": documents,
        });
        let response = self
            .request("/v2/rerank")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError {
                message: format!("Cohere rerank request failed: {}", e),
                source: Some(Box::new(e)),
            })?;
        let response = self.check_status(response).await?;

        let response_json: Value = response.json().await.map_err(|e| LlmError::ProviderError {
            provider: ProviderType::Cohere,
            message: format!("Failed to parse Cohere rerank JSON: {}", e),
            source: Some(Box::new(e)),
        })?;
        parse_rerank_response(&response_json)
    }

    async fn health_check(&self) -> Result<HealthStatus, LlmError> {
        let start = std::time::Instant::now();
        let result = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .bearer_auth(&self.api_key)
            .send()
            .await;
        let latency = start.elapsed().as_millis() as u64;

        match result {
            Ok(response) if response.status().is_success() => Ok(HealthStatus {
                healthy: true,
                provider: ProviderType::Cohere,
                latency_ms: Some(latency),
                error: None,
            }),
            Ok(response) => Ok(HealthStatus {
                healthy: false,
                provider: ProviderType::Cohere,
                latency_ms: Some(latency),
                error: Some(format!("HTTP {}", response.status())),
            }),
            Err(e) => Ok(HealthStatus {
                healthy: false,
                provider: ProviderType::Cohere,
                latency_ms: None,
                error: Some(format!("Connection failed: {}", e)),
            }),
        }
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_streaming: true,
            supports_tools: true,
            max_tokens: Some(4000),
            available_models: self
                .supported_models()
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Cohere
    }

    fn supported_models(&self) -> Vec<&'static str> {
        vec!["command-r-plus", "command-r", "command-r7b-12-2024"]
    }
}

/// Convert the shared conversation model to Cohere v2 format. Roles map
/// directly; tool results become `tool` messages.
fn convert_messages(messages: &Messages) -> Vec<Value> {
    let mut converted = Vec::new();

    for message in &messages.messages {
        let role = match message.role {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };

        let mut text_parts = Vec::new();
        let mut tool_calls = Vec::new();
        let mut tool_results = Vec::new();

        for block in &message.content {
            match block {
                ContentBlock::Text { text } => text_parts.push(text.clone()),
                ContentBlock::ToolUse { id, name, input } => {
                    tool_calls.push(json!({
                        "id": id,
                        "type": "function",
                        "function": {
                            "name": name,
                            "arguments": serde_json::to_string(input)
                                .unwrap_or_else(|_| "{}".to_string()),
                        }
                    }));
                }
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => {
                    tool_results.push(json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": content,
                    }));
                }
            }
        }

        let text = text_parts.join(" ");
        if !text.is_empty() || !tool_calls.is_empty() {
            let mut entry = json!({"role": role, "content": text});
            if !tool_calls.is_empty() {
                entry["tool_calls"] = Value::Array(tool_calls);
            }
            converted.push(entry);
        }
        converted.extend(tool_results);
    }

    converted
}

/// Parse a non-streaming v2 chat response.
fn parse_chat_response(response: &Value) -> Result<ChatResponse, LlmError> {
    let message = response
        .get("message")
        .ok_or_else(|| LlmError::ProviderError {
            provider: ProviderType::Cohere,
            message: "Invalid response format: missing message".to_string(),
            source: None,
        })?;

    let content = message
        .get("content")
        .and_then(|c| c.as_array())
        .map(|blocks| {
            blocks
                .iter()
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|tc| tc.as_array()) {
        for call in calls {
            if let Some(tool_call) = parse_tool_call(call) {
                tool_calls.push(tool_call);
            }
        }
    }

    let usage = response
        .get("usage")
        .and_then(|u| u.get("billed_units"))
        .and_then(|u| {
            Some(Usage::new(
                u.get("input_tokens")?.as_u64()? as u32,
                u.get("output_tokens")?.as_u64()? as u32,
            ))
        });

    let mut metadata = std::collections::HashMap::new();
    if let Some(finish_reason) = response.get("finish_reason") {
        metadata.insert("finish_reason".to_string(), finish_reason.clone());
    }
    if let Some(id) = response.get("id") {
        metadata.insert("id".to_string(), id.clone());
    }

    Ok(ChatResponse {
        content,
        tool_calls,
        usage,
        metadata,
    })
}

fn parse_tool_call(call: &Value) -> Option<ToolCall> {
    let function = call.get("function")?;
    let name = function.get("name").and_then(|n| n.as_str())?;
    let arguments = match function.get("arguments") {
        Some(Value::String(s)) if !s.is_empty() => {
            serde_json::from_str(s).unwrap_or_else(|_| Value::String(s.clone()))
        }
        Some(value @ Value::Object(_)) => value.clone(),
        _ => Value::Object(serde_json::Map::new()),
    };
    Some(ToolCall {
        id: call
            .get("id")
            .and_then(|i| i.as_str())
            .unwrap_or("")
            .to_string(),
        name: name.to_string(),
        arguments,
    })
}

/// Parse a v2 embed response: vectors live under `embeddings.float`.
fn parse_embed_response(response: &Value) -> Result<EmbeddingResponse, LlmError> {
    let vectors = response
        .get("embeddings")
        .and_then(|e| e.get("float"))
        .and_then(|f| f.as_array())
        .ok_or_else(|| LlmError::ProviderError {
            provider: ProviderType::Cohere,
            message: "Invalid embed response: missing embeddings.float".to_string(),
            source: None,
        })?;

    let embeddings = vectors
        .iter()
        .map(|vector| {
            vector
                .as_array()
                .map(|values| {
                    values
                        .iter()
                        .filter_map(|v| v.as_f64().map(|f| f as f32))
                        .collect()
                })
                .unwrap_or_default()
        })
        .collect();

    let usage = response
        .get("meta")
        .and_then(|m| m.get("billed_units"))
        .and_then(|u| u.get("input_tokens"))
        .and_then(|t| t.as_u64())
        .map(|input| Usage::new(input as u32, 0));

    Ok(EmbeddingResponse { embeddings, usage })
}

/// Parse a v2 rerank response, already ordered by descending relevance.
fn parse_rerank_response(response: &Value) -> Result<RerankResponse, LlmError> {
    let results = response
        .get("results")
        .and_then(|r| r.as_array())
        .ok_or_else(|| LlmError::ProviderError {
            provider: ProviderType::Cohere,
            message: "Invalid rerank response: missing results array".to_string(),
            source: None,
        })?
        .iter()
        .filter_map(|entry| {
            Some(RerankResult {
                index: entry.get("index")?.as_u64()? as usize,
                relevance_score: entry.get("relevance_score")?.as_f64()?,
            })
        })
        .collect();

    Ok(RerankResponse { results })
}

/// Map a non-200 response through the Cohere error envelope
/// (`{"message": ...}`).
fn parse_error_envelope(status: reqwest::StatusCode, body: &str) -> LlmError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message")?.as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| body.to_string());
    LlmError::from_error_response(ProviderType::Cohere, status, &message)
}

/// Canonical-chunk adapter for the Cohere v2 streaming delta schema.
pub struct CohereChunkStream<S> {
    core: AdapterCore<S>,
}

impl<S: SseSource> CohereChunkStream<S> {
    pub fn new(source: S) -> Self {
        Self {
            core: AdapterCore::new(source),
        }
    }
}

#[async_trait]
impl<S: SseSource> ChunkStream for CohereChunkStream<S> {
    async fn next_chunk(&mut self) -> Result<Option<StreamChunk>, StreamError> {
        self.core.next_with(interpret_delta).await
    }

    fn close(&mut self) {
        self.core.close();
    }
}

fn interpret_delta(_event: &SseEvent, json: &Value) -> Result<Interpretation, StreamError> {
    let kind = json.get("type").and_then(|t| t.as_str()).unwrap_or("");
    match kind {
        "content-delta" => {
            if let Some(text) = json
                .get("delta")
                .and_then(|d| d.get("message"))
                .and_then(|m| m.get("content"))
                .and_then(|c| c.get("text"))
                .and_then(|t| t.as_str())
            {
                if !text.is_empty() {
                    return Ok(Interpretation::Chunk(StreamChunk::Text {
                        content: text.to_string(),
                    }));
                }
            }
            Ok(Interpretation::Skip)
        }
        "tool-call-start" => {
            if let Some(call) = json
                .get("delta")
                .and_then(|d| d.get("message"))
                .and_then(|m| m.get("tool_calls"))
            {
                if let Some(tool_call) = parse_tool_call(call) {
                    return Ok(Interpretation::Chunk(StreamChunk::ToolCall(tool_call)));
                }
            }
            Ok(Interpretation::Skip)
        }
        "message-end" => {
            let delta = json.get("delta");
            if let Some(reason) = delta
                .and_then(|d| d.get("finish_reason"))
                .and_then(|r| r.as_str())
            {
                return Ok(Interpretation::Chunk(StreamChunk::Finish {
                    reason: FinishReason::from_provider(reason),
                }));
            }
            if let Some(output) = delta
                .and_then(|d| d.get("usage"))
                .and_then(|u| u.get("billed_units"))
                .and_then(|u| u.get("output_tokens"))
                .and_then(|t| t.as_u64())
            {
                return Ok(Interpretation::Chunk(StreamChunk::Usage(UsageSnapshot {
                    input_tokens: None,
                    output_tokens: output as u32,
                })));
            }
            Ok(Interpretation::End)
        }
        // message-start, content-start, content-end, tool-plan-delta
        _ => Ok(Interpretation::Skip),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Message;

    fn stream_over(input: &'static str) -> CohereChunkStream<SseParser<&'static [u8]>> {
        CohereChunkStream::new(SseParser::new(input.as_bytes()))
    }

    async fn collect(
        stream: &mut CohereChunkStream<SseParser<&'static [u8]>>,
    ) -> Vec<StreamChunk> {
        let mut chunks = Vec::new();
        while let Some(chunk) = stream.next_chunk().await.unwrap() {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn content_deltas_in_order_then_finish() {
        let mut stream = stream_over(
            "data: {\"type\":\"message-start\",\"delta\":{\"message\":{\"role\":\"assistant\"}}}\n\n\
             data: {\"type\":\"content-delta\",\"delta\":{\"message\":{\"content\":{\"text\":\"To \"}}}}\n\n\
             data: {\"type\":\"content-delta\",\"delta\":{\"message\":{\"content\":{\"text\":\"be\"}}}}\n\n\
             data: {\"type\":\"message-end\",\"delta\":{\"finish_reason\":\"COMPLETE\"}}\n\n",
        );
        let chunks = collect(&mut stream).await;
        assert_eq!(
            chunks,
            vec![
                StreamChunk::Text {
                    content: "To ".into()
                },
                StreamChunk::Text {
                    content: "be".into()
                },
                StreamChunk::Finish {
                    reason: FinishReason::Stop
                },
            ]
        );
    }

    #[tokio::test]
    async fn max_tokens_finish_maps_to_length() {
        let mut stream = stream_over(
            "data: {\"type\":\"message-end\",\"delta\":{\"finish_reason\":\"MAX_TOKENS\"}}\n\n",
        );
        let chunks = collect(&mut stream).await;
        assert_eq!(
            chunks,
            vec![StreamChunk::Finish {
                reason: FinishReason::Length
            }]
        );
    }

    #[tokio::test]
    async fn tool_call_start_is_a_tool_call_chunk() {
        let mut stream = stream_over(
            "data: {\"type\":\"tool-call-start\",\"delta\":{\"message\":{\"tool_calls\":{\"id\":\"c1\",\"type\":\"function\",\"function\":{\"name\":\"lookup\",\"arguments\":\"{\\\"q\\\":\\\"dams\\\"}\"}}}}}\n\n",
        );
        let chunks = collect(&mut stream).await;
        assert_eq!(
            chunks,
            vec![StreamChunk::ToolCall(ToolCall {
                id: "c1".into(),
                name: "lookup".into(),
                arguments: serde_json::json!({"q": "dams"}),
            })]
        );
    }

    #[test]
    fn parses_non_streaming_response() {
        let response = serde_json::json!({
            "id": "resp_1",
            "finish_reason": "COMPLETE",
            "message": {
                "role": "assistant",
                "content": [{"type": "text", "text": "Hello from Cohere"}]
            },
            "usage": {"billed_units": {"input_tokens": 3, "output_tokens": 4}}
        });
        let parsed = parse_chat_response(&response).unwrap();
        assert_eq!(parsed.content, "Hello from Cohere");
        assert_eq!(parsed.usage.unwrap().total_tokens, 7);
        assert_eq!(parsed.metadata["finish_reason"], "COMPLETE");
    }

    #[test]
    fn parses_embed_response() {
        let response = serde_json::json!({
            "embeddings": {"float": [[0.5, -0.25], [1.0, 0.0]]},
            "meta": {"billed_units": {"input_tokens": 6}}
        });
        let parsed = parse_embed_response(&response).unwrap();
        assert_eq!(parsed.embeddings, vec![vec![0.5f32, -0.25f32], vec![1.0f32, 0.0f32]]);
        assert_eq!(parsed.usage.unwrap().input_tokens, 6);
    }

    #[test]
    fn parses_rerank_response() {
        let response = serde_json::json!({
            "results": [
                {"index": 2, "relevance_score": 0.91},
                {"index": 0, "relevance_score": 0.42}
            ]
        });
        let parsed = parse_rerank_response(&response).unwrap();
        assert_eq!(
            parsed.results,
            vec![
                RerankResult { index: 2, relevance_score: 0.91 },
                RerankResult { index: 0, relevance_score: 0.42 },
            ]
        );
    }

    #[test]
    fn request_body_shape() {
        let mut messages = Messages::new();
        messages.push(Message::system("short answers"));
        messages.push(Message::user("hello"));
        let provider = CohereProvider::new("key".into(), None).unwrap();
        let body = provider.build_request_body(
            "command-r",
            &messages,
            &[],
            &ChatConfig::default(),
            true,
        );
        assert_eq!(body["model"], "command-r");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
    }
}
