//! Anthropic Direct API provider implementation.
//!
//! Speaks the Messages API. The streaming adapter here also serves Bedrock's
//! Claude models: their inner deltas use the identical schema once the
//! binary framing has been bridged to SSE.

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use super::adapter::{AdapterCore, Interpretation};
use crate::llm::traits::{
    ChatConfig, ChatResponse, HealthStatus, LlmError, LlmProvider, ProviderCapabilities,
    ProviderType, Tool, ToolCall, Usage,
};
use crate::sse::{SseEvent, SseParser, SseSource};
use crate::streaming::{ChunkStream, FinishReason, StreamChunk, StreamError, UsageSnapshot};
use crate::types::{ContentBlock, MessageRole, Messages};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Direct API provider.
#[derive(Debug)]
pub struct AnthropicProvider {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Result<Self, LlmError> {
        Ok(Self {
            api_key,
            base_url: base_url.unwrap_or_else(|| "https://api.anthropic.com".to_string()),
            client: reqwest::Client::new(),
        })
    }

    fn request(&self) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/v1/messages", self.base_url))
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
    }

    fn build_request_body(
        &self,
        model_id: &str,
        messages: &Messages,
        tools: &[Tool],
        config: &ChatConfig,
        stream: bool,
    ) -> Value {
        let (converted, system) = convert_messages(messages);
        let mut body = json!({
            "model": model_id,
            "max_tokens": config.max_tokens.unwrap_or(4096),
            "messages": converted,
        });
        if stream {
            body["stream"] = json!(true);
        }
        if let Some(system) = system {
            body["system"] = json!(system);
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
                            "name": tool.name,
                            "description": tool.description,
                            "input_schema": tool.input_schema,
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
impl LlmProvider for AnthropicProvider {
    async fn chat(
        &self,
        model_id: &str,
        messages: &Messages,
        tools: &[Tool],
        config: &ChatConfig,
    ) -> Result<ChatResponse, LlmError> {
        let operation_id = Uuid::new_v4();
        tracing::info!(
            "[{}] 🔵 Anthropic chat request for model: {}",
            operation_id,
            model_id
        );

        let body = self.build_request_body(model_id, messages, tools, config, false);
        tracing::debug!(
            "[{}] request body: {}",
            operation_id,
            serde_json::to_string(&body).unwrap_or_else(|_| "<invalid>".to_string())
        );

        let response = self
            .request()
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError {
                message: format!("Anthropic API request failed: {}", e),
                source: Some(Box::new(e)),
            })?;
        let response = self.check_status(response).await?;

        let response_json: Value = response.json().await.map_err(|e| LlmError::ProviderError {
            provider: ProviderType::Anthropic,
            message: format!("Failed to parse Anthropic JSON: {}", e),
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
        tracing::info!("🌊 Anthropic streaming request for model: {}", model_id);

        let body = self.build_request_body(model_id, messages, tools, config, true);
        let response = self
            .request()
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError {
                message: format!("Anthropic streaming request failed: {}", e),
                source: Some(Box::new(e)),
            })?;
        let response = self.check_status(response).await?;

        Ok(Box::new(AnthropicChunkStream::new(
            SseParser::from_response(response),
        )))
    }

    async fn health_check(&self) -> Result<HealthStatus, LlmError> {
        // No cheap unauthenticated endpoint exists, so probe with a minimal
        // one-token request.
        let start = std::time::Instant::now();
        let probe = json!({
            "model": "claude-3-5-haiku-20241022",
            "max_tokens": 1,
            "messages": [{"role": "user", "content": [{"type": "text", "text": "Hi"}]}],
        });
        let result = self.request().json(&probe).send().await;
        let latency = start.elapsed().as_millis() as u64;

        match result {
            Ok(response) if response.status().is_success() => Ok(HealthStatus {
                healthy: true,
                provider: ProviderType::Anthropic,
                latency_ms: Some(latency),
                error: None,
            }),
            Ok(response) => Ok(HealthStatus {
                healthy: false,
                provider: ProviderType::Anthropic,
                latency_ms: Some(latency),
                error: Some(format!("HTTP {}", response.status())),
            }),
            Err(e) => Ok(HealthStatus {
                healthy: false,
                provider: ProviderType::Anthropic,
                latency_ms: None,
                error: Some(format!("Connection failed: {}", e)),
            }),
        }
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_streaming: true,
            supports_tools: true,
            max_tokens: Some(8192),
            available_models: self
                .supported_models()
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Anthropic
    }

    fn supported_models(&self) -> Vec<&'static str> {
        vec![
            "claude-3-5-sonnet-20241022",
            "claude-3-5-haiku-20241022",
            "claude-3-opus-20240229",
        ]
    }
}

/// Convert the shared conversation model to Messages API format, pulling
/// system messages out into the top-level `system` field.
fn convert_messages(messages: &Messages) -> (Vec<Value>, Option<String>) {
    let mut converted = Vec::new();
    let mut system = None;

    for message in &messages.messages {
        match message.role {
            MessageRole::System => {
                let text = message.text_content();
                if !text.is_empty() {
                    system = Some(text);
                }
            }
            MessageRole::User | MessageRole::Assistant => {
                let mut content = Vec::new();
                for block in &message.content {
                    match block {
                        ContentBlock::Text { text } => {
                            content.push(json!({"type": "text", "text": text}));
                        }
                        ContentBlock::ToolUse { id, name, input } => {
                            let input = if input.is_object() {
                                input.clone()
                            } else {
                                Value::Object(serde_json::Map::new())
                            };
                            content.push(json!({
                                "type": "tool_use",
                                "id": id,
                                "name": name,
                                "input": input,
                            }));
                        }
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content: result,
                            is_error,
                        } => {
                            content.push(json!({
                                "type": "tool_result",
                                "tool_use_id": tool_use_id,
                                "content": result,
                                "is_error": is_error,
                            }));
                        }
                    }
                }
                if !content.is_empty() {
                    converted.push(json!({
                        "role": match message.role {
                            MessageRole::User => "user",
                            MessageRole::Assistant => "assistant",
                            _ => unreachable!(),
                        },
                        "content": content,
                    }));
                }
            }
        }
    }

    (converted, system)
}

/// Parse a non-streaming Messages API response. Bedrock's Claude models
/// return the same shape, so the Bedrock provider reuses this.
pub(crate) fn parse_chat_response(response: &Value) -> Result<ChatResponse, LlmError> {
    let blocks = response
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| LlmError::ProviderError {
            provider: ProviderType::Anthropic,
            message: "Invalid response format: missing content array".to_string(),
            source: None,
        })?;

    let content = blocks
        .iter()
        .filter_map(|block| {
            if block.get("type") == Some(&json!("text")) {
                block.get("text").and_then(|t| t.as_str())
            } else {
                None
            }
        })
        .collect::<Vec<_>>()
        .join("");

    let tool_calls = blocks
        .iter()
        .filter_map(|block| {
            if block.get("type") == Some(&json!("tool_use")) {
                Some(ToolCall {
                    id: block.get("id")?.as_str()?.to_string(),
                    name: block.get("name")?.as_str()?.to_string(),
                    arguments: block.get("input").cloned().unwrap_or(Value::Null),
                })
            } else {
                None
            }
        })
        .collect();

    let usage = response.get("usage").and_then(|u| {
        Some(Usage::new(
            u.get("input_tokens")?.as_u64()? as u32,
            u.get("output_tokens")?.as_u64()? as u32,
        ))
    });

    let mut metadata = std::collections::HashMap::new();
    for key in ["stop_reason", "model", "id"] {
        if let Some(value) = response.get(key) {
            metadata.insert(key.to_string(), value.clone());
        }
    }

    Ok(ChatResponse {
        content,
        tool_calls,
        usage,
        metadata,
    })
}

/// Map a non-200 response through the Anthropic error envelope
/// (`{"type":"error","error":{"type":...,"message":...}}`).
fn parse_error_envelope(status: reqwest::StatusCode, body: &str) -> LlmError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")?
                .get("message")?
                .as_str()
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| body.to_string());
    LlmError::from_error_response(ProviderType::Anthropic, status, &message)
}

/// Canonical-chunk adapter for the Anthropic streaming delta schema
/// (`message_start` / `content_block_*` / `message_delta` / `message_stop`).
pub struct AnthropicChunkStream<S> {
    core: AdapterCore<S>,
}

impl<S: SseSource> AnthropicChunkStream<S> {
    pub fn new(source: S) -> Self {
        Self {
            core: AdapterCore::new(source),
        }
    }
}

#[async_trait]
impl<S: SseSource> ChunkStream for AnthropicChunkStream<S> {
    async fn next_chunk(&mut self) -> Result<Option<StreamChunk>, StreamError> {
        self.core.next_with(interpret_delta).await
    }

    fn close(&mut self) {
        self.core.close();
    }
}

fn interpret_delta(event: &SseEvent, json: &Value) -> Result<Interpretation, StreamError> {
    // An explicit error event is terminal and distinct from a clean end.
    let kind = json.get("type").and_then(|t| t.as_str()).unwrap_or("");
    if event.event.as_deref() == Some("error") || kind == "error" {
        let message = json
            .get("error")
            .map(|e| e.to_string())
            .unwrap_or_else(|| event.data.clone());
        return Err(StreamError::upstream(message));
    }

    match kind {
        "content_block_delta" => {
            if let Some(text) = json
                .get("delta")
                .and_then(|d| d.get("text"))
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
        "content_block_start" => {
            if let Some(block) = json.get("content_block") {
                if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                    return Ok(Interpretation::Chunk(StreamChunk::ToolCall(ToolCall {
                        id: block
                            .get("id")
                            .and_then(|i| i.as_str())
                            .unwrap_or("")
                            .to_string(),
                        name: block
                            .get("name")
                            .and_then(|n| n.as_str())
                            .unwrap_or("")
                            .to_string(),
                        arguments: block
                            .get("input")
                            .cloned()
                            .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
                    })));
                }
            }
            Ok(Interpretation::Skip)
        }
        "message_delta" => {
            if let Some(reason) = json
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(|r| r.as_str())
            {
                return Ok(Interpretation::Chunk(StreamChunk::Finish {
                    reason: FinishReason::from_provider(reason),
                }));
            }
            if let Some(output) = json
                .get("usage")
                .and_then(|u| u.get("output_tokens"))
                .and_then(|t| t.as_u64())
            {
                return Ok(Interpretation::Chunk(StreamChunk::Usage(UsageSnapshot {
                    input_tokens: json
                        .get("usage")
                        .and_then(|u| u.get("input_tokens"))
                        .and_then(|t| t.as_u64())
                        .map(|t| t as u32),
                    output_tokens: output as u32,
                })));
            }
            Ok(Interpretation::Skip)
        }
        "message_stop" => Ok(Interpretation::End),
        // message_start, content_block_stop, ping
        _ => Ok(Interpretation::Skip),
    }
}
