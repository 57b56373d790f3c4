//! AWS Bedrock provider implementation.
//!
//! Bedrock is called over raw SigV4-signed HTTP instead of the AWS SDK:
//! `invoke` for single-shot chat and `invoke-with-response-stream` for
//! streaming. Streaming responses arrive in the binary
//! `application/vnd.amazon.eventstream` framing, which is decoded and
//! bridged to SSE before a model-family adapter turns the inner deltas into
//! canonical chunks. Claude models share the Anthropic delta schema; Nova
//! models use their own (`contentBlockDelta` and friends).

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use super::adapter::{AdapterCore, Interpretation};
use super::anthropic::{self, AnthropicChunkStream};
use super::sigv4::{resolve_credentials, sign_request};
use crate::eventstream::{EventStreamDecoder, EventStreamToSse};
use crate::llm::traits::{
    ChatConfig, ChatResponse, HealthStatus, LlmError, LlmProvider, ProviderCapabilities,
    ProviderType, Tool, ToolCall, Usage,
};
use crate::sse::{SseEvent, SseSource};
use crate::streaming::{ChunkStream, FinishReason, StreamChunk, StreamError, UsageSnapshot};
use crate::types::{ContentBlock, MessageRole, Messages};

const SERVICE: &str = "bedrock";

/// Model families with distinct request and delta schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModelFamily {
    Claude,
    Nova,
}

impl ModelFamily {
    fn for_model(model_id: &str) -> Result<Self, LlmError> {
        if model_id.contains("anthropic.claude") {
            Ok(ModelFamily::Claude)
        } else if model_id.contains("amazon.nova") {
            Ok(ModelFamily::Nova)
        } else {
            Err(LlmError::ModelNotFound {
                model_id: model_id.to_string(),
                provider: ProviderType::Bedrock,
            })
        }
    }
}

/// AWS Bedrock provider.
#[derive(Debug)]
pub struct BedrockProvider {
    region: String,
    profile: Option<String>,
    client: reqwest::Client,
}

impl BedrockProvider {
    pub fn new(region: Option<String>, profile: Option<String>) -> Result<Self, LlmError> {
        Ok(Self {
            region: region.unwrap_or_else(|| "us-east-1".to_string()),
            profile,
            client: reqwest::Client::new(),
        })
    }

    fn endpoint(&self, model_id: &str, action: &str) -> String {
        format!(
            "https://bedrock-runtime.{}.amazonaws.com/model/{}/{}",
            self.region, model_id, action
        )
    }

    fn build_request_body(
        &self,
        family: ModelFamily,
        messages: &Messages,
        tools: &[Tool],
        config: &ChatConfig,
    ) -> Result<String, LlmError> {
        let body = match family {
            ModelFamily::Claude => build_claude_request(messages, tools, config),
            ModelFamily::Nova => build_nova_request(messages, tools, config),
        };
        serde_json::to_string(&body).map_err(|e| LlmError::SerializationError {
            message: format!("Failed to serialize Bedrock request: {}", e),
        })
    }

    /// Sign and send one POST. Signing happens against the exact body
    /// bytes that go on the wire.
    async fn signed_post(
        &self,
        url: &str,
        body: String,
        accept: &str,
    ) -> Result<reqwest::Response, LlmError> {
        let credentials = resolve_credentials(self.profile.as_deref()).await?;

        let host = url
            .strip_prefix("https://")
            .and_then(|rest| rest.split('/').next())
            .unwrap_or_default()
            .to_string();
        let headers = vec![
            ("host".to_string(), host),
            ("content-type".to_string(), "application/json".to_string()),
            ("accept".to_string(), accept.to_string()),
        ];
        let signed = sign_request(
            "POST",
            url,
            &headers,
            body.as_bytes(),
            &credentials,
            &self.region,
            SERVICE,
        )?;

        let mut request = self.client.post(url).body(body);
        for (name, value) in signed {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|e| LlmError::NetworkError {
            message: format!("Bedrock request failed: {}", e),
            source: Some(Box::new(e)),
        })?;

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
impl LlmProvider for BedrockProvider {
    async fn chat(
        &self,
        model_id: &str,
        messages: &Messages,
        tools: &[Tool],
        config: &ChatConfig,
    ) -> Result<ChatResponse, LlmError> {
        let operation_id = Uuid::new_v4();
        let family = ModelFamily::for_model(model_id)?;
        tracing::info!(
            "[{}] 🚀 Bedrock invoke for model: {} ({:?})",
            operation_id,
            model_id,
            family
        );

        let body = self.build_request_body(family, messages, tools, config)?;
        tracing::debug!("[{}] request body: {} bytes", operation_id, body.len());

        let response = self
            .signed_post(&self.endpoint(model_id, "invoke"), body, "application/json")
            .await?;

        let response_json: Value = response.json().await.map_err(|e| LlmError::ProviderError {
            provider: ProviderType::Bedrock,
            message: format!("Failed to parse Bedrock response: {}", e),
            source: Some(Box::new(e)),
        })?;

        match family {
            ModelFamily::Claude => anthropic::parse_chat_response(&response_json),
            ModelFamily::Nova => parse_nova_response(&response_json),
        }
    }

    async fn chat_streaming(
        &self,
        model_id: &str,
        messages: &Messages,
        tools: &[Tool],
        config: &ChatConfig,
    ) -> Result<Box<dyn ChunkStream>, LlmError> {
        let family = ModelFamily::for_model(model_id)?;
        tracing::info!("🌊 Bedrock streaming request for model: {}", model_id);

        let body = self.build_request_body(family, messages, tools, config)?;
        let response = self
            .signed_post(
                &self.endpoint(model_id, "invoke-with-response-stream"),
                body,
                "application/vnd.amazon.eventstream",
            )
            .await?;

        let transform = EventStreamToSse::new(EventStreamDecoder::from_response(response));
        let stream: Box<dyn ChunkStream> = match family {
            ModelFamily::Claude => Box::new(AnthropicChunkStream::new(transform)),
            ModelFamily::Nova => Box::new(NovaChunkStream::new(transform)),
        };
        Ok(stream)
    }

    async fn health_check(&self) -> Result<HealthStatus, LlmError> {
        // Credential resolution is the part that fails in practice; probing
        // a model would bill tokens.
        let start = std::time::Instant::now();
        match resolve_credentials(self.profile.as_deref()).await {
            Ok(_) => Ok(HealthStatus {
                healthy: true,
                provider: ProviderType::Bedrock,
                latency_ms: Some(start.elapsed().as_millis() as u64),
                error: None,
            }),
            Err(e) => Ok(HealthStatus {
                healthy: false,
                provider: ProviderType::Bedrock,
                latency_ms: None,
                error: Some(e.to_string()),
            }),
        }
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_streaming: true,
            supports_tools: true,
            max_tokens: Some(200000),
            available_models: self
                .supported_models()
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Bedrock
    }

    fn supported_models(&self) -> Vec<&'static str> {
        vec![
            "us.anthropic.claude-3-5-haiku-20241022-v1:0",
            "us.anthropic.claude-3-5-sonnet-20241022-v2:0",
            "us.anthropic.claude-3-opus-20240229-v1:0",
            "us.amazon.nova-lite-v1:0",
            "us.amazon.nova-pro-v1:0",
            "us.amazon.nova-micro-v1:0",
        ]
    }
}

/// Claude over Bedrock: Messages API schema with the Bedrock version tag
/// instead of a model field.
fn build_claude_request(messages: &Messages, tools: &[Tool], config: &ChatConfig) -> Value {
    let (converted, system) = convert_messages_claude(messages);
    let mut body = json!({
        "anthropic_version": "bedrock-2023-05-31",
        "max_tokens": config.max_tokens.unwrap_or(4096),
        "messages": converted,
    });
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
        body["tool_choice"] = json!({"type": "auto"});
    }
    for (key, value) in &config.additional_params {
        body[key] = value.clone();
    }
    body
}

fn convert_messages_claude(messages: &Messages) -> (Vec<Value>, Option<String>) {
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
                            content.push(json!({
                                "type": "tool_use",
                                "id": id,
                                "name": name,
                                "input": if input.is_object() { input.clone() } else { json!({}) },
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
                                "content": [{"type": "text", "text": result}],
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

/// Nova: messages-v1 schema with camelCase field names and wrapped tool
/// structures.
fn build_nova_request(messages: &Messages, tools: &[Tool], config: &ChatConfig) -> Value {
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
                            content.push(json!({"text": text}));
                        }
                        ContentBlock::ToolUse { id, name, input } => {
                            content.push(json!({
                                "toolUse": {
                                    "toolUseId": id,
                                    "name": name,
                                    "input": if input.is_object() { input.clone() } else { json!({}) },
                                }
                            }));
                        }
                        ContentBlock::ToolResult {
                            tool_use_id,
                            content: result,
                            is_error,
                        } => {
                            content.push(json!({
                                "toolResult": {
                                    "toolUseId": tool_use_id,
                                    "content": [{"text": result}],
                                    "status": if *is_error { "error" } else { "success" },
                                }
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

    let mut body = json!({
        "schemaVersion": "messages-v1",
        "messages": converted,
        "inferenceConfig": {
            "maxTokens": config.max_tokens.unwrap_or(2048),
        }
    });
    if let Some(system) = system {
        body["system"] = json!([{"text": system}]);
    }
    if let Some(temperature) = config.temperature {
        body["inferenceConfig"]["temperature"] = json!(temperature);
    }
    if !tools.is_empty() {
        body["toolConfig"] = json!({
            "tools": tools
                .iter()
                .map(|tool| {
                    json!({
                        "toolSpec": {
                            "name": tool.name,
                            "description": tool.description,
                            "inputSchema": {"json": tool.input_schema},
                        }
                    })
                })
                .collect::<Vec<_>>(),
            "toolChoice": {"auto": {}},
        });
    }
    body
}

/// Parse a non-streaming Nova response: `output.message.content` plus
/// top-level usage and stop reason.
fn parse_nova_response(response: &Value) -> Result<ChatResponse, LlmError> {
    let mut content = String::new();
    let mut tool_calls = Vec::new();

    let output = response
        .get("output")
        .ok_or_else(|| LlmError::ProviderError {
            provider: ProviderType::Bedrock,
            message: "Invalid Nova response: missing output".to_string(),
            source: None,
        })?;

    if let Some(blocks) = output
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_array())
    {
        for block in blocks {
            if let Some(text) = block.get("text").and_then(|t| t.as_str()) {
                if !content.is_empty() {
                    content.push(' ');
                }
                content.push_str(text);
            } else if let Some(tool_use) = block.get("toolUse") {
                tool_calls.push(ToolCall {
                    id: tool_use
                        .get("toolUseId")
                        .and_then(|i| i.as_str())
                        .unwrap_or("")
                        .to_string(),
                    name: tool_use
                        .get("name")
                        .and_then(|n| n.as_str())
                        .unwrap_or("")
                        .to_string(),
                    arguments: tool_use
                        .get("input")
                        .cloned()
                        .unwrap_or_else(|| json!({})),
                });
            }
        }
    }

    let usage = response.get("usage").and_then(|u| {
        Some(Usage {
            input_tokens: u.get("inputTokens")?.as_u64()? as u32,
            output_tokens: u.get("outputTokens")?.as_u64()? as u32,
            total_tokens: u.get("totalTokens")?.as_u64()? as u32,
        })
    });

    let mut metadata = std::collections::HashMap::new();
    if let Some(stop_reason) = response.get("stopReason") {
        metadata.insert("stop_reason".to_string(), stop_reason.clone());
    }

    Ok(ChatResponse {
        content,
        tool_calls,
        usage,
        metadata,
    })
}

/// Map a non-200 response through the Bedrock error envelope
/// (`{"message": ...}`).
fn parse_error_envelope(status: reqwest::StatusCode, body: &str) -> LlmError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message")?.as_str().map(|s| s.to_string()))
        .unwrap_or_else(|| body.to_string());
    LlmError::from_error_response(ProviderType::Bedrock, status, &message)
}

/// Canonical-chunk adapter for the Nova streaming delta schema.
pub struct NovaChunkStream<S> {
    core: AdapterCore<S>,
}

impl<S: SseSource> NovaChunkStream<S> {
    pub fn new(source: S) -> Self {
        Self {
            core: AdapterCore::new(source),
        }
    }
}

#[async_trait]
impl<S: SseSource> ChunkStream for NovaChunkStream<S> {
    async fn next_chunk(&mut self) -> Result<Option<StreamChunk>, StreamError> {
        self.core.next_with(interpret_nova_delta).await
    }

    fn close(&mut self) {
        self.core.close();
    }
}

fn interpret_nova_delta(_event: &SseEvent, json: &Value) -> Result<Interpretation, StreamError> {
    if let Some(text) = json
        .get("contentBlockDelta")
        .and_then(|d| d.get("delta"))
        .and_then(|d| d.get("text"))
        .and_then(|t| t.as_str())
    {
        if !text.is_empty() {
            return Ok(Interpretation::Chunk(StreamChunk::Text {
                content: text.to_string(),
            }));
        }
        return Ok(Interpretation::Skip);
    }

    if let Some(tool_use) = json
        .get("contentBlockStart")
        .and_then(|s| s.get("start"))
        .and_then(|s| s.get("toolUse"))
    {
        return Ok(Interpretation::Chunk(StreamChunk::ToolCall(ToolCall {
            id: tool_use
                .get("toolUseId")
                .and_then(|i| i.as_str())
                .unwrap_or("")
                .to_string(),
            name: tool_use
                .get("name")
                .and_then(|n| n.as_str())
                .unwrap_or("")
                .to_string(),
            arguments: tool_use.get("input").cloned().unwrap_or_else(|| json!({})),
        })));
    }

    if let Some(stop) = json.get("messageStop") {
        return match stop.get("stopReason").and_then(|r| r.as_str()) {
            Some(reason) => Ok(Interpretation::Chunk(StreamChunk::Finish {
                reason: FinishReason::from_provider(reason),
            })),
            None => Ok(Interpretation::End),
        };
    }

    if let Some(usage) = json.get("metadata").and_then(|m| m.get("usage")) {
        if let Some(output) = usage.get("outputTokens").and_then(|t| t.as_u64()) {
            return Ok(Interpretation::Chunk(StreamChunk::Usage(UsageSnapshot {
                input_tokens: usage
                    .get("inputTokens")
                    .and_then(|t| t.as_u64())
                    .map(|t| t as u32),
                output_tokens: output as u32,
            })));
        }
    }

    Ok(Interpretation::Skip)
}
