//! OpenAI provider implementation.
//!
//! This provider speaks the OpenAI chat-completions API and doubles as the
//! shared core for every OpenAI-compatible backend (OpenRouter, LM Studio,
//! Ollama's `/v1` endpoint): those providers construct it with their own
//! base URL and provider type and inherit request formatting, response
//! parsing and the streaming delta schema.

use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

use super::adapter::{AdapterCore, Interpretation};
use crate::llm::traits::{
    ChatConfig, ChatResponse, EmbeddingResponse, HealthStatus, LlmError, LlmProvider,
    ProviderCapabilities, ProviderType, Tool, ToolCall, Usage,
};
use crate::sse::{SseEvent, SseParser, SseSource};
use crate::streaming::{ChunkStream, FinishReason, StreamChunk, StreamError, UsageSnapshot};
use crate::types::{ContentBlock, MessageRole, Messages};

/// OpenAI chat-completions provider.
#[derive(Debug)]
pub struct OpenAiProvider {
    api_key: Option<String>,
    organization: Option<String>,
    base_url: String,
    client: reqwest::Client,
    provider_type: ProviderType,
}

impl OpenAiProvider {
    /// Create a provider against api.openai.com.
    pub fn new(
        api_key: String,
        organization: Option<String>,
        base_url: Option<String>,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            api_key: Some(api_key),
            organization,
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com".to_string()),
            client: reqwest::Client::new(),
            provider_type: ProviderType::OpenAI,
        })
    }

    /// Create a core for an OpenAI-compatible backend under another name.
    pub(crate) fn compatible(
        provider_type: ProviderType,
        base_url: String,
        api_key: Option<String>,
    ) -> Self {
        Self {
            api_key,
            organization: None,
            base_url,
            client: reqwest::Client::new(),
            provider_type,
        }
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Content-Type", "application/json");
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        if let Some(org) = &self.organization {
            builder = builder.header("OpenAI-Organization", org);
        }
        builder
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
            body["tool_choice"] = json!("auto");
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
        Err(parse_error_envelope(self.provider_type, status, &body))
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    async fn chat(
        &self,
        model_id: &str,
        messages: &Messages,
        tools: &[Tool],
        config: &ChatConfig,
    ) -> Result<ChatResponse, LlmError> {
        let operation_id = Uuid::new_v4();
        tracing::info!(
            "[{}] {} chat request for model: {}",
            operation_id,
            self.provider_type,
            model_id
        );

        let body = self.build_request_body(model_id, messages, tools, config, false);
        tracing::debug!(
            "[{}] request body: {}",
            operation_id,
            serde_json::to_string(&body).unwrap_or_else(|_| "<invalid>".to_string())
        );

        let response = self
            .request("/v1/chat/completions")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError {
                message: format!("{} request failed: {}", self.provider_type, e),
                source: Some(Box::new(e)),
            })?;
        let response = self.check_status(response).await?;

        let response_json: Value = response.json().await.map_err(|e| LlmError::ProviderError {
            provider: self.provider_type,
            message: format!("failed to parse response JSON: {}", e),
            source: Some(Box::new(e)),
        })?;
        tracing::debug!(
            "[{}] response: {}",
            operation_id,
            serde_json::to_string(&response_json).unwrap_or_else(|_| "<invalid>".to_string())
        );

        parse_chat_response(self.provider_type, &response_json)
    }

    async fn chat_streaming(
        &self,
        model_id: &str,
        messages: &Messages,
        tools: &[Tool],
        config: &ChatConfig,
    ) -> Result<Box<dyn ChunkStream>, LlmError> {
        tracing::info!(
            "🌊 {} streaming request for model: {}",
            self.provider_type,
            model_id
        );

        let body = self.build_request_body(model_id, messages, tools, config, true);
        let response = self
            .request("/v1/chat/completions")
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError {
                message: format!("{} streaming request failed: {}", self.provider_type, e),
                source: Some(Box::new(e)),
            })?;
        let response = self.check_status(response).await?;

        Ok(Box::new(OpenAiChunkStream::new(SseParser::from_response(
            response,
        ))))
    }

    async fn embed(
        &self,
        model_id: &str,
        texts: &[String],
    ) -> Result<EmbeddingResponse, LlmError> {
        tracing::info!(
            "{} embedding request for {} texts with model: {}",
            self.provider_type,
            texts.len(),
            model_id
        );

        let body = json!({"model": model_id, "input": texts});
        let response = self
            .request("/v1/embeddings")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::NetworkError {
                message: format!("{} embedding request failed: {}", self.provider_type, e),
                source: Some(Box::new(e)),
            })?;
        let response = self.check_status(response).await?;

        let response_json: Value = response.json().await.map_err(|e| LlmError::ProviderError {
            provider: self.provider_type,
            message: format!("failed to parse embedding response: {}", e),
            source: Some(Box::new(e)),
        })?;
        parse_embedding_response(self.provider_type, &response_json)
    }

    async fn health_check(&self) -> Result<HealthStatus, LlmError> {
        let start = std::time::Instant::now();
        let mut builder = self.client.get(format!("{}/v1/models", self.base_url));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let result = builder.send().await;
        let latency = start.elapsed().as_millis() as u64;

        match result {
            Ok(response) if response.status().is_success() => Ok(HealthStatus {
                healthy: true,
                provider: self.provider_type,
                latency_ms: Some(latency),
                error: None,
            }),
            Ok(response) => Ok(HealthStatus {
                healthy: false,
                provider: self.provider_type,
                latency_ms: Some(latency),
                error: Some(format!("HTTP {}", response.status())),
            }),
            Err(e) => Ok(HealthStatus {
                healthy: false,
                provider: self.provider_type,
                latency_ms: None,
                error: Some(format!("Connection failed: {}", e)),
            }),
        }
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_streaming: true,
            supports_tools: true,
            max_tokens: Some(16384),
            available_models: self
                .supported_models()
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }

    fn provider_type(&self) -> ProviderType {
        self.provider_type
    }

    fn supported_models(&self) -> Vec<&'static str> {
        vec!["gpt-4o", "gpt-4o-mini", "gpt-4-turbo", "gpt-3.5-turbo"]
    }
}

/// Convert the shared conversation model to OpenAI chat-completions format.
fn convert_messages(messages: &Messages) -> Vec<Value> {
    let mut converted = Vec::new();

    for message in &messages.messages {
        let role = match message.role {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        };

        let mut content_parts = Vec::new();
        let mut tool_calls = Vec::new();
        let mut tool_results = Vec::new();

        for block in &message.content {
            match block {
                ContentBlock::Text { text } => content_parts.push(text.clone()),
                ContentBlock::ToolUse { id, name, input } => {
                    let arguments = if input.is_object() {
                        serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string())
                    } else {
                        "{}".to_string()
                    };
                    tool_calls.push(json!({
                        "id": id,
                        "type": "function",
                        "function": { "name": name, "arguments": arguments }
                    }));
                }
                ContentBlock::ToolResult {
                    tool_use_id,
                    content,
                    ..
                } => {
                    // Tool results become their own `tool` messages.
                    tool_results.push(json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": content,
                    }));
                }
            }
        }

        let content = content_parts.join(" ");
        if !content.is_empty() || !tool_calls.is_empty() {
            let mut entry = json!({
                "role": role,
                "content": if content.is_empty() { Value::Null } else { json!(content) },
            });
            if !tool_calls.is_empty() {
                entry["tool_calls"] = Value::Array(tool_calls);
            }
            converted.push(entry);
        }
        converted.extend(tool_results);
    }

    converted
}

/// Parse a non-streaming chat-completions response.
fn parse_chat_response(
    provider: ProviderType,
    response: &Value,
) -> Result<ChatResponse, LlmError> {
    let first_choice = response
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| LlmError::ProviderError {
            provider,
            message: "Invalid response format: missing choices array".to_string(),
            source: None,
        })?;
    let message = first_choice
        .get("message")
        .ok_or_else(|| LlmError::ProviderError {
            provider,
            message: "Invalid response format: missing message".to_string(),
            source: None,
        })?;

    let content = message
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string();

    let mut tool_calls = Vec::new();
    if let Some(calls) = message.get("tool_calls").and_then(|tc| tc.as_array()) {
        for (index, call) in calls.iter().enumerate() {
            if let Some(tool_call) = parse_tool_call(call, index) {
                tool_calls.push(tool_call);
            }
        }
    }

    let usage = response.get("usage").and_then(|u| {
        Some(Usage {
            input_tokens: u.get("prompt_tokens")?.as_u64()? as u32,
            output_tokens: u.get("completion_tokens")?.as_u64()? as u32,
            total_tokens: u.get("total_tokens")?.as_u64()? as u32,
        })
    });

    let mut metadata = std::collections::HashMap::new();
    if let Some(finish_reason) = first_choice.get("finish_reason") {
        metadata.insert("finish_reason".to_string(), finish_reason.clone());
    }
    if let Some(model) = response.get("model") {
        metadata.insert("model".to_string(), model.clone());
    }

    Ok(ChatResponse {
        content,
        tool_calls,
        usage,
        metadata,
    })
}

/// Build a [`ToolCall`] from an OpenAI tool-call object, streaming or not.
///
/// Arguments arrive as a JSON-encoded string; a string that fails to parse
/// is kept as-is rather than dropped.
fn parse_tool_call(call: &Value, index: usize) -> Option<ToolCall> {
    let function = call.get("function")?;
    let name = function.get("name").and_then(|n| n.as_str())?;
    let id = call
        .get("id")
        .and_then(|i| i.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("tool_call_{}", index));

    let arguments = match function.get("arguments") {
        Some(Value::String(s)) if !s.is_empty() => {
            serde_json::from_str(s).unwrap_or_else(|parse_err| {
                tracing::warn!(
                    "failed to parse tool arguments as JSON: {} | raw: {}",
                    parse_err,
                    s
                );
                Value::String(s.clone())
            })
        }
        Some(value @ Value::Object(_)) => value.clone(),
        _ => Value::Object(serde_json::Map::new()),
    };

    Some(ToolCall {
        id,
        name: name.to_string(),
        arguments,
    })
}

/// Parse an embeddings response: one vector per `data` entry, input order.
fn parse_embedding_response(
    provider: ProviderType,
    response: &Value,
) -> Result<EmbeddingResponse, LlmError> {
    let data = response
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| LlmError::ProviderError {
            provider,
            message: "Invalid embedding response: missing data array".to_string(),
            source: None,
        })?;

    let mut embeddings = Vec::with_capacity(data.len());
    for entry in data {
        let vector = entry
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| LlmError::ProviderError {
                provider,
                message: "Invalid embedding response: missing embedding vector".to_string(),
                source: None,
            })?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();
        embeddings.push(vector);
    }

    let usage = response
        .get("usage")
        .and_then(|u| u.get("prompt_tokens"))
        .and_then(|t| t.as_u64())
        .map(|input| Usage::new(input as u32, 0));

    Ok(EmbeddingResponse { embeddings, usage })
}

/// Map a non-200 response through the OpenAI error envelope
/// (`{"error": {"message": ...}}`).
fn parse_error_envelope(
    provider: ProviderType,
    status: reqwest::StatusCode,
    body: &str,
) -> LlmError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")?
                .get("message")?
                .as_str()
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| body.to_string());
    LlmError::from_error_response(provider, status, &message)
}

/// Canonical-chunk adapter for the OpenAI streaming delta schema, shared by
/// every OpenAI-compatible backend.
pub struct OpenAiChunkStream<S> {
    core: AdapterCore<S>,
}

impl<S: SseSource> OpenAiChunkStream<S> {
    pub fn new(source: S) -> Self {
        Self {
            core: AdapterCore::new(source),
        }
    }
}

#[async_trait]
impl<S: SseSource> ChunkStream for OpenAiChunkStream<S> {
    async fn next_chunk(&mut self) -> Result<Option<StreamChunk>, StreamError> {
        self.core.next_with(interpret_delta).await
    }

    fn close(&mut self) {
        self.core.close();
    }
}

/// Interpret one chat-completions delta record.
///
/// Recognition precedence: text delta, then tool call, then finish reason,
/// then usage.
fn interpret_delta(_event: &SseEvent, json: &Value) -> Result<Interpretation, StreamError> {
    // Compatible servers surface mid-stream failures as an error object.
    if let Some(error) = json.get("error") {
        return Err(StreamError::upstream(error.to_string()));
    }

    if let Some(choice) = json
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
    {
        if let Some(delta) = choice.get("delta") {
            if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
                if !text.is_empty() {
                    return Ok(Interpretation::Chunk(StreamChunk::Text {
                        content: text.to_string(),
                    }));
                }
            }
            if let Some(call) = delta
                .get("tool_calls")
                .and_then(|tc| tc.as_array())
                .and_then(|tc| tc.first())
            {
                let index = call.get("index").and_then(|i| i.as_u64()).unwrap_or(0) as usize;
                if let Some(tool_call) = parse_tool_call(call, index) {
                    return Ok(Interpretation::Chunk(StreamChunk::ToolCall(tool_call)));
                }
            }
        }
        if let Some(reason) = choice.get("finish_reason").and_then(|r| r.as_str()) {
            return Ok(Interpretation::Chunk(StreamChunk::Finish {
                reason: FinishReason::from_provider(reason),
            }));
        }
    }

    if let Some(usage) = json.get("usage") {
        if let Some(output) = usage.get("completion_tokens").and_then(|t| t.as_u64()) {
            return Ok(Interpretation::Chunk(StreamChunk::Usage(UsageSnapshot {
                input_tokens: usage
                    .get("prompt_tokens")
                    .and_then(|t| t.as_u64())
                    .map(|t| t as u32),
                output_tokens: output as u32,
            })));
        }
    }

    Ok(Interpretation::Skip)
}
