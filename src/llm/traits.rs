//! Core traits for the provider abstraction layer.
//!
//! Every backend implements [`LlmProvider`]: it owns request formatting,
//! response parsing, error-envelope handling and streaming for its API.
//! Streaming always returns the canonical [`ChunkStream`] contract from
//! [`crate::streaming`], regardless of what the backend speaks on the wire.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::streaming::{ChunkStream, StreamError};
use crate::types::Messages;

/// Core provider trait abstracting away backend-specific implementations.
///
/// Providers own ALL implementation details. Models are passed as model_id
/// strings; nothing here validates model/provider pairings beyond what the
/// backend itself rejects.
#[async_trait]
pub trait LlmProvider: Send + Sync + std::fmt::Debug {
    /// Single-shot chat completion. Pass an empty `tools` slice when tool
    /// use is not wanted.
    async fn chat(
        &self,
        model_id: &str,
        messages: &Messages,
        tools: &[Tool],
        config: &ChatConfig,
    ) -> Result<ChatResponse, LlmError>;

    /// Streaming chat. The returned stream exclusively owns the HTTP
    /// response body; drive it with `next_chunk()` until `Ok(None)`.
    async fn chat_streaming(
        &self,
        model_id: &str,
        messages: &Messages,
        tools: &[Tool],
        config: &ChatConfig,
    ) -> Result<Box<dyn ChunkStream>, LlmError>;

    /// Embed a batch of texts. Providers without an embedding endpoint
    /// return `UnsupportedFeature`.
    async fn embed(
        &self,
        model_id: &str,
        texts: &[String],
    ) -> Result<EmbeddingResponse, LlmError> {
        let _ = (model_id, texts);
        Err(LlmError::UnsupportedFeature {
            feature: "embeddings".to_string(),
            provider: self.provider_type(),
        })
    }

    /// Rerank documents against a query. Providers without a rerank
    /// endpoint return `UnsupportedFeature`.
    async fn rerank(
        &self,
        model_id: &str,
        query: &str,
        documents: &[String],
    ) -> Result<RerankResponse, LlmError> {
        let _ = (model_id, query, documents);
        Err(LlmError::UnsupportedFeature {
            feature: "rerank".to_string(),
            provider: self.provider_type(),
        })
    }

    /// Cheap connectivity probe.
    async fn health_check(&self) -> Result<HealthStatus, LlmError>;

    /// Provider-specific capabilities.
    fn capabilities(&self) -> ProviderCapabilities;

    /// Get provider type.
    fn provider_type(&self) -> ProviderType;

    /// Model IDs known to work with this provider.
    fn supported_models(&self) -> Vec<&'static str>;
}

/// Supported backend families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderType {
    /// AWS Bedrock over raw signed HTTP
    Bedrock,
    /// OpenAI chat-completions API
    OpenAI,
    /// Anthropic Messages API
    Anthropic,
    /// Cohere v2 chat API
    Cohere,
    /// OpenRouter (OpenAI-compatible proxy)
    OpenRouter,
    /// LM Studio local server (OpenAI-compatible)
    LmStudio,
    /// Ollama local server (OpenAI-compatible endpoint)
    Ollama,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Bedrock => "bedrock",
            ProviderType::OpenAI => "openai",
            ProviderType::Anthropic => "anthropic",
            ProviderType::Cohere => "cohere",
            ProviderType::OpenRouter => "openrouter",
            ProviderType::LmStudio => "lm_studio",
            ProviderType::Ollama => "ollama",
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Provider-agnostic request configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Temperature for model responses (0.0 to 1.0)
    pub temperature: Option<f32>,
    /// Maximum tokens in model response
    pub max_tokens: Option<u32>,
    /// Additional model-specific parameters merged into the request body
    #[serde(default)]
    pub additional_params: HashMap<String, serde_json::Value>,
}

/// Response from a single-shot chat call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    /// Response content
    pub content: String,
    /// Tool calls if any
    pub tool_calls: Vec<ToolCall>,
    /// Usage statistics
    pub usage: Option<Usage>,
    /// Provider-specific metadata (stop reason, model, request id, ...)
    pub metadata: HashMap<String, serde_json::Value>,
}

/// A fully-resolved tool invocation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this call
    pub id: String,
    /// Name of the tool to call
    pub name: String,
    /// Arguments as a JSON object
    pub arguments: serde_json::Value,
}

/// Tool definition advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Usage statistics for a completed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// Response from an embedding call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    /// One vector per input text, in input order
    pub embeddings: Vec<Vec<f32>>,
    pub usage: Option<Usage>,
}

/// One reranked document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RerankResult {
    /// Index into the input document list
    pub index: usize,
    pub relevance_score: f64,
}

/// Response from a rerank call, ordered by descending relevance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankResponse {
    pub results: Vec<RerankResult>,
}

/// Health status reported by a provider probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub provider: ProviderType,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
}

/// Provider capabilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderCapabilities {
    pub supports_streaming: bool,
    pub supports_tools: bool,
    pub max_tokens: Option<u32>,
    pub available_models: Vec<String>,
}

/// Provider-level error types.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider error: {message}")]
    ProviderError {
        provider: ProviderType,
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Model not found: {model_id}")]
    ModelNotFound {
        model_id: String,
        provider: ProviderType,
    },

    #[error("Authentication failed for provider {provider:?}")]
    AuthenticationError { provider: ProviderType },

    #[error("Rate limit exceeded for provider {provider:?}")]
    RateLimitError {
        provider: ProviderType,
        retry_after: Option<u64>,
    },

    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    #[error("Network error: {message}")]
    NetworkError {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Serialization error: {message}")]
    SerializationError { message: String },

    #[error("Stream error: {0}")]
    StreamError(#[from] StreamError),

    #[error("Unsupported feature: {feature} for provider {provider:?}")]
    UnsupportedFeature {
        feature: String,
        provider: ProviderType,
    },
}

impl LlmError {
    /// Map a non-200 HTTP status plus response body into the right variant.
    ///
    /// Each provider formats its error envelope differently, but status
    /// classes carry the same meaning everywhere.
    pub fn from_error_response(
        provider: ProviderType,
        status: reqwest::StatusCode,
        body: &str,
    ) -> Self {
        match status.as_u16() {
            401 | 403 => LlmError::AuthenticationError { provider },
            429 => LlmError::RateLimitError {
                provider,
                retry_after: None,
            },
            404 => LlmError::ModelNotFound {
                model_id: body.to_string(),
                provider,
            },
            _ => LlmError::ProviderError {
                provider,
                message: format!("API error {}: {}", status, body),
                source: None,
            },
        }
    }
}
