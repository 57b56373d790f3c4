//! OpenRouter provider implementation.
//!
//! OpenRouter is an OpenAI-compatible multi-provider proxy; only the base
//! URL, auth and model catalog differ.

use async_trait::async_trait;

use super::openai::OpenAiProvider;
use crate::llm::traits::{
    ChatConfig, ChatResponse, HealthStatus, LlmError, LlmProvider, ProviderCapabilities,
    ProviderType, Tool,
};
use crate::streaming::ChunkStream;
use crate::types::Messages;

/// OpenRouter provider.
#[derive(Debug)]
pub struct OpenRouterProvider {
    inner: OpenAiProvider,
}

impl OpenRouterProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Result<Self, LlmError> {
        Ok(Self {
            inner: OpenAiProvider::compatible(
                ProviderType::OpenRouter,
                base_url.unwrap_or_else(|| "https://openrouter.ai/api".to_string()),
                Some(api_key),
            ),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenRouterProvider {
    async fn chat(
        &self,
        model_id: &str,
        messages: &Messages,
        tools: &[Tool],
        config: &ChatConfig,
    ) -> Result<ChatResponse, LlmError> {
        self.inner.chat(model_id, messages, tools, config).await
    }

    async fn chat_streaming(
        &self,
        model_id: &str,
        messages: &Messages,
        tools: &[Tool],
        config: &ChatConfig,
    ) -> Result<Box<dyn ChunkStream>, LlmError> {
        self.inner
            .chat_streaming(model_id, messages, tools, config)
            .await
    }

    async fn health_check(&self) -> Result<HealthStatus, LlmError> {
        self.inner.health_check().await
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            supports_streaming: true,
            supports_tools: true,
            max_tokens: None,
            available_models: self
                .supported_models()
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::OpenRouter
    }

    fn supported_models(&self) -> Vec<&'static str> {
        vec![
            "anthropic/claude-3.5-sonnet",
            "openai/gpt-4o",
            "meta-llama/llama-3.1-70b-instruct",
        ]
    }
}
