//! Ollama provider implementation.
//!
//! Connects to a local Ollama instance through its OpenAI-compatible `/v1`
//! endpoint, which streams SSE like every other compatible backend.

use async_trait::async_trait;

use super::openai::OpenAiProvider;
use crate::llm::traits::{
    ChatConfig, ChatResponse, EmbeddingResponse, HealthStatus, LlmError, LlmProvider,
    ProviderCapabilities, ProviderType, Tool,
};
use crate::streaming::ChunkStream;
use crate::types::Messages;

/// Ollama provider.
#[derive(Debug)]
pub struct OllamaProvider {
    inner: OpenAiProvider,
}

impl OllamaProvider {
    pub fn new(base_url: String) -> Result<Self, LlmError> {
        Ok(Self {
            inner: OpenAiProvider::compatible(ProviderType::Ollama, base_url, None),
        })
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
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

    async fn embed(
        &self,
        model_id: &str,
        texts: &[String],
    ) -> Result<EmbeddingResponse, LlmError> {
        self.inner.embed(model_id, texts).await
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
        ProviderType::Ollama
    }

    fn supported_models(&self) -> Vec<&'static str> {
        vec!["llama3.2", "llama3.1", "mistral", "codellama"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_its_own_provider_type() {
        let provider = OllamaProvider::new("http://localhost:11434".into()).unwrap();
        assert_eq!(provider.provider_type(), ProviderType::Ollama);
    }
}
