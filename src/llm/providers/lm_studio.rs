//! LM Studio provider implementation.
//!
//! A thin OpenAI-compatible wrapper around a local LM Studio instance.
//! Single-shot chat goes through retry with backoff: a 502/503 from LM
//! Studio usually means the model is still loading.

use async_trait::async_trait;
use std::sync::Arc;

use super::openai::OpenAiProvider;
use super::retry::{retry_llm_operation, BoxFuture, RetryConfig};
use crate::llm::traits::{
    ChatConfig, ChatResponse, EmbeddingResponse, HealthStatus, LlmError, LlmProvider,
    ProviderCapabilities, ProviderType, Tool,
};
use crate::streaming::ChunkStream;
use crate::types::Messages;

/// LM Studio provider.
#[derive(Debug)]
pub struct LmStudioProvider {
    inner: Arc<OpenAiProvider>,
    retry_config: RetryConfig,
}

impl LmStudioProvider {
    /// Create a provider with the default retry configuration.
    pub fn new(base_url: String) -> Result<Self, LlmError> {
        Self::with_retry_config(base_url, RetryConfig::local_server_default())
    }

    pub fn with_retry_config(
        base_url: String,
        retry_config: RetryConfig,
    ) -> Result<Self, LlmError> {
        Ok(Self {
            inner: Arc::new(OpenAiProvider::compatible(
                ProviderType::LmStudio,
                base_url,
                None,
            )),
            retry_config,
        })
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry_config
    }
}

#[async_trait]
impl LlmProvider for LmStudioProvider {
    async fn chat(
        &self,
        model_id: &str,
        messages: &Messages,
        tools: &[Tool],
        config: &ChatConfig,
    ) -> Result<ChatResponse, LlmError> {
        let inner = Arc::clone(&self.inner);
        let model_id = model_id.to_string();
        let messages = messages.clone();
        let tools = tools.to_vec();
        let config = config.clone();

        retry_llm_operation(
            move || {
                let inner = Arc::clone(&inner);
                let model_id = model_id.clone();
                let messages = messages.clone();
                let tools = tools.clone();
                let config = config.clone();
                Box::pin(async move { inner.chat(&model_id, &messages, &tools, &config).await })
                    as BoxFuture<'static, Result<ChatResponse, LlmError>>
            },
            &self.retry_config,
        )
        .await
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
            max_tokens: Some(4096),
            available_models: self
                .supported_models()
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::LmStudio
    }

    fn supported_models(&self) -> Vec<&'static str> {
        vec![
            "google/gemma-3-12b",
            "llama-3-70b",
            "mistralai/mistral-7b-instruct-v0.3",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_local_server_retry() {
        let provider = LmStudioProvider::new("http://localhost:1234".to_string()).unwrap();
        assert_eq!(provider.retry_config().max_attempts, 3);
        assert_eq!(provider.provider_type(), ProviderType::LmStudio);
    }
}
