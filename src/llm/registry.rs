//! Provider registry for lazy loading and sharing provider instances.
//!
//! The registry handles configuration discovery from the environment,
//! provider instantiation, and sharing across callers so each backend gets
//! one client instance per process.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::llm::providers::retry::RetryConfig;
use crate::llm::providers::{
    AnthropicProvider, BedrockProvider, CohereProvider, LmStudioProvider, OllamaProvider,
    OpenAiProvider, OpenRouterProvider,
};
use crate::llm::traits::{LlmError, LlmProvider, ProviderType};

/// Global provider registry instance, shared across the process.
pub static PROVIDER_REGISTRY: Lazy<ProviderRegistry> = Lazy::new(ProviderRegistry::new);

/// Provider registry that manages configurations and lazy-loads provider
/// instances.
pub struct ProviderRegistry {
    /// Provider configurations discovered from environment
    configs: RwLock<HashMap<ProviderType, ProviderConfig>>,
    /// Instantiated provider instances (shared across callers)
    providers: RwLock<HashMap<ProviderType, Arc<dyn LlmProvider>>>,
}

/// Configuration for each provider type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProviderConfig {
    Bedrock {
        region: Option<String>,
        profile: Option<String>,
    },
    OpenAI {
        api_key: String,
        organization: Option<String>,
        base_url: Option<String>,
    },
    Anthropic {
        api_key: String,
        base_url: Option<String>,
    },
    Cohere {
        api_key: String,
        base_url: Option<String>,
    },
    OpenRouter {
        api_key: String,
        base_url: Option<String>,
    },
    LmStudio {
        base_url: String,
        retry_config: Option<RetryConfig>,
    },
    Ollama {
        base_url: String,
    },
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            configs: RwLock::new(HashMap::new()),
            providers: RwLock::new(HashMap::new()),
        }
    }

    /// Configure providers from environment variables.
    ///
    /// Call once at application startup to detect available backends.
    pub async fn configure() -> Result<(), LlmError> {
        let registry = &PROVIDER_REGISTRY;
        let mut configs = registry.configs.write().await;

        // Bedrock is considered configured when any of the usual AWS
        // environment knobs is present.
        if std::env::var("AWS_REGION").is_ok()
            || std::env::var("AWS_ACCESS_KEY_ID").is_ok()
            || std::env::var("AWS_PROFILE").is_ok()
        {
            configs.insert(
                ProviderType::Bedrock,
                ProviderConfig::Bedrock {
                    region: std::env::var("AWS_REGION").ok(),
                    profile: std::env::var("AWS_PROFILE").ok(),
                },
            );
        }

        if let Ok(api_key) = std::env::var("OPENAI_API_KEY") {
            configs.insert(
                ProviderType::OpenAI,
                ProviderConfig::OpenAI {
                    api_key,
                    organization: std::env::var("OPENAI_ORG_ID").ok(),
                    base_url: std::env::var("OPENAI_BASE_URL").ok(),
                },
            );
        }

        if let Ok(api_key) = std::env::var("ANTHROPIC_API_KEY") {
            configs.insert(
                ProviderType::Anthropic,
                ProviderConfig::Anthropic {
                    api_key,
                    base_url: std::env::var("ANTHROPIC_BASE_URL").ok(),
                },
            );
        }

        if let Ok(api_key) = std::env::var("COHERE_API_KEY") {
            configs.insert(
                ProviderType::Cohere,
                ProviderConfig::Cohere {
                    api_key,
                    base_url: std::env::var("COHERE_BASE_URL").ok(),
                },
            );
        }

        if let Ok(api_key) = std::env::var("OPENROUTER_API_KEY") {
            configs.insert(
                ProviderType::OpenRouter,
                ProviderConfig::OpenRouter {
                    api_key,
                    base_url: std::env::var("OPENROUTER_BASE_URL").ok(),
                },
            );
        }

        // Local servers get default ports when not configured explicitly.
        configs.insert(
            ProviderType::LmStudio,
            ProviderConfig::LmStudio {
                base_url: std::env::var("LM_STUDIO_BASE_URL")
                    .unwrap_or_else(|_| "http://localhost:1234".to_string()),
                retry_config: None,
            },
        );
        configs.insert(
            ProviderType::Ollama,
            ProviderConfig::Ollama {
                base_url: std::env::var("OLLAMA_BASE_URL")
                    .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            },
        );

        Ok(())
    }

    /// Get a provider instance (lazy loading).
    ///
    /// Instances are created on first use and cached for every later
    /// caller.
    pub async fn get_provider(
        &self,
        provider_type: ProviderType,
    ) -> Result<Arc<dyn LlmProvider>, LlmError> {
        {
            let providers = self.providers.read().await;
            if let Some(provider) = providers.get(&provider_type) {
                return Ok(Arc::clone(provider));
            }
        }

        let configs = self.configs.read().await;
        let config = configs
            .get(&provider_type)
            .ok_or_else(|| LlmError::ConfigurationError {
                message: format!(
                    "No configuration found for provider {}. Call ProviderRegistry::configure() \
                     first or set the provider's environment variables.",
                    provider_type
                ),
            })?;

        let provider: Arc<dyn LlmProvider> = match (provider_type, config) {
            (ProviderType::Bedrock, ProviderConfig::Bedrock { region, profile }) => {
                Arc::new(BedrockProvider::new(region.clone(), profile.clone())?)
            }
            (
                ProviderType::OpenAI,
                ProviderConfig::OpenAI {
                    api_key,
                    organization,
                    base_url,
                },
            ) => Arc::new(OpenAiProvider::new(
                api_key.clone(),
                organization.clone(),
                base_url.clone(),
            )?),
            (ProviderType::Anthropic, ProviderConfig::Anthropic { api_key, base_url }) => {
                Arc::new(AnthropicProvider::new(api_key.clone(), base_url.clone())?)
            }
            (ProviderType::Cohere, ProviderConfig::Cohere { api_key, base_url }) => {
                Arc::new(CohereProvider::new(api_key.clone(), base_url.clone())?)
            }
            (ProviderType::OpenRouter, ProviderConfig::OpenRouter { api_key, base_url }) => {
                Arc::new(OpenRouterProvider::new(api_key.clone(), base_url.clone())?)
            }
            (
                ProviderType::LmStudio,
                ProviderConfig::LmStudio {
                    base_url,
                    retry_config,
                },
            ) => Arc::new(LmStudioProvider::with_retry_config(
                base_url.clone(),
                retry_config.clone().unwrap_or_default(),
            )?),
            (ProviderType::Ollama, ProviderConfig::Ollama { base_url }) => {
                Arc::new(OllamaProvider::new(base_url.clone())?)
            }
            _ => {
                return Err(LlmError::ConfigurationError {
                    message: format!("Configuration mismatch for provider {}", provider_type),
                });
            }
        };

        let mut providers = self.providers.write().await;
        providers.insert(provider_type, Arc::clone(&provider));

        Ok(provider)
    }

    /// Check if a provider is configured.
    pub async fn is_configured(&self, provider_type: ProviderType) -> bool {
        let configs = self.configs.read().await;
        configs.contains_key(&provider_type)
    }

    /// Get all configured provider types.
    pub async fn configured_providers(&self) -> Vec<ProviderType> {
        let configs = self.configs.read().await;
        configs.keys().copied().collect()
    }

    /// Manually add a provider configuration, overriding discovery.
    pub async fn add_config(&self, provider_type: ProviderType, config: ProviderConfig) {
        let mut configs = self.configs.write().await;
        configs.insert(provider_type, config);
    }

    /// Clear all cached providers (useful for testing).
    pub async fn clear_cache(&self) {
        let mut providers = self.providers.write().await;
        providers.clear();
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
