//! Provider implementations.
//!
//! Each provider implements the [`crate::llm::traits::LlmProvider`] trait
//! and owns all logic for its backend: request formatting, error-envelope
//! parsing, and the stream adapter for its delta schema.
//!
//! The OpenAI-compatible family (`openrouter`, `lm_studio`, `ollama`) wraps
//! the `openai` core with its own base URL and auth. `bedrock` is the one
//! backend that does not speak SSE natively; its binary framing is bridged
//! in [`crate::eventstream`] before adaptation.

pub mod anthropic;
pub mod bedrock;
pub mod cohere;
pub mod lm_studio;
pub mod ollama;
pub mod openai;
pub mod openrouter;

// Shared adapter plumbing and request utilities
mod adapter;
pub mod retry;
pub mod sigv4;

pub use anthropic::{AnthropicChunkStream, AnthropicProvider};
pub use bedrock::{BedrockProvider, NovaChunkStream};
pub use cohere::{CohereChunkStream, CohereProvider};
pub use lm_studio::LmStudioProvider;
pub use ollama::OllamaProvider;
pub use openai::{OpenAiChunkStream, OpenAiProvider};
pub use openrouter::OpenRouterProvider;
