//! Multi-provider LLM integration with a unified streaming interface.
//!
//! This module fronts several independent HTTP backends (OpenAI-style chat
//! APIs, Anthropic, AWS Bedrock, Cohere, local servers) with one provider
//! trait and one canonical chunk stream. Request and response shapes are
//! translated per provider; streaming is normalized through the wire bridge
//! in [`crate::sse`] and [`crate::eventstream`].
//!
//! # Quick Start
//!
//! ```no_run
//! use weir::llm::registry::{ProviderRegistry, PROVIDER_REGISTRY};
//! use weir::llm::traits::{ChatConfig, ProviderType};
//! use weir::streaming::ChunkStream;
//! use weir::types::{Message, Messages};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     ProviderRegistry::configure().await?;
//!     let provider = PROVIDER_REGISTRY
//!         .get_provider(ProviderType::Anthropic)
//!         .await?;
//!
//!     let mut messages = Messages::new();
//!     messages.push(Message::user("Name a famous weir."));
//!
//!     let mut stream = provider
//!         .chat_streaming(
//!             "claude-3-5-haiku-20241022",
//!             &messages,
//!             &[],
//!             &ChatConfig::default(),
//!         )
//!         .await?;
//!     while let Some(chunk) = stream.next_chunk().await? {
//!         println!("{:?}", chunk);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! caller → ProviderRegistry → LlmProvider (Bedrock | OpenAI | Anthropic | ...)
//!                                  │
//!                   network bytes ─┤
//!   [EventStream decoder → SSE bridge]  (Bedrock only)
//!                                  │
//!                             SSE parser → per-provider adapter → ChunkStream
//! ```
//!
//! # Key Types
//!
//! - [`traits::LlmProvider`] - core trait for provider implementations
//! - [`crate::streaming::ChunkStream`] - the canonical pull-based stream
//! - [`registry::ProviderRegistry`] - configuration discovery and sharing
//! - [`traits::ChatConfig`] / [`traits::ChatResponse`] - unified request and
//!   response shapes

pub mod providers;
pub mod registry;
pub mod traits;

pub use registry::{ProviderConfig, ProviderRegistry, PROVIDER_REGISTRY};
pub use traits::{
    ChatConfig, ChatResponse, EmbeddingResponse, HealthStatus, LlmError, LlmProvider,
    ProviderCapabilities, ProviderType, RerankResponse, RerankResult, Tool, ToolCall, Usage,
};
