//! One interface over many AI backends, with a real wire-protocol bridge
//! underneath.
//!
//! Weir fronts independent HTTP providers (OpenAI-style chat APIs,
//! Anthropic, AWS Bedrock, Cohere, local LLM servers) with a single
//! provider trait and a single canonical streaming contract. Two transport
//! framings arrive from the network: text Server-Sent Events, and AWS's
//! binary `vnd.amazon.eventstream` with checksum-verified frames. Both are
//! normalized into one pull-based sequence of generation chunks that every
//! provider exposes identically.
//!
//! # Quick Start
//!
//! ```no_run
//! use weir::llm::{ChatConfig, ProviderType, PROVIDER_REGISTRY};
//! use weir::llm::registry::ProviderRegistry;
//! use weir::streaming::{ChunkStream, StreamChunk};
//! use weir::types::{Message, Messages};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     ProviderRegistry::configure().await?;
//!     let provider = PROVIDER_REGISTRY.get_provider(ProviderType::OpenAI).await?;
//!
//!     let mut messages = Messages::new();
//!     messages.push(Message::user("Stream me a haiku."));
//!
//!     let mut stream = provider
//!         .chat_streaming("gpt-4o-mini", &messages, &[], &ChatConfig::default())
//!         .await?;
//!     while let Some(chunk) = stream.next_chunk().await? {
//!         if let StreamChunk::Text { content } = chunk {
//!             print!("{}", content);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`llm`] - provider trait, registry, and per-backend implementations
//! - [`streaming`] - the canonical chunk stream contract and error taxonomy
//! - [`sse`] - Server-Sent Events parser and writer
//! - [`eventstream`] - AWS binary framing decoder and SSE bridge
//! - [`types`] - shared conversation model
//! - [`utils`] - logging helpers

pub mod eventstream;
pub mod llm;
pub mod sse;
pub mod streaming;
pub mod types;
pub mod utils;

pub use llm::{ChatConfig, ChatResponse, LlmError, LlmProvider, ProviderType};
pub use streaming::{ChunkStream, FinishReason, StreamChunk, StreamError};
pub use types::{Message, Messages};
