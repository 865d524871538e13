//! AI provider layer
//!
//! Normalized chat events, the provider contract, the generic
//! OpenAI-compatible streaming engine, and the per-backend adapters.

// Modular architecture
pub mod client;
pub mod error;
pub mod provider;
pub mod retry;

// Provider-specific configuration
pub mod providers;

// Shared infrastructure
pub mod sse;
pub mod streaming;
pub mod types;

pub use client::{OpenAiCompatibleClient, ProviderSpec};
pub use error::ChatError;
pub use provider::{ModelCache, Provider};
pub use streaming::{ChatResponse, ChatStream, EventSink};
pub use types::{AiModel, ChatMessage, ChatRequest, FunctionCall, ModelConfig, Role, ToolCall};
