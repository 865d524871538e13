//! Polychat Core - Unified client for free-tier chat-completion backends
//!
//! This crate provides:
//! - A normalized chat event stream shared by every backend
//! - A generic OpenAI-compatible streaming engine with retry/backoff
//! - Adapters for OpenRouter, Groq, Pollinations, DuckChat, and custom endpoints
//! - A model registry blending provider catalogs with persisted user preferences

pub mod ai;
pub mod constants;
pub mod paths;
pub mod registry;
pub mod settings;
pub mod storage;

// Re-exports for convenience
pub use ai::{
    AiModel, ChatError, ChatMessage, ChatRequest, ChatResponse, ChatStream, ModelConfig,
    Provider, Role, ToolCall,
};
pub use registry::{ModelRegistry, ModelsSnapshot, ModelsState};
pub use settings::Settings;
pub use storage::{ConfigStore, JsonFileStore, MemoryStore, RegistryConfig};
