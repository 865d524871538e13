//! Generic OpenAI-compatible client
//!
//! Implements request construction, the retry loop, SSE parsing and model
//! catalog fetching once. Individual backends configure it through a
//! `ProviderSpec` rather than subclassing.

pub mod config;
pub mod core;
pub mod models;
pub mod request_builder;
pub mod streaming;

// Re-export main types
pub use config::{AuthHeader, ModelFilter, PayloadHook, ProviderSpec};
pub use core::{create_http_client, OpenAiCompatibleClient};
pub use models::parse_models_response;
pub use request_builder::build_chat_body;
pub use streaming::{send_request, send_with_retries};
