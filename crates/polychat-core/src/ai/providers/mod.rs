//! Backend adapters
//!
//! OpenAI-compatible services are `ProviderSpec` configurations of the
//! generic client. DuckChat speaks its own protocol and implements
//! `Provider` directly.

pub mod custom;
pub mod duckchat;
pub mod groq;
pub mod openrouter;
pub mod pollinations;

pub use duckchat::DuckChatProvider;
