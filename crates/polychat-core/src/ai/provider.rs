//! Provider contract
//!
//! What every backend must offer: a model catalog and a chat stream.

use async_trait::async_trait;
use parking_lot::RwLock;

use super::streaming::ChatStream;
use super::types::{AiModel, ChatRequest};

/// A chat-completion backend
///
/// None of these operations fail outright. Catalog problems degrade to a
/// default list, and chat problems arrive as an `Error` event on the stream.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identifier, also stamped on every model this provider returns
    fn id(&self) -> &str;

    /// Human-readable name
    fn name(&self) -> &str;

    /// Whether the provider can be used right now (e.g. has its API key)
    fn is_available(&self) -> bool {
        true
    }

    /// Cached catalog if present, otherwise fetched, otherwise the built-in defaults
    async fn get_models(&self) -> Vec<AiModel>;

    /// Force a re-fetch. On failure the previous cache is kept and `false` returned.
    async fn refresh_models(&self) -> bool;

    /// Start a chat turn
    ///
    /// Returns immediately; the work runs on its own task. Dropping the
    /// stream cancels it.
    fn chat(&self, request: ChatRequest) -> ChatStream;
}

/// Provider-local model cache
#[derive(Debug, Default)]
pub struct ModelCache {
    models: RwLock<Option<Vec<AiModel>>>,
}

impl ModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<Vec<AiModel>> {
        self.models.read().clone()
    }

    pub fn set(&self, models: Vec<AiModel>) {
        *self.models.write() = Some(models);
    }

    pub fn is_empty(&self) -> bool {
        self.models.read().is_none()
    }
}
