//! Pollinations
//!
//! Keyless. Chat lives under `/openai` instead of `/chat/completions` and
//! the models endpoint returns a bare array keyed by `name`.

use crate::ai::client::{AuthHeader, OpenAiCompatibleClient, ProviderSpec};
use crate::ai::types::AiModel;

pub const PROVIDER_ID: &str = "pollinations";
pub const API_BASE: &str = "https://text.pollinations.ai";

pub fn spec(api_base: &str) -> ProviderSpec {
    let base = api_base.trim_end_matches('/');
    ProviderSpec::new(PROVIDER_ID, "Pollinations", base)
        .with_chat_url(&format!("{}/openai", base))
        .with_models_url(Some(&format!("{}/models", base)))
        .with_auth(AuthHeader::None, false)
        .with_alias("gpt-4o-mini", "openai")
        .with_alias("gpt-4.1-nano", "openai-fast")
        .with_alias("gpt-4.1", "openai-large")
        .with_alias("o4-mini", "openai-reasoning")
        .with_alias("qwen-2.5-coder", "qwen-coder")
        .with_default_models(default_models())
}

pub fn create() -> OpenAiCompatibleClient {
    OpenAiCompatibleClient::new(spec(API_BASE), None)
}

fn default_models() -> Vec<AiModel> {
    vec![
        AiModel::new("openai", "OpenAI GPT-4o mini", PROVIDER_ID)
            .with_capabilities(true, true, false),
        AiModel::new("openai-fast", "OpenAI GPT-4.1 nano", PROVIDER_ID)
            .with_capabilities(true, true, false),
        AiModel::new("openai-large", "OpenAI GPT-4.1", PROVIDER_ID)
            .with_capabilities(true, true, false),
        AiModel::new("mistral", "Mistral Small 3.1", PROVIDER_ID)
            .with_capabilities(false, true, false),
        AiModel::new("qwen-coder", "Qwen 2.5 Coder 32B", PROVIDER_ID)
            .with_capabilities(false, true, false),
    ]
}
