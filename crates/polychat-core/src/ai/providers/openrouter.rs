//! OpenRouter
//!
//! Only the zero-cost `:free` variants are exposed.

use crate::ai::client::{AuthHeader, OpenAiCompatibleClient, ProviderSpec};
use crate::ai::types::AiModel;

pub const PROVIDER_ID: &str = "openrouter";
pub const API_BASE: &str = "https://openrouter.ai/api/v1";

const REFERER: &str = "https://github.com/polychat/polychat";
const TITLE: &str = "Polychat";

/// OpenRouter endpoint description at `api_base`
pub fn spec(api_base: &str) -> ProviderSpec {
    ProviderSpec::new(PROVIDER_ID, "OpenRouter", api_base)
        .with_auth(AuthHeader::Bearer, true)
        .with_header("HTTP-Referer", REFERER)
        .with_header("X-Title", TITLE)
        .with_alias("llama", "meta-llama/llama-3.3-70b-instruct:free")
        .with_alias("deepseek", "deepseek/deepseek-chat-v3-0324:free")
        .with_alias("r1", "deepseek/deepseek-r1:free")
        .with_alias("gemma", "google/gemma-3-27b-it:free")
        .with_default_models(default_models())
        .with_model_filter(is_free_model)
}

/// Client for the public OpenRouter API
pub fn create(api_key: Option<String>) -> OpenAiCompatibleClient {
    OpenAiCompatibleClient::new(spec(API_BASE), api_key)
}

/// Free variants carry a `:free` suffix
pub fn is_free_model(model: &AiModel) -> bool {
    model.id.ends_with(":free")
}

fn default_models() -> Vec<AiModel> {
    vec![
        AiModel::new(
            "meta-llama/llama-3.3-70b-instruct:free",
            "Llama 3.3 70B Instruct",
            PROVIDER_ID,
        )
        .with_max_tokens(131_072)
        .with_capabilities(false, true, false),
        AiModel::new(
            "deepseek/deepseek-chat-v3-0324:free",
            "DeepSeek V3",
            PROVIDER_ID,
        )
        .with_max_tokens(163_840)
        .with_capabilities(false, true, false),
        AiModel::new("deepseek/deepseek-r1:free", "DeepSeek R1", PROVIDER_ID)
            .with_max_tokens(163_840)
            .with_capabilities(false, false, true),
        AiModel::new("google/gemma-3-27b-it:free", "Gemma 3 27B", PROVIDER_ID)
            .with_max_tokens(96_000)
            .with_capabilities(true, false, false),
        AiModel::new(
            "mistralai/mistral-small-3.1-24b-instruct:free",
            "Mistral Small 3.1 24B",
            PROVIDER_ID,
        )
        .with_max_tokens(128_000)
        .with_capabilities(true, true, false),
    ]
}
