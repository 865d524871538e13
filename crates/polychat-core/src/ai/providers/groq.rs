//! Groq
//!
//! Reasoning models need `reasoning_format: "parsed"` so the chain of thought
//! arrives in its own field instead of inline `<think>` tags.

use serde_json::{Map, Value};

use crate::ai::client::{AuthHeader, OpenAiCompatibleClient, ProviderSpec};
use crate::ai::types::AiModel;

pub const PROVIDER_ID: &str = "groq";
pub const API_BASE: &str = "https://api.groq.com/openai/v1";

/// Substrings identifying reasoning-capable Groq models
const REASONING_MARKERS: &[&str] = &["deepseek-r1", "qwq", "qwen3", "gpt-oss"];

pub fn spec(api_base: &str) -> ProviderSpec {
    ProviderSpec::new(PROVIDER_ID, "Groq", api_base)
        .with_auth(AuthHeader::Bearer, true)
        .with_alias("llama", "llama-3.3-70b-versatile")
        .with_alias("llama-fast", "llama-3.1-8b-instant")
        .with_alias("r1", "deepseek-r1-distill-llama-70b")
        .with_default_models(default_models())
        .with_payload_hook(apply_reasoning_format)
        .with_model_filter(is_chat_model)
}

pub fn create(api_key: Option<String>) -> OpenAiCompatibleClient {
    OpenAiCompatibleClient::new(spec(API_BASE), api_key)
}

pub fn is_reasoning_model(model_id: &str) -> bool {
    let id = model_id.to_lowercase();
    REASONING_MARKERS.iter().any(|m| id.contains(m))
}

fn apply_reasoning_format(body: &mut Map<String, Value>, model: &str) {
    if is_reasoning_model(model) {
        body.insert(
            "reasoning_format".to_string(),
            Value::String("parsed".to_string()),
        );
    }
}

/// The models endpoint also lists speech and moderation models
fn is_chat_model(model: &AiModel) -> bool {
    let id = model.id.to_lowercase();
    !["whisper", "tts", "guard", "playai"]
        .iter()
        .any(|m| id.contains(m))
}

fn default_models() -> Vec<AiModel> {
    vec![
        AiModel::new("llama-3.3-70b-versatile", "Llama 3.3 70B Versatile", PROVIDER_ID)
            .with_max_tokens(32_768)
            .with_capabilities(false, true, false),
        AiModel::new("llama-3.1-8b-instant", "Llama 3.1 8B Instant", PROVIDER_ID)
            .with_max_tokens(8_192)
            .with_capabilities(false, true, false),
        AiModel::new(
            "deepseek-r1-distill-llama-70b",
            "DeepSeek R1 Distill Llama 70B",
            PROVIDER_ID,
        )
        .with_max_tokens(8_192)
        .with_capabilities(false, false, true),
        AiModel::new("qwen/qwen3-32b", "Qwen3 32B", PROVIDER_ID)
            .with_max_tokens(40_960)
            .with_capabilities(false, true, true),
        AiModel::new("gemma2-9b-it", "Gemma 2 9B", PROVIDER_ID).with_max_tokens(8_192),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::client::build_chat_body;
    use crate::ai::types::{ChatMessage, ChatRequest};

    #[test]
    fn test_reasoning_format_only_for_reasoning_models() {
        let spec = spec(API_BASE);
        let request = ChatRequest::new(vec![ChatMessage::user("hi")]);

        let body = build_chat_body(&spec, "deepseek-r1-distill-llama-70b", &request);
        assert_eq!(body["reasoning_format"], "parsed");

        let body = build_chat_body(&spec, "llama-3.3-70b-versatile", &request);
        assert!(body.get("reasoning_format").is_none());
    }

    #[test]
    fn test_non_chat_models_filtered() {
        assert!(!is_chat_model(&AiModel::new("whisper-large-v3", "W", PROVIDER_ID)));
        assert!(!is_chat_model(&AiModel::new("meta-llama/llama-guard-4-12b", "G", PROVIDER_ID)));
        assert!(is_chat_model(&AiModel::new("llama-3.1-8b-instant", "L", PROVIDER_ID)));
    }
}
