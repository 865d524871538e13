//! User-defined OpenAI-compatible endpoints

use crate::ai::client::{AuthHeader, OpenAiCompatibleClient, ProviderSpec};
use crate::ai::types::AiModel;

/// Description of a user-defined endpoint
///
/// `models` seeds the default catalog; it is used when the endpoint has no
/// working models listing. A key, if given, is sent as a Bearer token but
/// never required.
pub fn spec(id: &str, name: &str, base_url: &str, models: &[String]) -> ProviderSpec {
    let defaults = models
        .iter()
        .map(|m| AiModel::new(m, m, id))
        .collect::<Vec<_>>();
    ProviderSpec::new(id, name, base_url)
        .with_auth(AuthHeader::Bearer, false)
        .with_default_models(defaults)
}

pub fn create(
    id: &str,
    name: &str,
    base_url: &str,
    api_key: Option<String>,
    models: &[String],
) -> OpenAiCompatibleClient {
    OpenAiCompatibleClient::new(spec(id, name, base_url, models), api_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_models_seed_defaults() {
        let spec = spec(
            "local",
            "Local LLM",
            "http://localhost:11434/v1",
            &["qwen2.5:7b".to_string(), "llama3.2".to_string()],
        );
        assert_eq!(spec.chat_url, "http://localhost:11434/v1/chat/completions");
        assert_eq!(spec.default_models.len(), 2);
        assert_eq!(spec.default_models[0].provider_id, "local");
        assert_eq!(spec.resolve_model(None).as_deref(), Some("qwen2.5:7b"));
        assert!(!spec.requires_api_key);
    }
}
