//! Request body construction for chat completions

use serde_json::{json, Map, Value};

use super::config::ProviderSpec;
use crate::ai::types::ChatRequest;

/// Build the JSON body for one chat call
///
/// `model` is the already-resolved backend id. Optional sampling fields are
/// omitted when unset; the provider hook runs last.
pub fn build_chat_body(spec: &ProviderSpec, model: &str, request: &ChatRequest) -> Value {
    let mut body = Map::new();
    body.insert("model".to_string(), Value::String(model.to_string()));
    body.insert(
        "messages".to_string(),
        serde_json::to_value(&request.messages).unwrap_or_else(|_| json!([])),
    );
    body.insert("stream".to_string(), Value::Bool(request.stream));
    if let Some(temperature) = request.temperature {
        body.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(max_tokens) = request.max_tokens {
        body.insert("max_tokens".to_string(), json!(max_tokens));
    }

    if let Some(hook) = spec.transform_payload {
        hook(&mut body, model);
    }

    Value::Object(body)
}
