//! Subcommand handlers

use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use tracing::info;

use polychat_core::{AiModel, ChatMessage, ChatRequest, ChatResponse, ModelRegistry, Provider};

pub struct ChatOptions {
    pub model: Option<String>,
    pub provider: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stream: bool,
    pub system: Option<String>,
}

pub async fn list_models(
    registry: &ModelRegistry,
    all: bool,
    provider: Option<&str>,
    json: bool,
) -> Result<()> {
    let state = registry.initialize().await;
    let models: Vec<AiModel> = if all {
        registry.all_models()
    } else {
        registry.enabled_models()
    }
    .into_iter()
    .filter(|m| provider.is_none_or(|p| m.provider_id == p))
    .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&models)?);
        return Ok(());
    }

    if models.is_empty() {
        println!("No models ({})", state);
        return Ok(());
    }

    let width = models.iter().map(|m| m.id.len()).max().unwrap_or(0);
    let mut current_provider = "";
    for model in &models {
        if model.provider_id != current_provider {
            current_provider = &model.provider_id;
            let (enabled, total) = registry.provider_counts(current_provider);
            println!("\n{} ({}/{} enabled)", current_provider, enabled, total);
        }
        let marker = if model.enabled { '*' } else { ' ' };
        println!(
            "  {} {:<width$}  {}",
            marker,
            model.id,
            model.display_label(),
            width = width
        );
    }
    Ok(())
}

pub async fn refresh(registry: &ModelRegistry) -> Result<()> {
    if registry.refresh_models().await {
        println!("{}", registry.state());
        Ok(())
    } else {
        bail!("Refresh failed: {}", registry.state())
    }
}

pub async fn set_enabled(registry: &ModelRegistry, model_id: &str, enabled: bool) -> Result<()> {
    registry.initialize().await;
    let known = registry.set_model_enabled(model_id, enabled).await;
    let verb = if enabled { "Enabled" } else { "Disabled" };
    if known {
        println!("{} {}", verb, model_id);
    } else {
        println!("{} {} (not in the current catalog)", verb, model_id);
    }
    Ok(())
}

pub async fn set_all_enabled(
    registry: &ModelRegistry,
    provider: Option<&str>,
    enabled: bool,
) -> Result<()> {
    registry.initialize().await;
    let count = if enabled {
        registry.enable_all_models(provider).await
    } else {
        registry.disable_all_models(provider).await
    };
    let verb = if enabled { "Enabled" } else { "Disabled" };
    println!("{} {} models", verb, count);
    Ok(())
}

pub async fn set_alias(registry: &ModelRegistry, model_id: &str, alias: Option<&str>) -> Result<()> {
    registry.initialize().await;
    if !registry.set_model_alias(model_id, alias).await {
        println!("Note: {} is not in the current catalog", model_id);
    }
    match alias {
        Some(alias) if !alias.trim().is_empty() => println!("{} -> {}", alias.trim(), model_id),
        _ => println!("Cleared alias of {}", model_id),
    }
    Ok(())
}

pub async fn add_model(
    registry: &ModelRegistry,
    provider_id: &str,
    model_id: &str,
    name: Option<&str>,
) -> Result<()> {
    if registry.provider(provider_id).await.is_none() {
        bail!("Unknown provider: {}", provider_id);
    }
    registry.initialize().await;
    let model = AiModel::new(model_id, name.unwrap_or(model_id), provider_id);
    let stored = registry.add_custom_model(model).await;
    println!("Added {} to {}", stored.id, provider_id);
    Ok(())
}

pub async fn remove_model(registry: &ModelRegistry, model_id: &str) -> Result<()> {
    registry.initialize().await;
    if !registry.remove_custom_model(model_id).await {
        bail!("{} is not a custom model", model_id);
    }
    println!("Removed {}", model_id);
    Ok(())
}

/// Find the model a `--model` argument names, by id or by alias
fn find_model(models: &[AiModel], wanted: &str) -> Option<AiModel> {
    models
        .iter()
        .find(|m| m.id == wanted)
        .or_else(|| models.iter().find(|m| m.alias_name.as_deref() == Some(wanted)))
        .cloned()
}

/// Pick the provider and model id for a chat turn
///
/// An unknown model is passed through untouched when a provider is given,
/// so provider-side aliases still work.
async fn select_target(
    registry: &ModelRegistry,
    options: &ChatOptions,
) -> Result<(Arc<dyn Provider>, Option<String>)> {
    let known = match options.model.as_deref() {
        Some(wanted) => find_model(&registry.all_models(), wanted),
        None if options.provider.is_none() => registry.get_default_model(),
        None => None,
    };

    let provider_id = match (&options.provider, &known) {
        (Some(id), _) => id.clone(),
        (None, Some(model)) => model.provider_id.clone(),
        (None, None) => match &options.model {
            Some(wanted) => bail!("Unknown model: {} (try --provider)", wanted),
            None => bail!("No enabled models; run `polychat models --all`"),
        },
    };
    let provider = registry
        .provider(&provider_id)
        .await
        .with_context(|| format!("Unknown provider: {}", provider_id))?;
    if !provider.is_available() {
        bail!("Provider {} is not configured (missing API key?)", provider_id);
    }

    let model = match known {
        Some(model) if model.provider_id == provider_id => Some(model.id),
        _ => options.model.clone(),
    };
    Ok((provider, model))
}

pub async fn chat(registry: &ModelRegistry, options: ChatOptions, prompt: &str) -> Result<()> {
    registry.initialize().await;
    let (provider, model) = select_target(registry, &options).await?;

    let mut messages = Vec::new();
    if let Some(system) = options.system.as_deref() {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(prompt));

    let mut request = ChatRequest::new(messages).with_stream(options.stream);
    if let Some(model) = model {
        request = request.with_model(model);
    }
    if let Some(temperature) = options.temperature {
        request = request.with_temperature(temperature);
    }
    if let Some(max_tokens) = options.max_tokens {
        request = request.with_max_tokens(max_tokens);
    }

    info!(provider = provider.id(), "Sending chat request");
    let mut stream = provider.chat(request);
    let mut stdout = std::io::stdout();
    let mut printed_content = false;
    let mut in_reasoning = false;

    while let Some(event) = stream.next().await {
        match event {
            ChatResponse::Content { text, is_complete } => {
                if in_reasoning {
                    eprintln!();
                    in_reasoning = false;
                }
                if !is_complete {
                    print!("{}", text);
                    stdout.flush()?;
                    printed_content = true;
                } else if !printed_content {
                    print!("{}", text);
                    printed_content = true;
                }
            }
            ChatResponse::Reasoning { text, is_complete } => {
                if !is_complete {
                    in_reasoning = true;
                    eprint!("{}", text);
                }
            }
            ChatResponse::ToolCallRequest { tool_calls } => {
                for call in tool_calls {
                    eprintln!("[tool call] {}({})", call.function.name, call.function.arguments);
                }
            }
            ChatResponse::Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens,
            } => {
                eprintln!(
                    "[usage] prompt {} / completion {} / total {}",
                    prompt_tokens, completion_tokens, total_tokens
                );
            }
            ChatResponse::ProviderInfo {
                provider_id,
                resolved_model,
            } => {
                eprintln!("[{}] {}", provider_id, resolved_model);
            }
            ChatResponse::RetryNotification {
                attempt,
                max_attempts,
                delay_ms,
                reason,
            } => {
                eprintln!(
                    "[retry {}/{} in {}ms] {}",
                    attempt, max_attempts, delay_ms, reason
                );
            }
            ChatResponse::Done { finish_reason } => {
                if printed_content {
                    println!();
                }
                if finish_reason != "stop" {
                    eprintln!("[finished: {}]", finish_reason);
                }
                return Ok(());
            }
            ChatResponse::Error { message, code, .. } => {
                if printed_content {
                    println!();
                }
                bail!("{} ({})", message, code);
            }
        }
    }
    bail!("Stream closed without a result")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: &str, alias: Option<&str>) -> AiModel {
        let mut model = AiModel::new(id, id, "groq");
        model.alias_name = alias.map(str::to_string);
        model
    }

    #[test]
    fn test_find_model_by_id_then_alias() {
        let models = vec![
            model("llama-3.3-70b-versatile", Some("fast")),
            model("fast", None),
        ];
        assert_eq!(find_model(&models, "fast").unwrap().id, "fast");
        assert_eq!(
            find_model(&models[..1], "fast").unwrap().id,
            "llama-3.3-70b-versatile"
        );
        assert!(find_model(&models, "missing").is_none());
    }
}
