//! Polychat - chat with free-tier model providers from the terminal
//!
//! Lists and configures the shared model catalog and runs streamed chat
//! turns against any registered provider.

use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use polychat_core::{constants, paths, JsonFileStore, ModelRegistry, Settings};

mod commands;

/// Polychat - multi-provider chat client
#[derive(Parser)]
#[command(name = "polychat")]
#[command(about = "Chat with free-tier model providers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List models in the catalog
    Models {
        /// Include disabled models
        #[arg(short, long)]
        all: bool,

        /// Only models of this provider
        #[arg(short, long)]
        provider: Option<String>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Re-fetch every provider's catalog
    Refresh,

    /// Enable a model
    Enable { model: String },

    /// Disable a model
    Disable { model: String },

    /// Enable all models, optionally of one provider
    EnableAll {
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Disable all models, optionally of one provider
    DisableAll {
        #[arg(short, long)]
        provider: Option<String>,
    },

    /// Set a model's alias, or clear it when omitted
    Alias { model: String, alias: Option<String> },

    /// Add a custom model to a provider's catalog
    AddModel {
        #[arg(short, long)]
        provider: String,

        #[arg(short, long)]
        id: String,

        /// Display name (defaults to the id)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Remove a custom model
    RemoveModel { model: String },

    /// Send one prompt and stream the answer
    Chat {
        /// Model id or alias (defaults to the first enabled model)
        #[arg(short, long)]
        model: Option<String>,

        /// Provider to use (defaults to the model's owner)
        #[arg(short, long)]
        provider: Option<String>,

        #[arg(short, long)]
        temperature: Option<f32>,

        #[arg(long)]
        max_tokens: Option<u32>,

        /// Wait for the full answer instead of streaming
        #[arg(long)]
        no_stream: bool,

        /// System prompt
        #[arg(short, long)]
        system: Option<String>,

        prompt: String,
    },
}

/// Log to `~/.polychat/logs/polychat.log`, never stdout
///
/// Falls back to stderr at WARN when the file cannot be created.
fn init_logging() {
    let log_dir = paths::logs_dir();
    let log_file = std::fs::create_dir_all(&log_dir)
        .and_then(|_| std::fs::File::create(log_dir.join(constants::fs::LOG_FILE_NAME)));

    match log_file {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
                )
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new("warn"))
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let settings = Settings::load().unwrap_or_else(|e| {
        tracing::warn!("Ignoring unreadable settings: {:#}", e);
        eprintln!("warning: {:#}; using default settings", e);
        Settings::default()
    });
    let registry = Arc::new(ModelRegistry::new(Arc::new(
        JsonFileStore::default_location(),
    )));
    for provider in settings.build_providers() {
        registry.register_provider(provider).await;
    }

    match cli.command {
        Commands::Models {
            all,
            provider,
            json,
        } => commands::list_models(&registry, all, provider.as_deref(), json).await,
        Commands::Refresh => commands::refresh(&registry).await,
        Commands::Enable { model } => commands::set_enabled(&registry, &model, true).await,
        Commands::Disable { model } => commands::set_enabled(&registry, &model, false).await,
        Commands::EnableAll { provider } => {
            commands::set_all_enabled(&registry, provider.as_deref(), true).await
        }
        Commands::DisableAll { provider } => {
            commands::set_all_enabled(&registry, provider.as_deref(), false).await
        }
        Commands::Alias { model, alias } => {
            commands::set_alias(&registry, &model, alias.as_deref()).await
        }
        Commands::AddModel { provider, id, name } => {
            commands::add_model(&registry, &provider, &id, name.as_deref()).await
        }
        Commands::RemoveModel { model } => commands::remove_model(&registry, &model).await,
        Commands::Chat {
            model,
            provider,
            temperature,
            max_tokens,
            no_stream,
            system,
            prompt,
        } => {
            let options = commands::ChatOptions {
                model,
                provider,
                temperature,
                max_tokens,
                stream: !no_stream,
                system,
            };
            commands::chat(&registry, options, &prompt).await
        }
    }
}
