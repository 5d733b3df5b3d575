use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use secrecy::ExposeSecret;

use lexi_core::provider::StreamOptions;
use lexi_engine::tools::create_default_registry;
use lexi_engine::{EngineConfig, TurnOrchestrator};
use lexi_llm::{AnthropicConfig, AnthropicProvider, ReliableConfig, ReliableProvider};
use lexi_settings::LexiSettings;
use lexi_store::{DiffConfig, InMemoryDocumentStore, InMemoryHistoryStore};
use lexi_telemetry::{init_telemetry, TelemetryConfig};

/// LexiDoc streaming document assistant.
#[derive(Debug, Parser)]
#[command(name = "lexi", version)]
struct Cli {
    /// Settings file (defaults to ~/.lexi/settings.json).
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    port: Option<u16>,
    #[arg(long)]
    host: Option<String>,
    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;

    let log_level = settings
        .logging
        .level
        .parse()
        .with_context(|| format!("unknown log level {:?}", settings.logging.level))?;
    let _telemetry = init_telemetry(TelemetryConfig {
        log_level,
        json: settings.logging.json,
        ..TelemetryConfig::default()
    });

    tracing::info!(model = %settings.model.name, "Starting LexiDoc server");

    let orchestrator = Arc::new(build_orchestrator(&settings)?);
    let config = lexi_server::ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
    };
    let handle = lexi_server::start(config, orchestrator)
        .await
        .with_context(|| format!("failed to bind {}:{}", settings.server.host, settings.server.port))?;

    tracing::info!(port = handle.port, "LexiDoc server ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("Shutting down");
    handle.shutdown().await;
    Ok(())
}

/// File and env layers first, then command-line flags on top.
fn load_settings(cli: &Cli) -> anyhow::Result<LexiSettings> {
    let mut settings = match &cli.config {
        Some(path) if !path.exists() => bail!("settings file {} does not exist", path.display()),
        Some(path) => lexi_settings::load_settings_from_path(path),
        None => lexi_settings::load_settings(),
    }
    .context("failed to load settings")?;

    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(host) = &cli.host {
        settings.server.host = host.clone();
    }
    if cli.log_json {
        settings.logging.json = true;
    }
    Ok(settings)
}

fn build_orchestrator(settings: &LexiSettings) -> anyhow::Result<TurnOrchestrator> {
    let Some(api_key) = settings.model.api_key.as_ref() else {
        bail!("ANTHROPIC_API_KEY is not set");
    };

    let anthropic = AnthropicConfig::new(api_key.expose_secret())
        .with_model(&settings.model.name)
        .with_base_url(&settings.model.base_url);
    let provider = AnthropicProvider::new(anthropic).context("failed to create model client")?;

    let retry = &settings.retry;
    let provider = ReliableProvider::new(
        provider,
        ReliableConfig {
            max_retries: retry.max_retries,
            base_delay: Duration::from_millis(retry.base_delay_ms),
            max_delay: Duration::from_millis(retry.max_delay_ms),
            circuit_breaker_threshold: retry.circuit_breaker_threshold,
            circuit_breaker_cooldown: Duration::from_millis(retry.circuit_breaker_cooldown_ms),
            ..ReliableConfig::default()
        },
    );

    let registry = create_default_registry(Duration::from_secs(settings.engine.tool_timeout_secs));
    let history = InMemoryHistoryStore::new(settings.history.cap);
    let documents = InMemoryDocumentStore::new(DiffConfig {
        similarity_threshold: settings.documents.similarity_threshold,
        max_pair_comparisons: settings.documents.max_pair_comparisons,
        pair_window: settings.documents.pair_window,
    });

    let mut engine = EngineConfig {
        max_rounds: settings.engine.max_rounds,
        stream_options: StreamOptions {
            max_tokens: settings.model.max_tokens,
            ..StreamOptions::default()
        },
        ..EngineConfig::default()
    };
    if let Some(prompt) = &settings.engine.system_prompt {
        engine.system_prompt = prompt.clone();
    }

    Ok(TurnOrchestrator::new(
        Arc::new(provider),
        Arc::new(registry),
        Arc::new(history),
        Arc::new(documents),
        engine,
    ))
}
