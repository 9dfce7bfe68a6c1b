//! # abrigo
//!
//! Server binary: loads settings and secrets, opens the database, wires the
//! completion provider, message pipeline and WebSocket server together.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn, Level};

use abrigo_core::cache::Cache;
use abrigo_core::completion::CompletionProvider;
use abrigo_engine::{KeyService, MessagePipeline, PipelineConfig};
use abrigo_llm::{AnthropicCompletion, ModelRoster, ReliableCompletion, ReliableConfig, TierModel};
use abrigo_server::{HandlerState, JwtVerifier, ServerConfig};
use abrigo_settings::{AbrigoSettings, Secrets};
use abrigo_store::{Database, MemoryCache};
use abrigo_telemetry::TelemetryConfig;

const MIN_LIVENESS: Duration = Duration::from_secs(1);

/// Abrigo support-chat server.
#[derive(Parser, Debug)]
#[command(name = "abrigo", about = "Encrypted support chat server")]
struct Cli {
    /// Settings file (defaults to ~/.abrigo/settings.json).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Port to bind (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the SQLite database (overrides settings).
    #[arg(long)]
    db: Option<PathBuf>,
}

fn ensure_parent_dir(path: &std::path::Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    Ok(())
}

fn telemetry_config(settings: &AbrigoSettings) -> TelemetryConfig {
    TelemetryConfig {
        log_level: Level::from_str(&settings.logging.level).unwrap_or(Level::INFO),
        module_levels: Vec::new(),
        log_to_sqlite: settings.logging.log_to_sqlite,
        log_db_path: settings.log_db_path(),
        log_retention_days: settings.logging.retention_days,
    }
}

fn completion_provider(settings: &AbrigoSettings, secrets: &Secrets) -> Result<Arc<dyn CompletionProvider>> {
    let c = &settings.completion;
    let roster = ModelRoster {
        standard: TierModel::new(&c.standard_model, c.standard_max_tokens),
        advanced: TierModel::new(&c.advanced_model, c.advanced_max_tokens),
    }
    .clamped();
    let api_key = secrets.require_api_key()?.clone();
    let anthropic = AnthropicCompletion::with_base_url(api_key, roster, &c.base_url)
        .context("Failed to build completion client")?;
    let reliability = ReliableConfig {
        max_retries: c.max_retries,
        base_delay: Duration::from_millis(c.retry_base_delay_ms),
        ..Default::default()
    };
    Ok(Arc::new(ReliableCompletion::new(anthropic, reliability)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.settings {
        Some(path) => abrigo_settings::load_settings_from_path(path),
        None => abrigo_settings::load_settings(),
    }
    .context("Failed to load settings")?;
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    if let Some(db) = &cli.db {
        settings.database.path = db.to_string_lossy().into_owned();
    }

    if settings.logging.log_to_sqlite {
        ensure_parent_dir(&settings.log_db_path())?;
    }
    let _telemetry = abrigo_telemetry::init_telemetry(telemetry_config(&settings));

    let secrets = Secrets::from_env();
    let master = secrets.require_master_key()?.clone();
    let jwt_secret = secrets.require_jwt_secret()?.clone();
    let provider = completion_provider(&settings, &secrets)?;

    let db_path = settings.database_path();
    ensure_parent_dir(&db_path)?;
    let db = Database::open(&db_path).with_context(|| format!("Failed to open database: {}", db_path.display()))?;

    let keys = KeyService::new(db.clone(), master);
    let pipeline_config = PipelineConfig {
        completion_timeout: Duration::from_millis(settings.completion.timeout_ms),
        ..Default::default()
    };
    let pipeline = MessagePipeline::new(db.clone(), keys.clone(), provider, pipeline_config);
    let cache: Option<Arc<dyn Cache>> = settings.cache.enabled.then(|| Arc::new(MemoryCache::new()) as Arc<dyn Cache>);
    let handlers = match cache {
        Some(cache) => {
            let ttl = Duration::from_secs(settings.cache.ttl_secs);
            let pipeline = pipeline.with_cache(Arc::clone(&cache), ttl);
            HandlerState::new(db, keys, pipeline).with_cache(cache)
        }
        None => {
            warn!("cache disabled; context is rebuilt on every message");
            HandlerState::new(db, keys, pipeline)
        }
    };

    let mut verifier = JwtVerifier::new(&jwt_secret.0);
    if let Some(issuer) = &settings.auth.issuer {
        verifier = verifier.with_issuer(issuer);
    }
    if let Some(audience) = &settings.auth.audience {
        verifier = verifier.with_audience(audience);
    }

    let server = &settings.server;
    let config = ServerConfig {
        host: server.host.clone(),
        port: server.port,
        max_send_queue: server.max_send_queue,
        heartbeat: Duration::from_millis(server.heartbeat_interval_ms).max(MIN_LIVENESS),
        client_timeout: Duration::from_millis(server.client_timeout_ms).max(MIN_LIVENESS),
        frontend_url: server.frontend_url.clone(),
        ..Default::default()
    };
    let handle = abrigo_server::start(config, handlers, Arc::new(verifier))
        .await
        .context("Failed to start server")?;
    info!(port = handle.port, "abrigo ready");

    tokio::select! {
        _ = handle.wait() => warn!("server task ended"),
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for ctrl+c")?;
            info!("shutting down");
        }
    }
    Ok(())
}
