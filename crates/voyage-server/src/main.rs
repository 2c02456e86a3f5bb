//! Voyage gateway binary.

use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{error, info, warn};
use voyage_config::{load_config, LogFormat as ConfigLogFormat, VoyageConfig};
use voyage_providers::{GeminiClient, GeminiConfig};
use voyage_server::{AppState, Server, ServerConfig};
use voyage_telemetry::{init_logging, LogFormat, LoggingConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config().await?;

    init_logging(&logging_config(&config))?;
    install_panic_hook();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting voyage gateway");

    let api_key = config.provider.resolve_api_key().map_or_else(
        || {
            warn!(
                env = %config.provider.api_key_env,
                "No Gemini API key configured; model calls will fail until one is set"
            );
            String::new()
        },
        |key| key.expose_secret().to_string(),
    );

    let client = GeminiClient::new(
        GeminiConfig::new(api_key)
            .with_base_url(config.provider.base_url.clone())
            .with_timeout(config.provider.timeout),
    )?;

    let server_config = ServerConfig::from(&config);
    let state = AppState::builder()
        .config(config)
        .backend(Arc::new(client))
        .build()?;

    if let Err(e) = Server::new(server_config, state).run().await {
        error!(error = %e, "Server failed");
        return Err(e.into());
    }

    Ok(())
}

fn logging_config(config: &VoyageConfig) -> LoggingConfig {
    let logging = &config.observability.logging;
    let format = match logging.format {
        ConfigLogFormat::Json => LogFormat::Json,
        ConfigLogFormat::Pretty => LogFormat::Pretty,
        ConfigLogFormat::Compact => LogFormat::Compact,
    };
    LoggingConfig::new()
        .with_level(logging.level.clone())
        .with_format(format)
}

/// Route panics through tracing so they land in the structured log
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_default();
        error!(panic = %info, location = %location, "Panic");
    }));
}
