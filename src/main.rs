mod config;
mod liveness;
mod llm;
mod platform;
mod relay;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use teloxide::Bot;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::llm::GeminiClient;
use crate::relay::Relay;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relaybot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Optional config file; environment variables override it
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    if let Some(path) = &config_path {
        info!("Loading configuration from: {}", path.display());
    }
    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            // The relay cannot run, but uptime checks should still be answered.
            let e = e.context("Failed to load configuration");
            error!("{:#}", e);
            let port = Config::port_from_env();
            warn!("Relay not started; serving liveness only on port {}", port);
            if let Err(serve_err) = liveness::serve(port).await {
                error!("Liveness responder stopped: {:#}", serve_err);
            }
            return Err(e);
        }
    };

    info!("Configuration loaded successfully");
    info!("  Primary model: {}", config.gemini.primary_model);
    info!("  Fallback model: {}", config.gemini.fallback_model);
    info!("  Liveness port: {}", config.server.port);

    if config.gemini.api_key.is_empty() {
        warn!("GOOGLE_API_KEY is not set; every reply will be the apology text");
    }

    liveness::spawn(config.server.port);

    let token = config.require_telegram_token().inspect_err(|e| error!("{:#}", e))?;

    let client = GeminiClient::new(config.gemini.clone())?;
    let relay = Arc::new(Relay::new(
        client,
        config.gemini.primary_model.clone(),
        config.gemini.fallback_model.clone(),
    ));

    info!("Bot is starting...");
    platform::telegram::run(relay, Bot::new(token)).await?;

    Ok(())
}
