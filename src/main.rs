//! Request security and observability gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                    ┌──────────────────────────────────────────────┐
//!                    │                   GATEWAY                     │
//!                    │                                               │
//!   Client Request   │  ┌─────────┐   ┌──────────────────────────┐  │
//!   ─────────────────┼─▶│  http   │──▶│    security pipeline      │  │
//!                    │  │ server  │   │ brute-force → identity    │  │
//!                    │  └─────────┘   │ → permissions → rate      │  │
//!                    │                │   limit → handler         │  │
//!                    │                └──────────┬───────────────┘  │
//!                    │                           │                  │
//!                    │                           ▼                  │
//!   Client Response  │               ┌──────────────────┐           │      Identity
//!   ◀────────────────┼───────────────│ audit + telemetry│◀──────────┼───── Provider
//!                    │               └──────────────────┘           │
//!                    │                                               │
//!                    │  ┌─────────────────────────────────────────┐ │
//!                    │  │          Cross-Cutting Concerns          │ │
//!                    │  │  config reload · cleanup · admin feed    │ │
//!                    │  │  metrics · shutdown coordination         │ │
//!                    │  └─────────────────────────────────────────┘ │
//!                    └──────────────────────────────────────────────┘
//! ```

use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use url::Url;

use auth_gateway::auth::provider::HttpIdentityProvider;
use auth_gateway::config::loader::load_config;
use auth_gateway::config::watcher::ConfigWatcher;
use auth_gateway::store::MemoryStore;
use auth_gateway::{GatewayConfig, HttpServer, Shutdown};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args().nth(1);

    let config = match &config_path {
        Some(path) => load_config(Path::new(path))?,
        None => GatewayConfig::default(),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("auth_gateway={},tower_http=info", config.observability.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        bind_address = %config.listener.bind_address,
        rate_limit_enabled = config.rate_limit.enabled,
        brute_force_enabled = config.brute_force.enabled,
        admin_enabled = config.admin.enabled,
        "Configuration loaded"
    );

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            auth_gateway::observability::metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    // Hot reload only makes sense when a file was given.
    let (config_updates, _watcher_guard) = match &config_path {
        Some(path) => {
            let (watcher, rx) = ConfigWatcher::start(Path::new(path))?;
            (rx, Some(watcher))
        }
        None => {
            let (_tx, rx) = mpsc::unbounded_channel();
            (rx, None)
        }
    };

    let provider = Arc::new(HttpIdentityProvider::new(
        Url::parse(&config.provider.base_url)?,
        config.provider.api_key.clone(),
        config.timeouts.provider_secs,
    ));
    let store = Arc::new(MemoryStore::new());

    let shutdown = Arc::new(Shutdown::new());
    let server_shutdown = shutdown.subscribe();
    let server = HttpServer::new(config, store, provider, &shutdown);
    shutdown.trigger_on_ctrl_c();

    server.run(listener, config_updates, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
