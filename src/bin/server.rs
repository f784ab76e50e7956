//! NDJSON Sync Server
//!
//! Holds Automerge documents in memory and syncs them with any number of
//! clients over streaming HTTP requests.
//!
//! # Configuration
//!
//! Environment variables:
//! - `NDJSON_SYNC_BIND`: Address to listen on (default: 127.0.0.1:8080)
//! - `NDJSON_SYNC_LOG`: Tracing filter (default: ndjson_sync=info,tower_http=info)
//! - `NDJSON_SYNC_CONFIG`: Path to config file (default: ~/.config/ndjson-sync/server.yaml)
//!
//! # Config File Format
//!
//! ```yaml
//! bind: "0.0.0.0:8080"
//! log_filter: "ndjson_sync=debug"
//! ```
//!
//! # Endpoints
//!
//! - `GET /health`: Health check endpoint
//! - `GET /{id}`: Saved bytes of a document
//! - `PUT /{id}`: Sync exchange on a document

use ndjson_sync::config::ServerConfig;
use ndjson_sync::server::{router, DocRegistry};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let config = match ServerConfig::load(None) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_new(&config.log_filter)
                .unwrap_or_else(|_| "ndjson_sync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let shutdown = CancellationToken::new();
    let app = router(DocRegistry::new(), shutdown.clone());

    let listener = match tokio::net::TcpListener::bind(&config.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", config.bind, e);
            std::process::exit(1);
        }
    };
    tracing::info!("Starting server on {}", config.bind);

    let signal = {
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutting down");
            // Running exchanges never end on their own.
            shutdown.cancel();
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await
    {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
