//! Delivery coordinator server.
//!
//! This binary:
//! - Connects the `PostgreSQL` state store and applies migrations
//! - Connects the Redis lock service and the Redpanda message bus
//! - Starts the ingest and rollback consumers
//! - Serves the HTTP API until Ctrl+C / SIGTERM, then drains the buffers
//!
//! # Usage
//!
//! ```bash
//! # Start infrastructure
//! docker compose up -d
//!
//! # Run server
//! cargo run -p delivery-server
//! ```

use delivery_runtime::metrics::MetricsServer;
use delivery_server::{Config, DeliveryApp, shutdown_signal};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,delivery=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting delivery coordinator...");

    let config = Config::from_env()?;
    tracing::info!(
        redpanda = %config.redpanda.brokers,
        consumer_group = %config.redpanda.consumer_group,
        batch_size = config.pipeline.batch_size,
        "Configuration loaded"
    );

    MetricsServer::new(config.server.metrics_addr()?).start()?;

    let app = DeliveryApp::connect(&config).await?;
    let listener = tokio::net::TcpListener::bind(config.server.http_addr()?).await?;
    app.serve(listener, shutdown_signal()).await?;

    tracing::info!("Delivery coordinator stopped");
    Ok(())
}
