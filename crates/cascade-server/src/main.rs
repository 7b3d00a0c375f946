//! # Cascade Server
//!
//! Webhook-to-WebSocket broadcast bridge.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! cascade
//!
//! # Run with environment variables
//! CASCADE_PORT=8080 CASCADE_SIGNING_SECRET=whsec_... cascade
//! ```

mod config;
mod dispatch;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cascade=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Cascade server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
