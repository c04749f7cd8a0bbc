//! # Tandem Server
//!
//! Rendezvous relay pairing one controller with any number of observers.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings (0.0.0.0:3000)
//! tandem
//!
//! # Run on another port
//! TANDEM_PORT=8080 tandem
//! ```
//!
//! A `tandem.toml` in the working directory, `/etc/tandem/` or
//! `~/.config/tandem/` is picked up when present.

use anyhow::Result;
use tandem_server::{config, handlers, metrics};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Tandem server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
