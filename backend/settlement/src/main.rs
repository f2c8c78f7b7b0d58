//! VCoin settlement service: entry point.
//!
//! Starts a background settlement job that closes projects past their
//! deadline and resolves their oversubscription at an oracle price, and
//! exposes an Axum REST API for founders, investors and payment callbacks.

mod api;
mod config;
mod db;
mod errors;
mod events;
mod ledger;
mod oracle;
mod settlement;

use std::sync::Arc;

use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;
use oracle::HttpPriceOracle;
use settlement::SettlementState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;

    // Set up the SQLite connection pool and run migrations.
    let pool = db::init_pool(&config.database_url).await?;

    let client = Client::builder()
        .timeout(std::time::Duration::from_secs(30))
        .build()?;

    let shutdown = CancellationToken::new();

    // ─── Background settlement ────────────────────────────
    let settlement_state = Arc::new(SettlementState {
        pool: pool.clone(),
        oracle: HttpPriceOracle::new(client, &config),
        config: config.clone(),
    });
    let settlement_task = tokio::spawn(settlement::run(settlement_state, shutdown.clone()));

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(api::ApiState { pool });

    let app = api::router(api_state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    settlement_task.await?;
    info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                tracing::error!("Failed to listen for shutdown signal: {e}");
            }
        }
        _ = shutdown.cancelled() => {}
    }
    info!("Shutdown requested");
    shutdown.cancel();
}
