//! Candlekeep Scheduler
//!
//! Collects price snapshots, runs per-(asset, interval) candle ingestion on
//! a fixed cadence and serves health, readiness, metrics and completeness
//! endpoints. Only one process per lock file runs the jobs.

use candlekeep::config::Settings;
use candlekeep::core::runtime::IngestRuntime;
use candlekeep::db::PostgresStore;
use candlekeep::logging;
use candlekeep::metrics::Metrics;
use candlekeep::services::coingecko::CoinGeckoFeed;
use dotenvy::dotenv;
use std::sync::Arc;
use tokio::signal;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    dotenv().ok();
    logging::init_logging();

    let settings = Settings::from_env()?;
    info!("Starting Candlekeep Scheduler");
    info!(environment = %settings.environment, "Environment");

    let metrics = Arc::new(Metrics::new()?);

    info!("Initializing Postgres connection...");
    let store = match PostgresStore::connect(&settings.database_url).await {
        Ok(store) => {
            info!("Postgres connected");
            metrics.set_database_connected(true);
            Arc::new(store)
        }
        Err(e) => {
            warn!(error = %e, "Failed to connect to Postgres");
            return Err(format!("Postgres connection required for scheduler: {}", e).into());
        }
    };

    let feed = Arc::new(CoinGeckoFeed::new(
        settings.coingecko_base_url.clone(),
        settings.coingecko_vs_currency.clone(),
    )?);

    info!(
        assets = ?settings.ingest_assets,
        intervals = ?settings.ingest_intervals.iter().map(|i| i.code()).collect::<Vec<_>>(),
        port = settings.port,
        "Ingestion configured"
    );

    let runtime = IngestRuntime::new(settings, metrics, store.clone(), store)
        .with_feed(feed)
        .start()
        .await?;

    if runtime.scheduler().is_none() {
        warn!("Scheduler not running in this process; serving endpoints only");
    }

    info!("Scheduler started, waiting for shutdown signal...");
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Shutting down scheduler...");
            runtime.shutdown().await;
            info!("Scheduler stopped");
        }
    }

    Ok(())
}
