//! Candlekeep Backfill
//!
//! Detects and repairs gaps for one (asset, interval) range, printing the
//! result as JSON. Exits non-zero when the range is not fully covered.

use candlekeep::config::Settings;
use candlekeep::db::{CandleStore, MemoryStore, PostgresStore, SampleStore};
use candlekeep::ingestion::{BackfillExecutor, CompletenessChecker, SampleIngestor};
use candlekeep::logging;
use candlekeep::models::{days_before, parse_timestamp, Interval};
use chrono::{DateTime, Utc};
use clap::Parser;
use dotenvy::dotenv;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "backfill")]
#[command(about = "Detect and fill candle gaps for one asset and interval.", version)]
struct Cli {
    #[arg(long)]
    asset: String,
    /// Interval code, e.g. 1m, 5m, 1h.
    #[arg(long)]
    interval: String,
    /// Look back this many days from now. Alternative to --start/--end.
    #[arg(long, conflicts_with_all = ["start", "end"])]
    days: Option<i64>,
    /// RFC 3339 timestamp or YYYY-MM-DD.
    #[arg(long, requires = "end")]
    start: Option<String>,
    #[arg(long, requires = "start")]
    end: Option<String>,
    #[arg(long)]
    max_window_days: Option<i64>,
    #[arg(long)]
    max_gaps: Option<usize>,
    #[arg(long)]
    max_candles: Option<u64>,
    /// Only report gaps, do not fill them.
    #[arg(long)]
    check: bool,
    /// Use an in-process store instead of Postgres.
    #[arg(long)]
    memory: bool,
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,
}

fn resolve_range(cli: &Cli) -> Result<(DateTime<Utc>, DateTime<Utc>), String> {
    if let Some(days) = cli.days {
        if days <= 0 {
            return Err("--days must be positive".to_string());
        }
        let end = Utc::now();
        let start = days_before(end, days).ok_or_else(|| format!("--days {} is out of range", days))?;
        return Ok((start, end));
    }

    match (&cli.start, &cli.end) {
        (Some(start), Some(end)) => {
            let start = parse_timestamp(start).ok_or_else(|| format!("invalid --start '{}'", start))?;
            let end = parse_timestamp(end).ok_or_else(|| format!("invalid --end '{}'", end))?;
            if start >= end {
                return Err("--start must be before --end".to_string());
            }
            Ok((start, end))
        }
        _ => Err("use either --days N or --start and --end".to_string()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    logging::init_cli_logging();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;
    let interval = Interval::parse(&cli.interval)?;
    let (start, end) = resolve_range(&cli)?;

    let mut caps = settings.backfill_caps;
    if let Some(days) = cli.max_window_days {
        if days <= 0 {
            return Err("--max-window-days must be positive".into());
        }
        caps.max_window_days = days;
    }
    if let Some(gaps) = cli.max_gaps {
        caps.max_gaps_per_run = gaps;
    }
    if let Some(candles) = cli.max_candles {
        caps.max_candles_per_run = candles;
    }

    let (candles, samples): (Arc<dyn CandleStore>, Arc<dyn SampleStore>) = if cli.memory {
        info!("Using in-process store");
        let store = Arc::new(MemoryStore::new());
        let candles: Arc<dyn CandleStore> = store.clone();
        let samples: Arc<dyn SampleStore> = store;
        (candles, samples)
    } else {
        let url = cli
            .database_url
            .clone()
            .unwrap_or_else(|| settings.database_url.clone());
        let store = Arc::new(PostgresStore::connect(&url).await?);
        info!("Postgres connected");
        let candles: Arc<dyn CandleStore> = store.clone();
        let samples: Arc<dyn SampleStore> = store;
        (candles, samples)
    };

    info!(
        asset = %cli.asset,
        interval = %interval,
        start = %start,
        end = %end,
        check = cli.check,
        "Backfill requested"
    );

    if cli.check {
        let report = CompletenessChecker::new(candles)
            .generate_report(&cli.asset, interval, start, end)
            .await?;
        println!("{}", serde_json::to_string_pretty(&report.to_dict())?);
        if report.gaps_found() {
            std::process::exit(1);
        }
        return Ok(());
    }

    let ingestor = Arc::new(SampleIngestor::new(
        samples,
        candles.clone(),
        settings.ingest_lookback_days,
    ));
    let executor = BackfillExecutor::new(candles, ingestor, caps);
    let result = executor
        .execute_backfill(&cli.asset, interval, start, end)
        .await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.completed {
        std::process::exit(1);
    }
    Ok(())
}
