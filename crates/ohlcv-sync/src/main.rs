//! Candle Sync
//!
//! Keeps stored candle series current with the exchange feed.

use anyhow::Result;
use clap::Parser;
use ohlcv_core::api::BinanceClient;
use ohlcv_core::config::{parse_start_date, split_csv, Settings};
use ohlcv_core::db::{self, PgCandleStore};
use ohlcv_core::logging;
use ohlcv_core::types::TimeframeCatalog;
use ohlcv_sync::{CandleSynchronizer, TokioScheduler};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "candle-sync", about = "Synchronize exchange candles into PostgreSQL")]
struct Args {
    /// Comma separated symbols, overriding SYMBOLS
    #[arg(long)]
    symbols: Option<String>,

    /// Comma separated cadences, overriding TIMEFRAMES
    #[arg(long)]
    timeframes: Option<String>,

    /// Bootstrap start for empty series (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    start_date: Option<String>,

    /// Run a single synchronization pass and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("candle_sync=info,ohlcv_sync=info,ohlcv_core=info,sqlx=warn");

    let args = Args::parse();
    let mut settings = Settings::from_env()?;

    let symbols = split_csv(args.symbols.as_deref());
    if !symbols.is_empty() {
        settings.symbols = symbols;
    }
    let timeframes = split_csv(args.timeframes.as_deref());
    if !timeframes.is_empty() {
        settings.timeframes = timeframes;
    }
    if let Some(raw) = args.start_date.as_deref() {
        settings.candle_start_date = parse_start_date(raw)?;
    }

    info!(
        exchange = %settings.exchange,
        symbols = ?settings.symbols,
        timeframes = ?settings.timeframes,
        "Starting candle sync"
    );

    let pool = db::create_pool(&settings.database).await?;
    if !settings.skip_migrations {
        db::run_migrations(&pool).await?;
    }

    let store = Arc::new(PgCandleStore::new(pool));
    let feed = Arc::new(BinanceClient::new(&settings.feed)?);
    let catalog = TimeframeCatalog::resolve(&settings.timeframes);
    let sync = Arc::new(CandleSynchronizer::new(
        store,
        feed,
        catalog,
        settings.exchange.clone(),
    ));

    let report = sync
        .sync_each(
            settings.symbols.as_slice(),
            None,
            Some(settings.candle_start_date),
            None,
        )
        .await;
    info!(
        inserted = report.total_inserted(),
        failed = report.failed.len(),
        "Initial synchronization pass complete"
    );

    if args.once {
        if !report.is_complete() {
            anyhow::bail!("{} series failed to synchronize", report.failed.len());
        }
        return Ok(());
    }

    let scheduler = TokioScheduler::new();
    let jobs = sync.schedule_periodic(&scheduler, settings.symbols.clone(), None)?;
    info!(jobs, "Periodic synchronization running; press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
    scheduler.shutdown();

    Ok(())
}
