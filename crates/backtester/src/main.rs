//! Backtest
//!
//! Replays stored candles for one symbol against a registered strategy.

use anyhow::Result;
use backtester::report;
use backtester::{BacktestConfig, BacktestSimulator, CandleLoader, StrategyRegistry};
use clap::Parser;
use ohlcv_core::api::BinanceClient;
use ohlcv_core::config::Settings;
use ohlcv_core::db::{self, PgCandleStore};
use ohlcv_core::logging;
use ohlcv_core::types::TimeframeCatalog;
use ohlcv_sync::CandleSynchronizer;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "backtest", about = "Run a strategy backtest over stored candles")]
struct Args {
    #[arg(long)]
    symbol: String,

    /// Registered strategy name, overriding STRATEGY
    #[arg(long)]
    strategy: Option<String>,

    /// Base bars to replay
    #[arg(long, default_value_t = 500)]
    limit: usize,

    /// Bars after entry before a forced exit
    #[arg(long, default_value_t = 3)]
    lookahead: usize,

    #[arg(long, default_value_t = 0.02)]
    take_profit: f64,

    #[arg(long, default_value_t = 0.02)]
    trailing_stop: f64,

    /// Base cadence, overriding BASE_TIMEFRAME
    #[arg(long)]
    base_timeframe: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("backtest=info,backtester=info,ohlcv_sync=info,ohlcv_core=warn,sqlx=warn");

    let args = Args::parse();
    let settings = Settings::from_env()?;

    let strategy_name = args.strategy.unwrap_or_else(|| settings.strategy.clone());
    let base_cadence = args
        .base_timeframe
        .unwrap_or_else(|| settings.base_timeframe.clone())
        .to_lowercase();

    info!(
        symbol = %args.symbol,
        strategy = %strategy_name,
        limit = args.limit,
        lookahead = args.lookahead,
        take_profit = args.take_profit,
        trailing_stop = args.trailing_stop,
        "Backtest starting"
    );

    let registry = StrategyRegistry::with_builtins();
    let strategy = registry.create(&strategy_name)?;

    // The base cadence drives the replay, so it is always part of the catalog.
    let mut timeframes = settings.timeframes.clone();
    if !timeframes.iter().any(|t| t.eq_ignore_ascii_case(&base_cadence)) {
        info!(cadence = %base_cadence, "Adding base cadence to configured timeframes");
        timeframes.push(base_cadence.clone());
    }

    let pool = db::create_pool(&settings.database).await?;
    if !settings.skip_migrations {
        db::run_migrations(&pool).await?;
    }

    let sync = Arc::new(CandleSynchronizer::new(
        Arc::new(PgCandleStore::new(pool)),
        Arc::new(BinanceClient::new(&settings.feed)?),
        TimeframeCatalog::resolve(&timeframes),
        settings.exchange.clone(),
    ));

    let config = BacktestConfig {
        base_cadence,
        limit: args.limit,
        lookahead: args.lookahead,
        take_profit: args.take_profit,
        trailing_stop: args.trailing_stop,
        bootstrap_start: Some(settings.candle_start_date),
    };
    let simulator = BacktestSimulator::new(CandleLoader::new(Arc::clone(&sync)), config)?;

    info!(symbol = %args.symbol, from = %settings.candle_start_date, "Synchronizing candles");
    sync.sync_many(
        std::slice::from_ref(&args.symbol),
        None,
        Some(settings.candle_start_date),
        None,
    )
    .await?;

    let summary = simulator.run(&args.symbol, strategy.as_ref()).await?;
    for line in report::render(&summary) {
        println!("{}", line);
    }

    info!(
        trades = summary.total_trades(),
        win_rate = summary.win_rate,
        average_return = summary.average_return,
        cumulative_return = summary.cumulative_return,
        "Backtest completed"
    );

    Ok(())
}
