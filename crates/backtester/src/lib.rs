//! Backtester
//!
//! Multi-timeframe replay of stored candles against a pluggable strategy.
//!
//! # Features
//!
//! - **Strategy Trait**: Stateless evaluation interface with an explicit registry
//! - **Candle Loader**: Per-cadence windows sized to the base window, backfilled on demand
//! - **Backtest Simulator**: Warmup-aware replay with aligned multi-cadence context
//! - **Exit Rules**: Take-profit, ratcheting trailing stop, and timeout exit
//!
//! # Example
//!
//! ```ignore
//! use backtester::{BacktestConfig, BacktestSimulator, StrategyRegistry};
//!
//! let registry = StrategyRegistry::with_builtins();
//! let strategy = registry.create("always_enter")?;
//! let simulator = BacktestSimulator::new(synchronizer, BacktestConfig::default())?;
//!
//! let summary = simulator.run("BTCUSDT", strategy.as_ref()).await?;
//! println!("Cumulative: {:.2}%", summary.cumulative_return * 100.0);
//! ```

pub mod data_store;
pub mod exit;
pub mod report;
pub mod simulator;
pub mod strategy;

// Re-exports
pub use data_store::{CandleLoader, CandleSet};
pub use exit::{ExitOutcome, ExitReason, ExitRule, TradeSimulation};
pub use simulator::{BacktestConfig, BacktestSimulator, BacktestSummary, TradeRecord};
pub use strategy::{AlwaysEnter, Signal, Strategy, StrategyContext, StrategyRegistry};
