//! OHLCV Lab: candle synchronization and multi-timeframe backtesting
//!
//! This is the root crate that provides benchmark and integration-test access
//! to the workspace crates. For actual functionality, use them directly:
//!
//! - `ohlcv-core`: Candle and cadence types, feed client, candle stores
//! - `ohlcv-sync`: Incremental synchronizer and periodic scheduling
//! - `backtester`: Strategy registry, exit rules, replay simulator

// Re-export for benchmarks
pub use backtester;
pub use ohlcv_core as core;
pub use ohlcv_sync as sync;
