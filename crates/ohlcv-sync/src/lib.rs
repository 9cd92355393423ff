//! Candle Synchronizer
//!
//! Keeps persisted candle series gap-free and duplicate-free against a paged
//! exchange feed.
//!
//! # Example
//!
//! ```ignore
//! use ohlcv_sync::CandleSynchronizer;
//!
//! let sync = CandleSynchronizer::new(store, feed, catalog, "binance_spot");
//! let stats = sync.sync_one("BTCUSDT", "1h", Some(start), None).await?;
//! println!("{} rows written", stats.inserted);
//! ```

pub mod scheduler;
pub mod synchronizer;

// Re-exports
pub use scheduler::{Job, JobScheduler, TokioScheduler};
pub use synchronizer::{CandleSynchronizer, SyncFailure, SyncReport, SyncStats};
