//! OHLCV Core Library
//!
//! Shared candle types, cadence metadata, the exchange feed client and the
//! time-series storage boundary used by the synchronizer and the backtester.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod store;
pub mod types;

pub use error::{Error, Result};
