//! Candle feed clients.

pub mod binance;

pub use binance::BinanceClient;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::Candle;
use crate::Result;

/// Largest page a feed returns for one request.
pub const MAX_FEED_PAGE: usize = 1000;

/// One paged candle request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRequest {
    pub symbol: String,
    /// Feed-facing interval token, e.g. `1h`.
    pub interval: String,
    pub limit: usize,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// External source of candles.
///
/// Implementations return bars in ascending open-time order within
/// `[start, end]`, but may include bars slightly before `start`; callers
/// re-filter.
#[async_trait]
pub trait CandleFeed: Send + Sync {
    async fn fetch(&self, request: FeedRequest) -> Result<Vec<Candle>>;
}
