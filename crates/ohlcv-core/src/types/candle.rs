//! Candle records and the keys they are stored under.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One OHLCV bar as returned by a feed and persisted by a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub quote_volume: Option<f64>,
    pub trade_count: Option<i64>,
    pub taker_buy_base: Option<f64>,
    pub taker_buy_quote: Option<f64>,
}

impl Candle {
    /// Create a candle with only the required OHLCV columns populated.
    pub fn new(
        open_time: DateTime<Utc>,
        close_time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            open_time,
            close_time,
            open,
            high,
            low,
            close,
            volume,
            quote_volume: None,
            trade_count: None,
            taker_buy_base: None,
            taker_buy_quote: None,
        }
    }

    /// Set quote volume and trade count.
    pub fn with_activity(mut self, quote_volume: f64, trade_count: i64) -> Self {
        self.quote_volume = Some(quote_volume);
        self.trade_count = Some(trade_count);
        self
    }

    /// Set taker buy volumes.
    pub fn with_taker_buy(mut self, base: f64, quote: f64) -> Self {
        self.taker_buy_base = Some(base);
        self.taker_buy_quote = Some(quote);
        self
    }
}

/// Identifies one persisted series: (source, symbol, cadence).
///
/// Symbols are stored uppercase and cadence keys lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub source: String,
    pub symbol: String,
    pub cadence: String,
}

impl SeriesKey {
    pub fn new(source: &str, symbol: &str, cadence: &str) -> Self {
        Self {
            source: source.to_string(),
            symbol: symbol.to_uppercase(),
            cadence: cadence.to_lowercase(),
        }
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.source, self.symbol, self.cadence)
    }
}
