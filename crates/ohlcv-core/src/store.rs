//! Time-series storage boundary for candles.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::types::{Candle, SeriesKey};
use crate::Result;

/// Durable candle storage keyed by (source, symbol, cadence, open time).
#[async_trait]
pub trait CandleStore: Send + Sync {
    /// Latest stored open time for the series, the synchronization cursor.
    async fn latest_open_time(&self, key: &SeriesKey) -> Result<Option<DateTime<Utc>>>;

    /// Insert or overwrite candles by primary key. Returns rows affected.
    ///
    /// Existing rows are replaced in full, including optional columns the
    /// incoming candle leaves empty.
    async fn upsert(&self, key: &SeriesKey, candles: &[Candle]) -> Result<u64>;

    /// The newest `limit` candles (all if `None`), oldest first.
    async fn recent(&self, key: &SeriesKey, limit: Option<usize>) -> Result<Vec<Candle>>;

    /// Number of stored candles for the series.
    async fn count(&self, key: &SeriesKey) -> Result<u64>;
}

/// In-memory candle storage for tests and offline runs.
#[derive(Clone, Default)]
pub struct MemoryCandleStore {
    series: Arc<RwLock<HashMap<SeriesKey, BTreeMap<DateTime<Utc>, Candle>>>>,
}

impl MemoryCandleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CandleStore for MemoryCandleStore {
    async fn latest_open_time(&self, key: &SeriesKey) -> Result<Option<DateTime<Utc>>> {
        let series = self.series.read().await;
        Ok(series
            .get(key)
            .and_then(|bars| bars.keys().next_back().copied()))
    }

    async fn upsert(&self, key: &SeriesKey, candles: &[Candle]) -> Result<u64> {
        if candles.is_empty() {
            return Ok(0);
        }

        let mut series = self.series.write().await;
        let bars = series.entry(key.clone()).or_default();
        for candle in candles {
            bars.insert(candle.open_time, candle.clone());
        }

        Ok(candles.len() as u64)
    }

    async fn recent(&self, key: &SeriesKey, limit: Option<usize>) -> Result<Vec<Candle>> {
        let series = self.series.read().await;
        let Some(bars) = series.get(key) else {
            return Ok(Vec::new());
        };

        let skip = limit.map(|l| bars.len().saturating_sub(l)).unwrap_or(0);
        Ok(bars.values().skip(skip).cloned().collect())
    }

    async fn count(&self, key: &SeriesKey) -> Result<u64> {
        let series = self.series.read().await;
        Ok(series.get(key).map(|bars| bars.len() as u64).unwrap_or(0))
    }
}
