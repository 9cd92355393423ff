//! Multi-cadence candle loading for backtests.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error};

use ohlcv_core::types::{Candle, TimeframeCatalog};
use ohlcv_core::{Error, Result};
use ohlcv_sync::CandleSynchronizer;

/// Every cadence's series for one symbol, in catalog order.
#[derive(Debug, Clone, Default)]
pub struct CandleSet {
    series: Vec<(String, Vec<Candle>)>,
}

impl CandleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a cadence's series. Bars must be oldest first.
    pub fn insert(&mut self, cadence: &str, candles: Vec<Candle>) {
        let cadence = cadence.to_lowercase();
        match self.series.iter_mut().find(|(name, _)| *name == cadence) {
            Some((_, existing)) => *existing = candles,
            None => self.series.push((cadence, candles)),
        }
    }

    pub fn with_series(mut self, cadence: &str, candles: Vec<Candle>) -> Self {
        self.insert(cadence, candles);
        self
    }

    pub fn get(&self, cadence: &str) -> Option<&[Candle]> {
        let cadence = cadence.to_lowercase();
        self.series
            .iter()
            .find(|(name, _)| *name == cadence)
            .map(|(_, candles)| candles.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Candle])> {
        self.series
            .iter()
            .map(|(name, candles)| (name.as_str(), candles.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

/// Loads the per-cadence windows a backtest needs, backfilling through the
/// synchronizer when the store is short.
#[derive(Clone)]
pub struct CandleLoader {
    synchronizer: Arc<CandleSynchronizer>,
}

impl CandleLoader {
    pub fn new(synchronizer: Arc<CandleSynchronizer>) -> Self {
        Self { synchronizer }
    }

    pub fn catalog(&self) -> &TimeframeCatalog {
        self.synchronizer.catalog()
    }

    /// Load the newest bars of every cadence, sized so each covers the same
    /// wall-clock span as `base_limit` bars of `base_cadence`.
    ///
    /// Fails with [`Error::InsufficientData`] if any cadence is still short
    /// after backfilling from `bootstrap_start`.
    pub async fn load(
        &self,
        symbol: &str,
        base_cadence: &str,
        base_limit: usize,
        bootstrap_start: Option<DateTime<Utc>>,
    ) -> Result<CandleSet> {
        let limits = self.catalog().compute_fetch_limits(base_cadence, base_limit)?;
        debug!(symbol, ?limits, "Computed per-cadence limits");

        let mut set = CandleSet::new();
        for meta in self.catalog().iter() {
            let required = limits.get(&meta.name).copied().unwrap_or(base_limit);
            let candles = self
                .synchronizer
                .ensure_history(symbol, &meta.name, required, bootstrap_start)
                .await?;

            if candles.len() < required {
                error!(
                    symbol,
                    cadence = %meta.name,
                    required,
                    available = candles.len(),
                    "Insufficient candles for backtest"
                );
                return Err(Error::InsufficientData {
                    symbol: symbol.to_uppercase(),
                    cadence: meta.name.clone(),
                    required,
                    available: candles.len(),
                });
            }

            if let (Some(first), Some(last)) = (candles.first(), candles.last()) {
                debug!(
                    symbol,
                    cadence = %meta.name,
                    count = candles.len(),
                    from = %first.open_time,
                    to = %last.open_time,
                    "Loaded candles"
                );
            }
            set.insert(&meta.name, candles);
        }

        Ok(set)
    }
}
