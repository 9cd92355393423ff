//! Strategy interface and the name-based registry used to select one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use ohlcv_core::types::Candle;
use ohlcv_core::{Error, Result};

/// Outcome of evaluating a strategy at one base bar.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub triggered: bool,
    /// Human-readable description, carried into the trade record.
    pub message: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl Signal {
    pub fn enter(message: impl Into<String>) -> Self {
        Self {
            triggered: true,
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn hold(message: impl Into<String>) -> Self {
        Self {
            triggered: false,
            message: message.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Aligned view of every cadence at one base bar.
///
/// Each slice holds the bars of that cadence whose open time is at or before
/// the current base bar, oldest first.
#[derive(Debug, Clone)]
pub struct StrategyContext<'a> {
    pub symbol: &'a str,
    /// Cadence being replayed; its last bar is the current bar.
    pub base: &'a str,
    pub candles: BTreeMap<&'a str, &'a [Candle]>,
}

impl<'a> StrategyContext<'a> {
    pub fn new(symbol: &'a str, base: &'a str) -> Self {
        Self {
            symbol,
            base,
            candles: BTreeMap::new(),
        }
    }

    /// The bar being evaluated.
    pub fn current(&self) -> Option<&'a Candle> {
        self.latest(self.base)
    }

    pub fn series(&self, cadence: &str) -> Option<&'a [Candle]> {
        self.candles.get(cadence).copied()
    }

    /// Most recent bar of a cadence.
    pub fn latest(&self, cadence: &str) -> Option<&'a Candle> {
        self.series(cadence).and_then(|bars| bars.last())
    }
}

/// A trading rule evaluated once per base bar.
///
/// Implementations must not depend on state carried between calls; the
/// simulator may evaluate bars in any number of runs.
pub trait Strategy: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate(&self, context: &StrategyContext<'_>) -> Signal;
}

/// Enters on every bar. Useful as a baseline for the exit rules alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysEnter;

impl Strategy for AlwaysEnter {
    fn name(&self) -> &str {
        "always_enter"
    }

    fn evaluate(&self, context: &StrategyContext<'_>) -> Signal {
        let close = context.current().map(|bar| bar.close);

        match close {
            Some(price) => Signal::enter(format!("{} entry at {:.4}", context.symbol, price))
                .with_metadata("close", price),
            None => Signal::enter(format!("{} entry", context.symbol)),
        }
    }
}

type StrategyFactory = Box<dyn Fn() -> Box<dyn Strategy> + Send + Sync>;

/// Name to constructor map, populated once at startup.
pub struct StrategyRegistry {
    factories: BTreeMap<String, StrategyFactory>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self {
            factories: BTreeMap::new(),
        }
    }

    /// Registry with every built-in strategy.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("always_enter", || Box::new(AlwaysEnter));
        registry
    }

    /// Register a constructor under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Strategy> + Send + Sync + 'static,
    {
        self.factories.insert(name.to_lowercase(), Box::new(factory));
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Strategy>> {
        self.factories
            .get(&name.to_lowercase())
            .map(|factory| factory())
            .ok_or_else(|| {
                Error::invalid_parameter(
                    "strategy",
                    format!("unknown strategy '{}' (available: {})", name, self.names().join(", ")),
                )
            })
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }
}

impl Default for StrategyRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.names())
            .finish()
    }
}
