//! Bar-by-bar replay of a base cadence with aligned multi-cadence context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use ohlcv_core::types::{Candle, TimeframeCatalog};
use ohlcv_core::{Error, Result};

use crate::data_store::{CandleLoader, CandleSet};
use crate::exit::{ExitReason, ExitRule};
use crate::strategy::{Strategy, StrategyContext};

/// Configuration for a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Cadence whose bars drive the replay.
    pub base_cadence: String,
    /// Number of base bars to load.
    pub limit: usize,
    /// Bars after entry before a forced exit.
    pub lookahead: usize,
    /// Take-profit fraction (0.02 for 2%).
    pub take_profit: f64,
    /// Trailing-stop fraction below the running high.
    pub trailing_stop: f64,
    /// Start used to backfill series that have no stored candles.
    pub bootstrap_start: Option<DateTime<Utc>>,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            base_cadence: "1h".to_string(),
            limit: 500,
            lookahead: 3,
            take_profit: 0.02,
            trailing_stop: 0.02,
            bootstrap_start: None,
        }
    }
}

/// Record of one simulated trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    /// Open time of the bar that triggered the entry.
    pub signal_time: DateTime<Utc>,
    /// Signal description.
    pub message: String,
    pub entry_price: f64,
    pub exit_price: f64,
    pub exit_time: DateTime<Utc>,
    /// Fractional return, `(exit - entry) / entry`.
    pub return_pct: f64,
    pub exit_reason: ExitReason,
}

/// Result of a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub symbol: String,
    pub strategy: String,
    /// Trades in chronological order.
    pub trades: Vec<TradeRecord>,
    /// Fraction of trades with a positive return.
    pub win_rate: f64,
    /// Arithmetic mean of trade returns.
    pub average_return: f64,
    /// Compounded return over all trades, `prod(1 + r) - 1`.
    pub cumulative_return: f64,
    /// Base bars where the strategy was evaluated.
    pub signals_checked: usize,
    pub signals_triggered: usize,
}

impl BacktestSummary {
    pub fn from_trades(
        symbol: &str,
        strategy: &str,
        trades: Vec<TradeRecord>,
        signals_checked: usize,
        signals_triggered: usize,
    ) -> Self {
        let (win_rate, average_return, cumulative_return) = if trades.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let count = trades.len() as f64;
            let wins = trades.iter().filter(|t| t.return_pct > 0.0).count() as f64;
            let total: f64 = trades.iter().map(|t| t.return_pct).sum();
            let growth = trades.iter().fold(1.0, |acc, t| acc * (1.0 + t.return_pct));
            (wins / count, total / count, growth - 1.0)
        };

        Self {
            symbol: symbol.to_string(),
            strategy: strategy.to_string(),
            trades,
            win_rate,
            average_return,
            cumulative_return,
            signals_checked,
            signals_triggered,
        }
    }

    pub fn total_trades(&self) -> usize {
        self.trades.len()
    }

    pub fn winning_trades(&self) -> usize {
        self.trades.iter().filter(|t| t.return_pct > 0.0).count()
    }

    pub fn best_trade(&self) -> Option<&TradeRecord> {
        self.trades
            .iter()
            .max_by(|a, b| a.return_pct.total_cmp(&b.return_pct))
    }

    pub fn worst_trade(&self) -> Option<&TradeRecord> {
        self.trades
            .iter()
            .min_by(|a, b| a.return_pct.total_cmp(&b.return_pct))
    }
}

/// The backtest simulator engine.
pub struct BacktestSimulator {
    loader: CandleLoader,
    catalog: TimeframeCatalog,
    config: BacktestConfig,
    exit_rule: ExitRule,
    warmup: usize,
}

impl BacktestSimulator {
    /// Validate the configuration against the loader's catalog.
    ///
    /// Fails with [`Error::MissingBaseCadence`] if the base cadence is not
    /// configured and with [`Error::InvalidParameter`] for non-positive limit,
    /// lookahead, or exit fractions.
    pub fn new(loader: CandleLoader, config: BacktestConfig) -> Result<Self> {
        let catalog = loader.catalog().clone();
        let warmup = catalog.compute_warmup(&config.base_cadence)?;
        catalog.compute_fetch_limits(&config.base_cadence, config.limit)?;
        let exit_rule = ExitRule::new(config.take_profit, config.trailing_stop, config.lookahead)?;

        debug!(
            cadences = ?catalog.names(),
            base = %config.base_cadence,
            warmup,
            "Backtest simulator initialized"
        );

        Ok(Self {
            loader,
            catalog,
            config,
            exit_rule,
            warmup,
        })
    }

    /// Base bars that must precede the first evaluated bar.
    pub fn warmup(&self) -> usize {
        self.warmup
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Load candles for `symbol` and replay them.
    #[instrument(skip(self, strategy), fields(strategy = strategy.name()))]
    pub async fn run(&self, symbol: &str, strategy: &dyn Strategy) -> Result<BacktestSummary> {
        info!(
            limit = self.config.limit,
            lookahead = self.config.lookahead,
            take_profit = self.config.take_profit,
            trailing_stop = self.config.trailing_stop,
            "Starting backtest"
        );

        let candles = self
            .loader
            .load(
                symbol,
                &self.config.base_cadence,
                self.config.limit,
                self.config.bootstrap_start,
            )
            .await?;

        self.replay(symbol, &candles, strategy)
    }

    /// Replay already-loaded candles.
    ///
    /// Each base bar from the warmup index up to the last bar that still has
    /// `lookahead` bars after it is evaluated, unless some cadence has fewer
    /// bars at or before it than that cadence's minimum context.
    pub fn replay(
        &self,
        symbol: &str,
        candles: &CandleSet,
        strategy: &dyn Strategy,
    ) -> Result<BacktestSummary> {
        let base_cadence = &self.config.base_cadence;
        let base = candles
            .get(base_cadence)
            .ok_or_else(|| Error::MissingBaseCadence(base_cadence.clone()))?;

        let lookahead = self.exit_rule.lookahead;
        if base.len() <= self.warmup + lookahead {
            warn!(
                symbol,
                have = base.len(),
                need = self.warmup + lookahead + 1,
                "Base series too short for the backtest window"
            );
            return Err(Error::InsufficientData {
                symbol: symbol.to_uppercase(),
                cadence: base_cadence.clone(),
                required: self.warmup + lookahead + 1,
                available: base.len(),
            });
        }

        let minimums: Vec<(&str, &[Candle], usize)> = candles
            .iter()
            .map(|(name, series)| {
                let min_context = self
                    .catalog
                    .get(name)
                    .map(|meta| meta.min_context())
                    .unwrap_or(2);
                (name, series, min_context)
            })
            .collect();

        let end = base.len() - lookahead;
        let total_iterations = end - self.warmup;
        let progress_interval = (total_iterations / 10).max(1);
        info!(
            total_iterations,
            from = self.warmup,
            to = end,
            "Replaying base cadence"
        );

        let mut trades = Vec::new();
        let mut signals_checked = 0;
        let mut signals_triggered = 0;

        for idx in self.warmup..end {
            let iteration = idx - self.warmup;
            if iteration % progress_interval == 0 || idx == end - 1 {
                debug!(
                    progress_pct = iteration as f64 / total_iterations as f64 * 100.0,
                    iteration,
                    total_iterations,
                    trades = trades.len(),
                    "Backtest progress"
                );
            }

            let current = &base[idx];
            let Some(context) =
                build_context(symbol, &self.config.base_cadence, current.open_time, &minimums)
            else {
                continue;
            };

            let signal = strategy.evaluate(&context);
            signals_checked += 1;
            if !signal.triggered {
                continue;
            }
            signals_triggered += 1;

            let entry_price = current.close;
            let outcome = self
                .exit_rule
                .simulate(entry_price, &base[idx + 1..=idx + lookahead])?;
            let return_pct = (outcome.price - entry_price) / entry_price;

            debug!(
                signal_time = %current.open_time,
                entry = entry_price,
                exit = outcome.price,
                reason = %outcome.reason,
                return_pct,
                "Trade completed"
            );

            trades.push(TradeRecord {
                signal_time: current.open_time,
                message: signal.message,
                entry_price,
                exit_price: outcome.price,
                exit_time: outcome.time,
                return_pct,
                exit_reason: outcome.reason,
            });
        }

        let summary = BacktestSummary::from_trades(
            symbol,
            strategy.name(),
            trades,
            signals_checked,
            signals_triggered,
        );

        if summary.trades.is_empty() {
            warn!(symbol, signals_checked, "No trades were executed during the backtest");
        } else {
            info!(
                symbol,
                trades = summary.total_trades(),
                signals_checked,
                win_rate = summary.win_rate,
                average_return = summary.average_return,
                cumulative_return = summary.cumulative_return,
                "Backtest completed"
            );
        }

        Ok(summary)
    }
}

/// Slice every cadence up to `at`. Returns `None` if any cadence has less
/// than its minimum context.
fn build_context<'a>(
    symbol: &'a str,
    base: &'a str,
    at: DateTime<Utc>,
    series: &[(&'a str, &'a [Candle], usize)],
) -> Option<StrategyContext<'a>> {
    let mut context = StrategyContext::new(symbol, base);
    for &(name, candles, min_context) in series {
        let visible = candles.partition_point(|c| c.open_time <= at);
        if visible < min_context {
            debug!(at = %at, cadence = name, visible, required = min_context, "Insufficient context; skipping bar");
            return None;
        }
        context.candles.insert(name, &candles[..visible]);
    }
    Some(context)
}
