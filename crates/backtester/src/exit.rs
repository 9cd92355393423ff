//! Exit simulation for a single long entry.
//!
//! Each bar after entry is checked in a fixed order: take-profit first, then
//! the trailing stop is ratcheted and checked, and on the final lookahead bar
//! the trade is closed at that bar's close.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use ohlcv_core::types::Candle;
use ohlcv_core::{Error, Result};

/// Terminal state of a simulated trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    TakeProfit,
    TrailingStop,
    TimeoutExit,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::TakeProfit => "take_profit",
            ExitReason::TrailingStop => "trailing_stop",
            ExitReason::TimeoutExit => "timeout_exit",
        }
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated exit parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitRule {
    /// Fraction above entry at which profit is taken.
    pub take_profit: f64,
    /// Fraction below the running high at which the stop sits.
    pub trailing_stop: f64,
    /// Bars after entry before a forced exit.
    pub lookahead: usize,
}

impl ExitRule {
    pub fn new(take_profit: f64, trailing_stop: f64, lookahead: usize) -> Result<Self> {
        if lookahead == 0 {
            return Err(Error::invalid_parameter("lookahead", "backtest lookahead must be positive"));
        }
        if !(take_profit.is_finite() && take_profit > 0.0) {
            return Err(Error::invalid_parameter(
                "take_profit",
                format!("take-profit fraction must be positive, got {}", take_profit),
            ));
        }
        if !(trailing_stop.is_finite() && trailing_stop > 0.0) {
            return Err(Error::invalid_parameter(
                "trailing_stop",
                format!("trailing-stop fraction must be positive, got {}", trailing_stop),
            ));
        }

        Ok(Self {
            take_profit,
            trailing_stop,
            lookahead,
        })
    }

    /// Start tracking a position entered at `entry_price`.
    pub fn open(&self, entry_price: f64) -> TradeSimulation {
        TradeSimulation {
            entry_price,
            target: entry_price * (1.0 + self.take_profit),
            trailing_fraction: self.trailing_stop,
            trailing_stop: entry_price * (1.0 - self.trailing_stop),
            highest: entry_price,
            lookahead: self.lookahead,
            offset: 0,
            outcome: None,
        }
    }

    /// Run the exit machine over the bars following entry.
    ///
    /// Fails with [`Error::InsufficientData`] if fewer than `lookahead` bars
    /// are supplied and no exit triggered on the ones that were.
    pub fn simulate(&self, entry_price: f64, following: &[Candle]) -> Result<ExitOutcome> {
        let mut trade = self.open(entry_price);
        for bar in following.iter().take(self.lookahead) {
            if let Some(outcome) = trade.step(bar) {
                return Ok(outcome);
            }
        }

        Err(Error::InsufficientData {
            symbol: String::new(),
            cadence: "exit window".to_string(),
            required: self.lookahead,
            available: following.len(),
        })
    }
}

/// How and when a trade closed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExitOutcome {
    pub price: f64,
    pub time: DateTime<Utc>,
    pub reason: ExitReason,
    /// Bars after entry at which the exit happened, starting at 1.
    pub offset: usize,
}

/// Stateful exit machine for one trade.
#[derive(Debug, Clone)]
pub struct TradeSimulation {
    entry_price: f64,
    target: f64,
    trailing_fraction: f64,
    trailing_stop: f64,
    highest: f64,
    lookahead: usize,
    offset: usize,
    outcome: Option<ExitOutcome>,
}

impl TradeSimulation {
    pub fn entry_price(&self) -> f64 {
        self.entry_price
    }

    pub fn target(&self) -> f64 {
        self.target
    }

    pub fn trailing_stop(&self) -> f64 {
        self.trailing_stop
    }

    pub fn highest(&self) -> f64 {
        self.highest
    }

    pub fn outcome(&self) -> Option<ExitOutcome> {
        self.outcome
    }

    /// Feed the next bar. Returns the exit once one occurs; further bars are
    /// ignored after that.
    pub fn step(&mut self, bar: &Candle) -> Option<ExitOutcome> {
        if self.outcome.is_some() {
            return self.outcome;
        }
        self.offset += 1;

        let exit = if bar.high >= self.target {
            Some((self.target, ExitReason::TakeProfit))
        } else {
            self.highest = self.highest.max(bar.high);
            self.trailing_stop = self
                .trailing_stop
                .max(self.highest * (1.0 - self.trailing_fraction));

            if bar.low <= self.trailing_stop {
                Some((self.trailing_stop, ExitReason::TrailingStop))
            } else if self.offset >= self.lookahead {
                Some((bar.close, ExitReason::TimeoutExit))
            } else {
                None
            }
        };

        self.outcome = exit.map(|(price, reason)| ExitOutcome {
            price,
            time: bar.open_time,
            reason,
            offset: self.offset,
        });
        self.outcome
    }

    /// Fractional return of an exit at `exit_price`.
    pub fn return_of(&self, exit_price: f64) -> f64 {
        (exit_price - self.entry_price) / self.entry_price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn bar(offset: i64, high: f64, low: f64, close: f64) -> Candle {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(offset);
        Candle::new(t, t + Duration::minutes(59), close, high, low, close, 1.0)
    }

    fn rule() -> ExitRule {
        ExitRule::new(0.02, 0.02, 3).unwrap()
    }

    #[test]
    fn test_take_profit_wins_over_trailing_stop() {
        let outcome = rule().simulate(100.0, &[bar(1, 103.0, 97.0, 99.0)]).unwrap();
        assert_eq!(outcome.reason, ExitReason::TakeProfit);
        assert!((outcome.price - 102.0).abs() < 1e-9);
        assert_eq!(outcome.offset, 1);
    }

    #[test]
    fn test_trailing_stop_exit() {
        let bars = [bar(1, 101.5, 100.5, 101.0), bar(2, 101.0, 99.0, 99.2)];
        let outcome = rule().simulate(100.0, &bars).unwrap();

        assert_eq!(outcome.reason, ExitReason::TrailingStop);
        // Stop ratcheted to 101.5 * 0.98
        assert!((outcome.price - 99.47).abs() < 1e-9);
        assert_eq!(outcome.time, bars[1].open_time);
    }

    #[test]
    fn test_timeout_exit_at_final_close() {
        let bars = [
            bar(1, 100.5, 99.5, 100.2),
            bar(2, 100.8, 99.6, 100.4),
            bar(3, 101.0, 99.9, 100.7),
            bar(4, 150.0, 50.0, 120.0),
        ];
        let outcome = rule().simulate(100.0, &bars).unwrap();
        assert_eq!(outcome.reason, ExitReason::TimeoutExit);
        assert_eq!(outcome.price, 100.7);
        assert_eq!(outcome.offset, 3);
    }

    #[test]
    fn test_trailing_stop_never_relaxes() {
        let rule = ExitRule::new(0.5, 0.1, 8).unwrap();
        let mut trade = rule.open(100.0);
        let highs = [102.0, 105.0, 108.0, 106.0, 103.0, 101.0];

        let mut previous = trade.trailing_stop();
        for (i, high) in highs.iter().enumerate() {
            // Lows stay above any stop reached here.
            trade.step(&bar(i as i64 + 1, *high, 98.0, *high - 1.0));
            assert!(trade.trailing_stop() >= previous);
            previous = trade.trailing_stop();
        }
        assert_eq!(trade.highest(), 108.0);
        assert!((trade.trailing_stop() - 97.2).abs() < 1e-9);
        assert!(trade.outcome().is_none());
    }

    #[test]
    fn test_step_after_exit_is_fixed() {
        let mut trade = rule().open(100.0);
        let first = trade.step(&bar(1, 103.0, 99.0, 102.5)).unwrap();
        let again = trade.step(&bar(2, 90.0, 80.0, 85.0)).unwrap();
        assert_eq!(first, again);
        assert!((trade.return_of(first.price) - 0.02).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_non_positive_parameters() {
        assert!(matches!(
            ExitRule::new(0.0, 0.02, 3),
            Err(Error::InvalidParameter { name: "take_profit", .. })
        ));
        assert!(matches!(
            ExitRule::new(0.02, -0.01, 3),
            Err(Error::InvalidParameter { name: "trailing_stop", .. })
        ));
        assert!(matches!(
            ExitRule::new(0.02, 0.02, 0),
            Err(Error::InvalidParameter { name: "lookahead", .. })
        ));
        assert!(ExitRule::new(f64::NAN, 0.02, 3).is_err());
    }

    #[test]
    fn test_short_window_without_exit() {
        let err = rule().simulate(100.0, &[bar(1, 100.5, 99.5, 100.0)]).unwrap_err();
        assert!(matches!(err, Error::InsufficientData { required: 3, available: 1, .. }));
    }

    #[test]
    fn test_exit_reason_serialization() {
        assert_eq!(serde_json::to_string(&ExitReason::TimeoutExit).unwrap(), "\"timeout_exit\"");
        assert_eq!(ExitReason::TakeProfit.to_string(), "take_profit");
    }
}
