//! Console formatting for backtest results.

use crate::simulator::{BacktestSummary, TradeRecord};

/// `signal_time -> exit_time | return% | exit_reason | message`
pub fn format_trade(trade: &TradeRecord) -> String {
    format!(
        "{} -> {} | {:.2}% | {} | {}",
        trade.signal_time.format("%Y-%m-%d %H:%M:%S"),
        trade.exit_time.format("%Y-%m-%d %H:%M:%S"),
        trade.return_pct * 100.0,
        trade.exit_reason,
        trade.message
    )
}

pub fn format_summary(summary: &BacktestSummary) -> String {
    format!(
        "Summary: trades={}, win_rate={:.2}, avg_return={:.2}%, cumulative={:.2}%",
        summary.total_trades(),
        summary.win_rate,
        summary.average_return * 100.0,
        summary.cumulative_return * 100.0
    )
}

/// Every trade line followed by the summary line.
pub fn render(summary: &BacktestSummary) -> Vec<String> {
    summary
        .trades
        .iter()
        .map(format_trade)
        .chain(std::iter::once(format_summary(summary)))
        .collect()
}
