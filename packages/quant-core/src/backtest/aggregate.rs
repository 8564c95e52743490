//! Cross-symbol summary of a backtest run.

use super::engine::BacktestResult;
use crate::stats;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateResult {
    pub portfolio_return: f64,
    pub portfolio_annual_return: f64,
    pub portfolio_volatility: f64,
    /// Mean of the non-zero per-symbol Sharpe ratios
    pub portfolio_sharpe: f64,
    pub portfolio_max_drawdown: f64,
    pub best_performer: String,
    pub worst_performer: String,
    pub win_rate: f64,
    pub total_trades: usize,
}

/// Average the per-symbol results; ties for best/worst go to the first symbol.
pub fn aggregate(results: &BTreeMap<String, BacktestResult>) -> Result<AggregateResult> {
    let mut entries = results.iter();
    let (first, _) = entries
        .next()
        .ok_or_else(|| Error::InvalidInput("no backtest results to aggregate".into()))?;

    let mut best = (first, results[first].total_return);
    let mut worst = best;
    for (symbol, result) in entries {
        if result.total_return > best.1 {
            best = (symbol, result.total_return);
        }
        if result.total_return < worst.1 {
            worst = (symbol, result.total_return);
        }
    }

    let field = |f: fn(&BacktestResult) -> f64| -> Vec<f64> { results.values().map(f).collect() };
    let sharpes: Vec<f64> = results
        .values()
        .map(|r| r.sharpe_ratio)
        .filter(|s| *s != 0.0 && s.is_finite())
        .collect();

    Ok(AggregateResult {
        portfolio_return: stats::mean(&field(|r| r.total_return)),
        portfolio_annual_return: stats::mean(&field(|r| r.annual_return)),
        portfolio_volatility: stats::mean(&field(|r| r.volatility)),
        portfolio_sharpe: stats::mean(&sharpes),
        portfolio_max_drawdown: stats::mean(&field(|r| r.max_drawdown)),
        best_performer: best.0.clone(),
        worst_performer: worst.0.clone(),
        win_rate: stats::mean(&field(|r| r.win_rate)),
        total_trades: results.values().map(|r| r.total_trades).sum(),
    })
}
