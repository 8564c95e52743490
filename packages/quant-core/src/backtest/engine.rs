//! Bar-by-bar strategy simulation.

use super::aggregate::{aggregate, AggregateResult};
use super::broker::{SimulatedAccount, Sizer};
use super::strategies::StrategyDefinition;
use crate::portfolio::{annualize_return, sharpe_ratio, sortino_ratio, volatility};
use crate::stats;
use crate::types::{pct_change, PriceSeries, Trade};
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};

pub const DEFAULT_INITIAL_CAPITAL: f64 = 100_000.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EquityPoint {
    pub date: NaiveDate,
    pub equity: f64,
}

/// Distribution statistics of the daily equity returns.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct BacktestMetrics {
    /// Annual return over max drawdown; 0 without a drawdown
    pub calmar_ratio: f64,
    pub sortino_ratio: f64,
    pub skewness: f64,
    pub kurtosis: f64,
    pub var_95: f64,
    pub cvar_95: f64,
}

/// Outcome of one strategy on one symbol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BacktestResult {
    pub symbol: String,
    pub strategy: String,
    pub total_return: f64,
    pub annual_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    /// Positive fraction
    pub max_drawdown: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    /// Closed round trips
    pub total_trades: usize,
    pub avg_trade_return: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
    pub final_equity: f64,
    pub equity_curve: Vec<EquityPoint>,
    pub trades: Vec<Trade>,
    pub metrics: BacktestMetrics,
}

/// Per-symbol results of one strategy plus their aggregate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BacktestOutcome {
    /// Definition with the effective parameters
    pub strategy: StrategyDefinition,
    pub results: BTreeMap<String, BacktestResult>,
    pub aggregate: AggregateResult,
}

#[derive(Debug, Clone, Copy)]
enum Order {
    Enter,
    Exit,
}

/// Long-only, single-position backtester.
///
/// Signals are read on each close and filled at the next bar's open.
#[derive(Debug, Clone, Copy)]
pub struct BacktestEngine {
    initial_capital: f64,
    sizer: Sizer,
}

impl Default for BacktestEngine {
    fn default() -> Self {
        Self {
            initial_capital: DEFAULT_INITIAL_CAPITAL,
            sizer: Sizer::AllIn,
        }
    }
}

impl BacktestEngine {
    pub fn new(initial_capital: f64) -> Result<Self> {
        if !initial_capital.is_finite() || initial_capital <= 0.0 {
            return Err(Error::InvalidInput(format!(
                "initial capital must be positive, got {}",
                initial_capital
            )));
        }
        Ok(Self {
            initial_capital,
            sizer: Sizer::AllIn,
        })
    }

    pub fn with_sizer(mut self, sizer: Sizer) -> Self {
        self.sizer = sizer;
        self
    }

    pub fn initial_capital(&self) -> f64 {
        self.initial_capital
    }

    pub fn sizer(&self) -> Sizer {
        self.sizer
    }

    /// Run `strategy` over every series.
    pub fn run(&self, strategy: &StrategyDefinition, series: &[PriceSeries]) -> Result<BacktestOutcome> {
        if series.is_empty() {
            return Err(Error::InvalidInput("backtest needs at least one symbol".into()));
        }
        let results = series
            .iter()
            .map(|s| Ok((s.symbol.clone(), self.run_symbol(strategy, s)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        let aggregate = aggregate(&results)?;
        Ok(BacktestOutcome {
            strategy: strategy.clone(),
            results,
            aggregate,
        })
    }

    pub fn run_symbol(&self, strategy: &StrategyDefinition, series: &PriceSeries) -> Result<BacktestResult> {
        if series.len() < 2 {
            return Err(Error::InsufficientData(format!(
                "{} has {} bars, backtest needs at least 2",
                series.symbol,
                series.len()
            )));
        }

        let rule = strategy.rule()?;
        let signals = rule.evaluate(&series.closes());
        let mut account = SimulatedAccount::new(&series.symbol, self.initial_capital)?.with_sizer(self.sizer);
        let mut pending: Option<Order> = None;
        let mut equity_curve = Vec::with_capacity(series.len());

        for (i, bar) in series.bars.iter().enumerate() {
            match pending.take() {
                Some(order) if !(bar.open.is_finite() && bar.open > 0.0) => {
                    warn!(
                        symbol = %series.symbol,
                        date = %bar.date,
                        open = bar.open,
                        ?order,
                        "Skipping fill at invalid open price"
                    );
                }
                Some(Order::Enter) => {
                    account.buy(bar.open, bar.date)?;
                }
                Some(Order::Exit) => {
                    account.sell(bar.open, bar.date)?;
                }
                None => {}
            }

            equity_curve.push(EquityPoint {
                date: bar.date,
                equity: account.equity(bar.close),
            });

            pending = if account.is_flat() && signals.entry[i] {
                Some(Order::Enter)
            } else if !account.is_flat() && signals.exit[i] {
                Some(Order::Exit)
            } else {
                None
            };
        }

        let result = summarize(&strategy.id, &series.symbol, self.initial_capital, equity_curve, account);
        debug!(
            symbol = %result.symbol,
            strategy = %result.strategy,
            total_return = result.total_return,
            trades = result.total_trades,
            "Backtest finished"
        );
        Ok(result)
    }
}

fn summarize(
    strategy: &str,
    symbol: &str,
    initial_capital: f64,
    equity_curve: Vec<EquityPoint>,
    account: SimulatedAccount,
) -> BacktestResult {
    let levels: Vec<f64> = equity_curve.iter().map(|p| p.equity).collect();
    let returns = pct_change(&levels);
    let final_equity = levels.last().copied().unwrap_or(initial_capital);

    let total_return = final_equity / initial_capital - 1.0;
    let annual_return = annualize_return(total_return, levels.len());
    let max_drawdown = stats::max_drawdown_of_levels(&levels);

    let pnl = account.closed_pnl();
    let winners = pnl.iter().filter(|p| **p > 0.0).count();
    let gross_profit: f64 = pnl.iter().filter(|p| **p > 0.0).sum();
    let gross_loss: f64 = pnl.iter().filter(|p| **p < 0.0).map(|p| p.abs()).sum();
    let win_rate = if pnl.is_empty() {
        0.0
    } else {
        winners as f64 / pnl.len() as f64
    };
    let best_trade = pnl.iter().copied().reduce(f64::max).unwrap_or(0.0);
    let worst_trade = pnl.iter().copied().reduce(f64::min).unwrap_or(0.0);

    let var_95 = stats::percentile(&returns, 5.0);
    let metrics = BacktestMetrics {
        calmar_ratio: if max_drawdown > 0.0 {
            annual_return / max_drawdown
        } else {
            0.0
        },
        sortino_ratio: sortino_ratio(&returns, 0.0),
        skewness: stats::skewness(&returns),
        kurtosis: stats::kurtosis(&returns),
        var_95,
        cvar_95: stats::tail_mean(&returns, 5.0).unwrap_or(var_95),
    };

    BacktestResult {
        symbol: symbol.to_string(),
        strategy: strategy.to_string(),
        total_return,
        annual_return,
        volatility: volatility(&returns),
        sharpe_ratio: sharpe_ratio(&returns, 0.0),
        max_drawdown,
        win_rate,
        profit_factor: gross_profit / gross_loss.max(1.0),
        total_trades: pnl.len(),
        avg_trade_return: stats::mean(&pnl),
        best_trade,
        worst_trade,
        final_equity,
        equity_curve,
        trades: account.trades,
        metrics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backtest::{get_strategy, list_strategies};
    use crate::testing::wavy_series;
    use crate::types::TradeSide;
    use approx::assert_relative_eq;
    use serde_json::json;

    fn one_bar_momentum() -> StrategyDefinition {
        let overrides = json!({"period": 1, "threshold": 0.02});
        get_strategy("momentum")
            .unwrap()
            .with_overrides(overrides.as_object().unwrap())
            .unwrap()
    }

    fn closes(values: &[f64]) -> PriceSeries {
        PriceSeries::from_closes("TEST", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(), values)
    }

    #[test]
    fn test_fills_at_next_open() {
        let engine = BacktestEngine::new(1000.0).unwrap();
        let series = closes(&[100.0, 105.0, 110.0, 100.0, 90.0, 95.0]);
        let result = engine.run_symbol(&one_bar_momentum(), &series).unwrap();

        // Entry signalled on bar 1, filled on bar 2; exit signalled on bar 3, filled on bar 4
        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.trades[0].side, TradeSide::Buy);
        assert_eq!(result.trades[0].date, series.bars[2].date);
        assert_eq!(result.trades[0].shares, 9.0);
        assert_eq!(result.trades[1].date, series.bars[4].date);
        assert_relative_eq!(result.trades[1].pnl.unwrap(), -180.0);

        let equity: Vec<f64> = result.equity_curve.iter().map(|p| p.equity).collect();
        assert_eq!(equity, vec![1000.0, 1000.0, 1000.0, 910.0, 820.0, 820.0]);

        assert_relative_eq!(result.total_return, -0.18, epsilon = 1e-12);
        assert_relative_eq!(result.max_drawdown, 0.18, epsilon = 1e-12);
        assert_eq!(result.total_trades, 1);
        assert_eq!(result.win_rate, 0.0);
        assert_eq!(result.profit_factor, 0.0);
        assert_relative_eq!(result.avg_trade_return, -180.0);
        assert_relative_eq!(result.best_trade, -180.0);
        assert_relative_eq!(result.worst_trade, -180.0);
        assert_relative_eq!(result.annual_return, 0.82f64.powf(252.0 / 6.0) - 1.0, epsilon = 1e-12);
        assert_relative_eq!(
            result.metrics.calmar_ratio,
            result.annual_return / result.max_drawdown,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_fixed_stake_sizing() {
        let engine = BacktestEngine::new(1000.0).unwrap().with_sizer(Sizer::Fixed(1));
        let series = closes(&[100.0, 105.0, 110.0, 100.0, 90.0, 95.0]);
        let result = engine.run_symbol(&one_bar_momentum(), &series).unwrap();

        assert_eq!(result.trades[0].shares, 1.0);
        assert_relative_eq!(result.trades[1].pnl.unwrap(), -20.0);
        let equity: Vec<f64> = result.equity_curve.iter().map(|p| p.equity).collect();
        assert_eq!(equity, vec![1000.0, 1000.0, 1000.0, 990.0, 980.0, 980.0]);
        assert_relative_eq!(result.total_return, -0.02, epsilon = 1e-12);
    }

    #[test]
    fn test_invalid_open_skips_the_fill() {
        let engine = BacktestEngine::new(1000.0).unwrap();
        let mut series = closes(&[100.0, 105.0, 110.0, 100.0, 90.0, 95.0]);
        series.bars[2].open = 0.0;
        let result = engine.run_symbol(&one_bar_momentum(), &series).unwrap();

        // The entry due on bar 2 is dropped; bar 2's own signal fills on bar 3
        assert_eq!(result.trades.len(), 2);
        assert_eq!(result.trades[0].date, series.bars[3].date);
        assert_eq!(result.trades[0].shares, 10.0);
        assert_relative_eq!(result.trades[1].pnl.unwrap(), -100.0);
        assert_relative_eq!(result.final_equity, 900.0);
    }

    #[test]
    fn test_open_position_is_not_a_trade() {
        let engine = BacktestEngine::new(1000.0).unwrap();
        let result = engine
            .run_symbol(&one_bar_momentum(), &closes(&[100.0, 105.0, 110.0, 120.0]))
            .unwrap();

        assert_eq!(result.trades.len(), 1);
        assert_eq!(result.total_trades, 0);
        assert_relative_eq!(result.final_equity, 10.0 + 9.0 * 120.0);
        assert_relative_eq!(result.total_return, 0.09, epsilon = 1e-12);
        assert_eq!(result.max_drawdown, 0.0);
        assert_eq!(result.metrics.calmar_ratio, 0.0);
    }

    #[test]
    fn test_round_trip_statistics() {
        let engine = BacktestEngine::new(1000.0).unwrap();
        let series = closes(&[100.0, 105.0, 100.0, 110.0, 100.0, 100.0]);
        let result = engine.run_symbol(&one_bar_momentum(), &series).unwrap();

        // Buy 10 @ 100, sell @ 110, buy 11 @ 100, sell @ 100
        assert_eq!(result.trades.len(), 4);
        assert_eq!(result.trades[2].shares, 11.0);
        assert_eq!(result.trades[3].date, series.bars[5].date);
        assert_eq!(result.total_trades, 2);
        assert_relative_eq!(result.win_rate, 0.5);
        assert_relative_eq!(result.profit_factor, 100.0);
        assert_relative_eq!(result.avg_trade_return, 50.0);
        assert_relative_eq!(result.best_trade, 100.0);
        assert_relative_eq!(result.worst_trade, 0.0);
        assert_relative_eq!(result.total_return, 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_requires_two_bars() {
        let engine = BacktestEngine::default();
        let strategy = get_strategy("sma_crossover").unwrap();
        assert!(matches!(
            engine.run_symbol(&strategy, &closes(&[100.0])),
            Err(Error::InsufficientData(_))
        ));
        assert!(engine.run(&strategy, &[]).is_err());
        assert!(BacktestEngine::new(-5.0).is_err());
    }

    #[test]
    fn test_every_strategy_runs() {
        let engine = BacktestEngine::default();
        let series = vec![wavy_series("AAA", 250, 0.05), wavy_series("BBB", 250, -0.05)];
        for strategy in list_strategies() {
            let outcome = engine.run(&strategy, &series).unwrap();
            assert_eq!(outcome.results.len(), 2);
            for result in outcome.results.values() {
                assert_eq!(result.equity_curve.len(), 250);
                assert!(result.final_equity > 0.0);
                assert!(result.max_drawdown >= 0.0 && result.max_drawdown < 1.0);
                assert!((0.0..=1.0).contains(&result.win_rate));
            }
            let trades: usize = outcome.results.values().map(|r| r.total_trades).sum();
            assert_eq!(outcome.aggregate.total_trades, trades);
        }
    }
}
