//! Portfolio performance analytics over daily return series.

use crate::stats::{self, TRADING_DAYS};
use serde::{Deserialize, Serialize};

/// Annualized performance summary of a daily return series.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct PortfolioMetrics {
    /// Mean daily return × 252
    pub annual_return: f64,
    /// Daily standard deviation × √252
    pub annual_volatility: f64,
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    /// Standard deviation of the negative returns × √252
    pub downside_deviation: f64,
    /// Largest peak-to-trough decline, as a positive fraction
    pub max_drawdown: f64,
    /// 5th percentile of daily returns
    pub var_95: f64,
    /// Mean of the daily returns at or below `var_95`
    pub cvar_95: f64,
}

impl PortfolioMetrics {
    /// Calculate metrics from daily returns with an annual risk-free rate.
    pub fn from_returns(returns: &[f64], risk_free_rate: f64) -> Self {
        if returns.is_empty() {
            return Self::default();
        }

        let annual_return = stats::mean(returns) * TRADING_DAYS;
        let annual_volatility = volatility(returns);
        let downside_deviation = downside_deviation(returns);

        let var_95 = stats::percentile(returns, 5.0);
        let cvar_95 = stats::tail_mean(returns, 5.0).unwrap_or(var_95);

        Self {
            annual_return,
            annual_volatility,
            sharpe_ratio: sharpe_ratio(returns, risk_free_rate),
            sortino_ratio: sortino_ratio(returns, risk_free_rate),
            downside_deviation,
            max_drawdown: stats::max_drawdown(returns),
            var_95,
            cvar_95,
        }
    }
}

/// Annualized volatility of daily returns.
pub fn volatility(returns: &[f64]) -> f64 {
    stats::std_dev(returns, 1) * TRADING_DAYS.sqrt()
}

fn downside_deviation(returns: &[f64]) -> f64 {
    let negative: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    stats::std_dev(&negative, 1) * TRADING_DAYS.sqrt()
}

/// Annualized Sharpe ratio. Returns 0.0 for a flat series.
pub fn sharpe_ratio(returns: &[f64], risk_free_rate: f64) -> f64 {
    let vol = volatility(returns);
    if vol == 0.0 {
        return 0.0;
    }
    (stats::mean(returns) * TRADING_DAYS - risk_free_rate) / vol
}

/// Annualized Sortino ratio. Returns 0.0 when there is no downside dispersion.
pub fn sortino_ratio(returns: &[f64], risk_free_rate: f64) -> f64 {
    let downside = downside_deviation(returns);
    if downside == 0.0 {
        return 0.0;
    }
    (stats::mean(returns) * TRADING_DAYS - risk_free_rate) / downside
}

/// Compound a total return over `periods` trading days into an annual rate.
pub fn annualize_return(total_return: f64, periods: usize) -> f64 {
    if total_return <= -1.0 {
        return -1.0;
    }
    if periods == 0 {
        return 0.0;
    }
    (1.0 + total_return).powf(TRADING_DAYS / periods as f64) - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_metrics_from_returns() {
        let returns = vec![0.01, -0.02, 0.015, -0.005, 0.02, 0.0, -0.01, 0.012];
        let m = PortfolioMetrics::from_returns(&returns, 0.02);

        assert_relative_eq!(m.annual_return, stats::mean(&returns) * 252.0, epsilon = 1e-12);
        assert_relative_eq!(
            m.annual_volatility,
            stats::std_dev(&returns, 1) * 252f64.sqrt(),
            epsilon = 1e-12
        );
        assert_relative_eq!(
            m.sharpe_ratio,
            (m.annual_return - 0.02) / m.annual_volatility,
            epsilon = 1e-12
        );
        assert!(m.downside_deviation > 0.0);
        assert!(m.cvar_95 <= m.var_95);
        assert!(m.max_drawdown > 0.0);
    }

    #[test]
    fn test_sortino_without_losses() {
        let returns = vec![0.01, 0.02, 0.0, 0.03];
        assert_eq!(sortino_ratio(&returns, 0.0), 0.0);
        assert_eq!(PortfolioMetrics::from_returns(&returns, 0.0).max_drawdown, 0.0);
    }

    #[test]
    fn test_sharpe_of_flat_series() {
        assert_eq!(sharpe_ratio(&[0.25; 8], 0.0), 0.0);
    }

    #[test]
    fn test_annualize_return() {
        // One year of trading days leaves the rate unchanged
        assert_relative_eq!(annualize_return(0.10, 252), 0.10, epsilon = 1e-12);
        // Half a year compounds
        assert_relative_eq!(annualize_return(0.10, 126), 0.21, epsilon = 1e-12);
        assert_eq!(annualize_return(0.10, 0), 0.0);
        assert_eq!(annualize_return(-1.0, 100), -1.0);
    }

    #[test]
    fn test_empty_returns() {
        assert_eq!(PortfolioMetrics::from_returns(&[], 0.02), PortfolioMetrics::default());
    }
}
