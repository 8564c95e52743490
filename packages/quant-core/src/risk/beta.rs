//! Portfolio beta against a benchmark.

use crate::portfolio::{ReturnMatrix, Weights};
use crate::stats::{self, TRADING_DAYS};
use crate::types::PriceSeries;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_BENCHMARK: &str = "SPY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BetaReport {
    pub benchmark: String,
    pub beta: f64,
    /// Jensen's alpha, annualized
    pub alpha: f64,
    pub correlation: f64,
    pub r_squared: f64,
    pub tracking_error: f64,
    pub observations: usize,
}

/// Beta statistics of aligned daily portfolio and benchmark returns.
pub fn portfolio_beta(
    portfolio: &[f64],
    benchmark: &[f64],
    risk_free_rate: f64,
) -> Result<BetaReport> {
    if portfolio.len() != benchmark.len() {
        return Err(Error::InvalidInput(format!(
            "portfolio has {} returns but benchmark has {}",
            portfolio.len(),
            benchmark.len()
        )));
    }
    if portfolio.len() < 2 {
        return Err(Error::InsufficientData("beta needs at least 2 aligned returns".into()));
    }
    let benchmark_var = stats::variance(benchmark, 1);
    if benchmark_var <= 0.0 {
        return Err(Error::Computation("benchmark returns have zero variance".into()));
    }

    let beta = stats::covariance(portfolio, benchmark, 1) / benchmark_var;
    let correlation = stats::pearson(portfolio, benchmark);
    let annual_portfolio = stats::mean(portfolio) * TRADING_DAYS;
    let annual_benchmark = stats::mean(benchmark) * TRADING_DAYS;
    let alpha = annual_portfolio - (risk_free_rate + beta * (annual_benchmark - risk_free_rate));

    let active: Vec<f64> = portfolio.iter().zip(benchmark).map(|(p, b)| p - b).collect();

    Ok(BetaReport {
        benchmark: String::new(),
        beta,
        alpha,
        correlation,
        r_squared: correlation * correlation,
        tracking_error: stats::std_dev(&active, 1) * TRADING_DAYS.sqrt(),
        observations: portfolio.len(),
    })
}

/// Beta of a weighted portfolio against `benchmark`, over the dates common to
/// all series. The benchmark may also be a holding.
pub fn beta_from_series(
    series: &[PriceSeries],
    weights: &Weights,
    benchmark: &str,
    risk_free_rate: f64,
) -> Result<BetaReport> {
    let mut unique: BTreeMap<&str, &PriceSeries> = BTreeMap::new();
    for s in series {
        unique.entry(s.symbol.as_str()).or_insert(s);
    }
    let aligned: Vec<PriceSeries> = unique.into_values().cloned().collect();
    let returns = ReturnMatrix::from_series(&aligned)?;

    let portfolio = returns.weighted(weights)?;
    let bench = returns
        .column_by_symbol(benchmark)
        .ok_or_else(|| Error::NotFound(format!("no returns for benchmark {}", benchmark)))?;

    let mut report = portfolio_beta(&portfolio, &bench, risk_free_rate)?;
    report.benchmark = benchmark.to_string();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn bench() -> Vec<f64> {
        (0..60).map(|t| 0.0005 + 0.01 * ((t as f64) * 0.8).sin()).collect()
    }

    #[test]
    fn test_leveraged_benchmark() {
        let b = bench();
        let p: Vec<f64> = b.iter().map(|r| 1.5 * r).collect();
        let report = portfolio_beta(&p, &b, 0.02).unwrap();

        assert_relative_eq!(report.beta, 1.5, epsilon = 1e-12);
        assert_relative_eq!(report.correlation, 1.0, epsilon = 1e-12);
        assert_relative_eq!(report.r_squared, 1.0, epsilon = 1e-12);
        // ann_p − (rf + β(ann_b − rf)) = 0.5·rf for a scaled benchmark
        assert_relative_eq!(report.alpha, 0.5 * 0.02, epsilon = 1e-12);
        assert_relative_eq!(
            report.tracking_error,
            0.5 * stats::std_dev(&b, 1) * 252f64.sqrt(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_beta_requires_benchmark_variance() {
        let flat = vec![0.001; 10];
        assert!(matches!(
            portfolio_beta(&bench()[..10], &flat, 0.0),
            Err(Error::Computation(_))
        ));
        assert!(portfolio_beta(&bench(), &bench()[..5], 0.0).is_err());
    }

    #[test]
    fn test_beta_of_the_benchmark_itself() {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let closes: Vec<f64> = (0..50).map(|t| 400.0 + ((t as f64) * 0.5).sin() * 8.0).collect();
        let spy = PriceSeries::from_closes("SPY", start, &closes);
        let weights: Weights = [("SPY".to_string(), 1.0)].into();

        let report = beta_from_series(&[spy.clone(), spy], &weights, DEFAULT_BENCHMARK, 0.02).unwrap();
        assert_eq!(report.benchmark, "SPY");
        assert_relative_eq!(report.beta, 1.0, epsilon = 1e-12);
        assert_relative_eq!(report.tracking_error, 0.0, epsilon = 1e-12);
        assert_eq!(report.observations, 49);
    }
}
