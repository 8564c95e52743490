//! Factor regression of portfolio returns on ETF factor proxies.

use super::returns::ReturnMatrix;
use super::Weights;
use crate::stats::{self, TRADING_DAYS};
use crate::types::PriceSeries;
use crate::{Error, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Style factor tracked through a liquid ETF.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Market,
    Size,
    Value,
    Momentum,
    Quality,
    LowVolatility,
}

impl Factor {
    pub const ALL: [Factor; 6] = [
        Factor::Market,
        Factor::Size,
        Factor::Value,
        Factor::Momentum,
        Factor::Quality,
        Factor::LowVolatility,
    ];

    /// Ticker used as the factor's return series.
    pub fn proxy(&self) -> &'static str {
        match self {
            Self::Market => "SPY",
            Self::Size => "IWM",
            Self::Value => "IWD",
            Self::Momentum => "MTUM",
            Self::Quality => "QUAL",
            Self::LowVolatility => "USMV",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Size => "size",
            Self::Value => "value",
            Self::Momentum => "momentum",
            Self::Quality => "quality",
            Self::LowVolatility => "low_volatility",
        }
    }
}

impl FromStr for Factor {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(Factor::as_str).collect();
                Error::UnknownMethod(format!(
                    "factor '{}' (expected one of: {})",
                    s,
                    names.join(", ")
                ))
            })
    }
}

impl fmt::Display for Factor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FactorReport {
    pub factor_exposures: BTreeMap<String, f64>,
    /// Intercept × 252
    pub alpha: f64,
    pub r_squared: f64,
    /// β × annualized mean factor return
    pub factor_contributions: BTreeMap<String, f64>,
    pub total_factor_return: f64,
    pub unexplained_return: f64,
    pub observations: usize,
}

/// OLS of `y` on the named factor columns with an intercept.
pub fn factor_regression(y: &[f64], factors: &[(String, Vec<f64>)]) -> Result<FactorReport> {
    let rows = y.len();
    let k = factors.len();
    if k == 0 {
        return Err(Error::InvalidInput("at least one factor is required".into()));
    }
    if factors.iter().any(|(_, f)| f.len() != rows) {
        return Err(Error::InvalidInput("factor series differ in length from returns".into()));
    }
    if rows <= k + 1 {
        return Err(Error::InsufficientData(format!(
            "{} observations for {} factors and an intercept",
            rows, k
        )));
    }

    let x = DMatrix::from_fn(rows, k + 1, |t, j| if j == 0 { 1.0 } else { factors[j - 1].1[t] });
    let target = DVector::from_column_slice(y);
    let coef = x
        .clone()
        .svd(true, true)
        .solve(&target, 1e-12)
        .map_err(|e| Error::Computation(format!("factor regression failed: {}", e)))?;

    let fitted = &x * &coef;
    let y_mean = stats::mean(y);
    let ss_res: f64 = target.iter().zip(fitted.iter()).map(|(a, b)| (a - b).powi(2)).sum();
    let ss_tot: f64 = y.iter().map(|v| (v - y_mean).powi(2)).sum();
    let r_squared = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };

    let mut factor_exposures = BTreeMap::new();
    let mut factor_contributions = BTreeMap::new();
    for (i, (name, series)) in factors.iter().enumerate() {
        let beta = coef[i + 1];
        factor_exposures.insert(name.clone(), beta);
        factor_contributions.insert(name.clone(), beta * stats::mean(series) * TRADING_DAYS);
    }

    let alpha = coef[0] * TRADING_DAYS;
    Ok(FactorReport {
        total_factor_return: factor_contributions.values().sum(),
        factor_exposures,
        alpha,
        r_squared,
        factor_contributions,
        unexplained_return: alpha,
        observations: rows,
    })
}

/// Regress the weighted portfolio on factor proxies over their common dates.
///
/// `series` must contain the portfolio assets and every factor proxy; a
/// symbol may serve as both.
pub fn factor_analysis(
    series: &[PriceSeries],
    weights: &Weights,
    factors: &[Factor],
) -> Result<FactorReport> {
    let mut unique: BTreeMap<&str, &PriceSeries> = BTreeMap::new();
    for s in series {
        unique.entry(s.symbol.as_str()).or_insert(s);
    }
    let aligned: Vec<PriceSeries> = unique.into_values().cloned().collect();
    let returns = ReturnMatrix::from_series(&aligned)?;

    let portfolio = returns.weighted(weights)?;
    let columns = factors
        .iter()
        .map(|f| {
            returns
                .column_by_symbol(f.proxy())
                .map(|c| (f.as_str().to_string(), c))
                .ok_or_else(|| Error::NotFound(format!("no returns for factor proxy {}", f.proxy())))
        })
        .collect::<Result<Vec<_>>>()?;

    factor_regression(&portfolio, &columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    #[test]
    fn test_factor_names() {
        assert_eq!("Market".parse::<Factor>().unwrap(), Factor::Market);
        assert_eq!(Factor::LowVolatility.proxy(), "USMV");
        assert!(matches!("carry".parse::<Factor>(), Err(Error::UnknownMethod(_))));
    }

    #[test]
    fn test_regression_recovers_exact_loadings() {
        let f1: Vec<f64> = (0..50).map(|t| ((t as f64) * 0.7).sin() * 0.01).collect();
        let f2: Vec<f64> = (0..50).map(|t| ((t as f64) * 1.9).cos() * 0.02).collect();
        let y: Vec<f64> = f1
            .iter()
            .zip(&f2)
            .map(|(a, b)| 0.0002 + 1.2 * a - 0.5 * b)
            .collect();

        let report =
            factor_regression(&y, &[("market".into(), f1.clone()), ("size".into(), f2)]).unwrap();
        assert_relative_eq!(report.factor_exposures["market"], 1.2, epsilon = 1e-9);
        assert_relative_eq!(report.factor_exposures["size"], -0.5, epsilon = 1e-9);
        assert_relative_eq!(report.alpha, 0.0002 * 252.0, epsilon = 1e-9);
        assert_relative_eq!(report.r_squared, 1.0, epsilon = 1e-9);
        assert_relative_eq!(
            report.factor_contributions["market"],
            1.2 * stats::mean(&f1) * 252.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_regression_needs_enough_rows() {
        let y = vec![0.01, 0.02, 0.03];
        let f = vec![("market".to_string(), vec![0.01, 0.0, -0.01])];
        assert!(factor_regression(&y, &f).is_ok());
        assert!(matches!(
            factor_regression(&y[..2], &[("market".to_string(), vec![0.01, 0.0])]),
            Err(Error::InsufficientData(_))
        ));
    }

    #[test]
    fn test_portfolio_holding_the_market_proxy() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let closes: Vec<f64> = (0..40).map(|t| 100.0 + ((t as f64) * 0.8).sin() * 3.0).collect();
        let spy = PriceSeries::from_closes("SPY", start, &closes);
        let weights: Weights = [("SPY".to_string(), 1.0)].into();

        let report = factor_analysis(&[spy.clone(), spy], &weights, &[Factor::Market]).unwrap();
        assert_relative_eq!(report.factor_exposures["market"], 1.0, epsilon = 1e-9);
        assert_relative_eq!(report.alpha, 0.0, epsilon = 1e-9);
    }
}
