//! Portfolio risk: Value-at-Risk, stress scenarios and benchmark beta.

mod beta;
mod garch;
mod stress;
mod var;

pub use beta::{beta_from_series, portfolio_beta, BetaReport, DEFAULT_BENCHMARK};
pub use garch::{
    Garch11, Garch11Params, VolatilityForecast, VolatilityForecaster, MIN_GARCH_OBSERVATIONS,
};
pub use stress::{
    CrashImpact, CustomScenario, ScenarioKind, ScenarioResult, StressReport, StressSummary,
    StressTester, DEFAULT_SHOCK_MAGNITUDE,
};
pub use var::{
    VarCalculator, VarDetails, VarMethod, VarReport, DEFAULT_SEED, DEFAULT_SIMULATIONS,
    MIN_VAR_OBSERVATIONS,
};

use crate::portfolio::{ReturnMatrix, Weights};
use crate::types::PriceSeries;
use crate::{Error, Result};

/// Weighted daily return series of the holdings in `weights`, aligned on
/// their common dates.
pub fn portfolio_returns(series: &[PriceSeries], weights: &Weights) -> Result<Vec<f64>> {
    if weights.is_empty() {
        return Err(Error::InvalidInput("portfolio has no positions".into()));
    }
    if weights.values().any(|w| !w.is_finite()) {
        return Err(Error::InvalidInput("portfolio weights must be finite".into()));
    }
    let symbols: Vec<String> = weights.keys().cloned().collect();
    let held: Vec<PriceSeries> = series
        .iter()
        .filter(|s| weights.contains_key(&s.symbol))
        .cloned()
        .collect();
    let returns = ReturnMatrix::from_series(&held)?.select(&symbols)?;
    returns.weighted(weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    #[test]
    fn test_portfolio_returns_ignore_unheld_series() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let a = PriceSeries::from_closes("A", start, &[100.0, 110.0, 99.0]);
        let b = PriceSeries::from_closes("B", start, &[50.0, 50.0, 55.0]);
        let c = PriceSeries::from_closes("C", start, &[10.0, 20.0]);
        let weights: Weights = [("A".to_string(), 0.5), ("B".to_string(), 0.5)].into();

        let r = portfolio_returns(&[a, b, c], &weights).unwrap();
        assert_eq!(r.len(), 2);
        assert_relative_eq!(r[0], 0.05, epsilon = 1e-12);
        assert_relative_eq!(r[1], 0.5 * -0.1 + 0.5 * 0.1, epsilon = 1e-12);
    }

    #[test]
    fn test_portfolio_returns_missing_holding() {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let a = PriceSeries::from_closes("A", start, &[100.0, 110.0, 99.0]);
        let weights: Weights = [("A".to_string(), 0.5), ("Z".to_string(), 0.5)].into();
        assert!(portfolio_returns(&[a], &weights).is_err());
    }
}
