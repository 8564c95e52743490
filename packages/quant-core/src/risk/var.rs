//! Value-at-Risk under four estimators.

use super::garch::{Garch11, VolatilityForecaster};
use crate::stats::{self, TRADING_DAYS};
use crate::{Error, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::warn;

/// Minimum portfolio returns for any VaR estimate.
pub const MIN_VAR_OBSERVATIONS: usize = 30;
pub const DEFAULT_SIMULATIONS: usize = 10_000;
pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VarMethod {
    Historical,
    Parametric,
    MonteCarlo,
    Garch,
}

impl VarMethod {
    pub const NAMES: [&'static str; 4] = ["historical", "parametric", "monte_carlo", "garch"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Historical => "historical",
            Self::Parametric => "parametric",
            Self::MonteCarlo => "monte_carlo",
            Self::Garch => "garch",
        }
    }
}

impl FromStr for VarMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "historical" => Ok(Self::Historical),
            "parametric" => Ok(Self::Parametric),
            "monte_carlo" => Ok(Self::MonteCarlo),
            "garch" => Ok(Self::Garch),
            other => Err(Error::UnknownMethod(format!(
                "VaR method '{}' (expected one of: {})",
                other,
                Self::NAMES.join(", ")
            ))),
        }
    }
}

impl fmt::Display for VarMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Estimator-specific diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum VarDetails {
    HistoricalSimulation {
        sample_size: usize,
        /// Lowest horizon-scaled return
        worst_loss: f64,
    },
    ParametricNormal {
        mean_return: f64,
        volatility: f64,
        z_score: f64,
    },
    MonteCarlo {
        n_simulations: usize,
        simulated_mean: f64,
        simulated_std: f64,
    },
    Garch {
        forecasted_volatility: f64,
        mean_return: f64,
        z_score: f64,
        garch_params: BTreeMap<String, f64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VarReport {
    /// Loss threshold as a positive fraction
    pub var: f64,
    /// Expected shortfall as a positive fraction
    pub cvar: f64,
    pub max_drawdown: f64,
    pub method: VarMethod,
    pub confidence_level: f64,
    pub time_horizon: usize,
    pub portfolio_volatility: f64,
    pub skewness: f64,
    pub kurtosis: f64,
    pub details: VarDetails,
    /// Why the GARCH estimate fell back to the parametric one
    pub fallback: Option<String>,
}

/// VaR calculator with a seeded Monte Carlo stream and a pluggable volatility model.
#[derive(Clone)]
pub struct VarCalculator {
    simulations: usize,
    seed: u64,
    forecaster: Arc<dyn VolatilityForecaster>,
}

impl fmt::Debug for VarCalculator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VarCalculator")
            .field("simulations", &self.simulations)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

impl Default for VarCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl VarCalculator {
    pub fn new() -> Self {
        Self {
            simulations: DEFAULT_SIMULATIONS,
            seed: DEFAULT_SEED,
            forecaster: Arc::new(Garch11),
        }
    }

    pub fn with_simulations(mut self, simulations: usize) -> Self {
        self.simulations = simulations.max(1);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_forecaster(mut self, forecaster: Arc<dyn VolatilityForecaster>) -> Self {
        self.forecaster = forecaster;
        self
    }

    /// VaR, CVaR and drawdown for a daily portfolio return series.
    pub fn calculate(
        &self,
        returns: &[f64],
        confidence: f64,
        horizon: usize,
        method: VarMethod,
    ) -> Result<VarReport> {
        validate(returns, confidence, horizon)?;

        let (var, details, fallback) = match method {
            VarMethod::Historical => {
                let (var, details) = historical(returns, confidence, horizon);
                (var, details, None)
            }
            VarMethod::Parametric => {
                let (var, details) = parametric(returns, confidence, horizon);
                (var, details, None)
            }
            VarMethod::MonteCarlo => {
                let (var, details) = self.monte_carlo(returns, confidence, horizon)?;
                (var, details, None)
            }
            VarMethod::Garch => match self.garch(returns, confidence, horizon) {
                Ok((var, details)) => (var, details, None),
                Err(e) => {
                    warn!(error = %e, "GARCH fit failed, using parametric VaR");
                    let (var, details) = parametric(returns, confidence, horizon);
                    (var, details, Some(e.to_string()))
                }
            },
        };

        let tail_q = (1.0 - confidence) * 100.0;
        let cvar = stats::tail_mean(returns, tail_q).map_or(0.0, f64::abs);

        Ok(VarReport {
            var,
            cvar,
            max_drawdown: stats::max_drawdown(returns),
            method,
            confidence_level: confidence,
            time_horizon: horizon,
            portfolio_volatility: stats::std_dev(returns, 1) * TRADING_DAYS.sqrt(),
            skewness: stats::skewness(returns),
            kurtosis: stats::kurtosis(returns),
            details,
            fallback,
        })
    }

    fn monte_carlo(&self, returns: &[f64], confidence: f64, horizon: usize) -> Result<(f64, VarDetails)> {
        let h = horizon as f64;
        let mean = stats::mean(returns) * h;
        let std = stats::std_dev(returns, 1) * h.sqrt();
        let normal = Normal::new(mean, std)
            .map_err(|e| Error::Computation(format!("invalid simulation distribution: {}", e)))?;

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let sims: Vec<f64> = (0..self.simulations).map(|_| normal.sample(&mut rng)).collect();
        let var = stats::percentile(&sims, (1.0 - confidence) * 100.0).abs();

        Ok((
            var,
            VarDetails::MonteCarlo {
                n_simulations: self.simulations,
                simulated_mean: stats::mean(&sims),
                simulated_std: stats::std_dev(&sims, 0),
            },
        ))
    }

    fn garch(&self, returns: &[f64], confidence: f64, horizon: usize) -> Result<(f64, VarDetails)> {
        let forecast = self.forecaster.forecast(returns, horizon)?;
        if !forecast.volatility.is_finite() {
            return Err(Error::Computation("volatility forecast is not finite".into()));
        }
        let mean = stats::mean(returns) * horizon as f64;
        let z = stats::norm_ppf(1.0 - confidence);
        let var = (mean + z * forecast.volatility).abs();

        Ok((
            var,
            VarDetails::Garch {
                forecasted_volatility: forecast.volatility,
                mean_return: mean,
                z_score: z,
                garch_params: forecast.params,
            },
        ))
    }
}

fn validate(returns: &[f64], confidence: f64, horizon: usize) -> Result<()> {
    if !(confidence > 0.0 && confidence < 1.0) {
        return Err(Error::InvalidInput(format!(
            "confidence level must be in (0, 1), got {}",
            confidence
        )));
    }
    if horizon == 0 {
        return Err(Error::InvalidInput("time horizon must be at least 1".into()));
    }
    if returns.len() < MIN_VAR_OBSERVATIONS {
        return Err(Error::InsufficientData(format!(
            "VaR needs at least {} returns, got {}",
            MIN_VAR_OBSERVATIONS,
            returns.len()
        )));
    }
    if returns.iter().any(|r| !r.is_finite()) {
        return Err(Error::InvalidInput("returns contain non-finite values".into()));
    }
    Ok(())
}

fn historical(returns: &[f64], confidence: f64, horizon: usize) -> (f64, VarDetails) {
    let scale = (horizon as f64).sqrt();
    let scaled: Vec<f64> = returns.iter().map(|r| r * scale).collect();
    let var = stats::percentile(&scaled, (1.0 - confidence) * 100.0).abs();
    let worst_loss = scaled.iter().copied().fold(f64::INFINITY, f64::min);
    (
        var,
        VarDetails::HistoricalSimulation {
            sample_size: returns.len(),
            worst_loss,
        },
    )
}

fn parametric(returns: &[f64], confidence: f64, horizon: usize) -> (f64, VarDetails) {
    let h = horizon as f64;
    let mean = stats::mean(returns) * h;
    let volatility = stats::std_dev(returns, 1) * h.sqrt();
    let z = stats::norm_ppf(1.0 - confidence);
    (
        (mean + z * volatility).abs(),
        VarDetails::ParametricNormal {
            mean_return: mean,
            volatility,
            z_score: z,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::garch::VolatilityForecast;
    use approx::assert_relative_eq;

    fn sample_returns(n: usize) -> Vec<f64> {
        (0..n)
            .map(|t| 0.0004 + 0.012 * ((t as f64) * 0.61).sin() + 0.004 * ((t as f64) * 2.3).cos())
            .collect()
    }

    struct FailingForecaster;

    impl VolatilityForecaster for FailingForecaster {
        fn forecast(&self, _returns: &[f64], _horizon: usize) -> Result<VolatilityForecast> {
            Err(Error::Computation("GARCH estimate is not stationary".into()))
        }
    }

    #[test]
    fn test_method_names() {
        assert_eq!("monte_carlo".parse::<VarMethod>().unwrap(), VarMethod::MonteCarlo);
        assert_eq!("GARCH".parse::<VarMethod>().unwrap(), VarMethod::Garch);
        assert!(matches!("cornish_fisher".parse::<VarMethod>(), Err(Error::UnknownMethod(_))));
    }

    #[test]
    fn test_historical_var_is_the_empirical_percentile() {
        let returns = sample_returns(252);
        let calc = VarCalculator::new();

        let one_day = calc.calculate(&returns, 0.95, 1, VarMethod::Historical).unwrap();
        assert_eq!(one_day.var, stats::percentile(&returns, 5.0).abs());

        let four_day = calc.calculate(&returns, 0.99, 4, VarMethod::Historical).unwrap();
        let scaled: Vec<f64> = returns.iter().map(|r| r * 2.0).collect();
        assert_eq!(four_day.var, stats::percentile(&scaled, 1.0).abs());
        match four_day.details {
            VarDetails::HistoricalSimulation { sample_size, worst_loss } => {
                assert_eq!(sample_size, 252);
                assert!(worst_loss <= -four_day.var);
            }
            other => panic!("unexpected details {:?}", other),
        }
    }

    #[test]
    fn test_parametric_var_of_equal_weight_portfolio() {
        let a = sample_returns(252);
        let b: Vec<f64> = (0..252).map(|t| 0.0002 + 0.02 * ((t as f64) * 0.37).cos()).collect();
        let portfolio: Vec<f64> = a.iter().zip(&b).map(|(x, y)| 0.5 * x + 0.5 * y).collect();

        let report = VarCalculator::new()
            .calculate(&portfolio, 0.95, 1, VarMethod::Parametric)
            .unwrap();

        let z = stats::norm_ppf(0.05);
        assert_relative_eq!(z, -1.645, epsilon = 1e-3);
        let expected = (stats::mean(&portfolio) + z * stats::std_dev(&portfolio, 1)).abs();
        assert_relative_eq!(report.var, expected, epsilon = 1e-15);
        assert_eq!(report.fallback, None);
    }

    #[test]
    fn test_monte_carlo_is_reproducible() {
        let returns = sample_returns(120);
        let calc = VarCalculator::new();
        let first = calc.calculate(&returns, 0.95, 5, VarMethod::MonteCarlo).unwrap();
        let second = calc.calculate(&returns, 0.95, 5, VarMethod::MonteCarlo).unwrap();
        assert_eq!(first.var.to_bits(), second.var.to_bits());
        assert_eq!(first, second);

        let reseeded = calc.with_seed(7).calculate(&returns, 0.95, 5, VarMethod::MonteCarlo).unwrap();
        assert_ne!(first.var.to_bits(), reseeded.var.to_bits());

        // 10 000 draws land near the analytic quantile
        let parametric = VarCalculator::new()
            .calculate(&returns, 0.95, 5, VarMethod::Parametric)
            .unwrap();
        assert_relative_eq!(first.var, parametric.var, max_relative = 0.1);
    }

    #[test]
    fn test_garch_failure_matches_parametric() {
        let returns = sample_returns(100);
        let parametric = VarCalculator::new()
            .calculate(&returns, 0.95, 3, VarMethod::Parametric)
            .unwrap();
        let garch = VarCalculator::new()
            .with_forecaster(Arc::new(FailingForecaster))
            .calculate(&returns, 0.95, 3, VarMethod::Garch)
            .unwrap();

        assert_eq!(garch.method, VarMethod::Garch);
        assert_eq!(garch.var, parametric.var);
        assert_eq!(garch.cvar, parametric.cvar);
        assert_eq!(garch.details, parametric.details);
        assert!(garch.fallback.unwrap().contains("not stationary"));
    }

    #[test]
    fn test_garch_short_series_falls_back() {
        // 30 returns clears the VaR minimum; a constant series cannot be fitted
        let returns = vec![0.001; 30];
        let report = VarCalculator::new()
            .calculate(&returns, 0.95, 1, VarMethod::Garch)
            .unwrap();
        assert!(report.fallback.is_some());
    }

    #[test]
    fn test_cvar_and_summary_fields() {
        let returns = sample_returns(200);
        let report = VarCalculator::new()
            .calculate(&returns, 0.95, 1, VarMethod::Historical)
            .unwrap();
        assert!(report.cvar >= report.var);
        assert!(report.max_drawdown > 0.0);
        assert_relative_eq!(
            report.portfolio_volatility,
            stats::std_dev(&returns, 1) * 252f64.sqrt(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_input_validation() {
        let calc = VarCalculator::new();
        let returns = sample_returns(60);
        assert!(matches!(
            calc.calculate(&returns, 1.0, 1, VarMethod::Historical),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            calc.calculate(&returns, 0.95, 0, VarMethod::Historical),
            Err(Error::InvalidInput(_))
        ));
        assert!(matches!(
            calc.calculate(&returns[..29], 0.95, 1, VarMethod::Historical),
            Err(Error::InsufficientData(_))
        ));
    }
}
