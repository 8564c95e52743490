//! GARCH(1,1) volatility forecasting.
//!
//! The model is fitted by Gaussian maximum likelihood on percentage returns
//! (returns × 100) with a constant mean, using argmin's Nelder-Mead over
//! `(μ, ω, α, β)` with `ω > 0`, `α, β ≥ 0` and `α + β < 1`.

use crate::stats;
use crate::{Error, Result};
use argmin::core::{CostFunction, Executor, State};
use argmin::solver::neldermead::NelderMead;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use tracing::debug;

/// Minimum number of returns for a GARCH fit.
pub const MIN_GARCH_OBSERVATIONS: usize = 30;
const SCALE: f64 = 100.0;
const MAX_PERSISTENCE: f64 = 0.999_999;
const VARIANCE_FLOOR: f64 = 1e-12;
const FIT_MAX_ITERATIONS: u64 = 4_000;
const FIT_TOLERANCE: f64 = 1e-10;

/// Horizon volatility estimate plus whatever parameters produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct VolatilityForecast {
    /// Standard deviation of the summed return over the horizon, in return units
    pub volatility: f64,
    pub params: BTreeMap<String, f64>,
}

/// Forecasts the volatility of a return series over a horizon.
pub trait VolatilityForecaster: Send + Sync {
    fn forecast(&self, returns: &[f64], horizon: usize) -> Result<VolatilityForecast>;
}

/// Fitted GARCH(1,1) parameters on the percentage-return scale.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Garch11Params {
    pub mu: f64,
    pub omega: f64,
    pub alpha: f64,
    pub beta: f64,
}

impl Garch11Params {
    pub fn persistence(&self) -> f64 {
        self.alpha + self.beta
    }

    /// Unconditional variance `ω / (1 − α − β)`.
    pub fn long_run_variance(&self) -> f64 {
        self.omega / (1.0 - self.persistence())
    }

    fn is_admissible(&self) -> bool {
        self.omega > 0.0
            && self.alpha >= 0.0
            && self.beta >= 0.0
            && self.persistence() < MAX_PERSISTENCE
            && self.mu.is_finite()
    }

    /// Conditional variances `σ²_t`, seeded with the sample variance of the residuals.
    pub fn conditional_variances(&self, y: &[f64]) -> Vec<f64> {
        let residuals: Vec<f64> = y.iter().map(|v| v - self.mu).collect();
        let backcast = stats::variance(&residuals, 0).max(VARIANCE_FLOOR);

        let mut sigma2 = Vec::with_capacity(y.len());
        let mut prev_var = backcast;
        let mut prev_resid_sq = backcast;
        for e in &residuals {
            let var = (self.omega + self.alpha * prev_resid_sq + self.beta * prev_var)
                .max(VARIANCE_FLOOR);
            sigma2.push(var);
            prev_var = var;
            prev_resid_sq = e * e;
        }
        sigma2
    }

    /// Gaussian negative log-likelihood of `y` (percentage returns).
    pub fn negative_log_likelihood(&self, y: &[f64]) -> f64 {
        let sigma2 = self.conditional_variances(y);
        let ln_2pi = (2.0 * PI).ln();
        y.iter()
            .zip(&sigma2)
            .map(|(v, s2)| {
                let e = v - self.mu;
                0.5 * (ln_2pi + s2.ln() + e * e / s2)
            })
            .sum()
    }

    /// Per-step variance forecasts for `horizon` steps after the last observation.
    ///
    /// The first step uses the last residual and conditional variance; later
    /// steps decay toward the long-run variance at rate `α + β`.
    pub fn forecast_variances(&self, last_residual: f64, last_variance: f64, horizon: usize) -> Vec<f64> {
        let long_run = self.long_run_variance();
        let persistence = self.persistence();

        let mut out = Vec::with_capacity(horizon);
        let mut var = self.omega + self.alpha * last_residual.powi(2) + self.beta * last_variance;
        for _ in 0..horizon {
            out.push(var);
            var = long_run + persistence * (var - long_run);
        }
        out
    }

    fn from_slice(theta: &[f64]) -> Self {
        Self {
            mu: theta[0],
            omega: theta[1],
            alpha: theta[2],
            beta: theta[3],
        }
    }

    fn to_map(self) -> BTreeMap<String, f64> {
        BTreeMap::from([
            ("mu".to_string(), self.mu),
            ("omega".to_string(), self.omega),
            ("alpha[1]".to_string(), self.alpha),
            ("beta[1]".to_string(), self.beta),
        ])
    }
}

/// Negative log-likelihood over `(μ, ω, α, β)`; infinite outside the admissible region.
struct Likelihood {
    y: Vec<f64>,
}

impl CostFunction for Likelihood {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, theta: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
        let params = Garch11Params::from_slice(theta);
        if !params.is_admissible() {
            return Ok(f64::INFINITY);
        }
        let nll = params.negative_log_likelihood(&self.y);
        Ok(if nll.is_finite() { nll } else { f64::INFINITY })
    }
}

/// GARCH(1,1) maximum-likelihood forecaster.
#[derive(Debug, Clone, Copy, Default)]
pub struct Garch11;

impl Garch11 {
    /// Fit on decimal returns; the parameters are on the ×100 scale.
    pub fn fit(returns: &[f64]) -> Result<Garch11Params> {
        if returns.len() < MIN_GARCH_OBSERVATIONS {
            return Err(Error::InsufficientData(format!(
                "GARCH needs at least {} returns, got {}",
                MIN_GARCH_OBSERVATIONS,
                returns.len()
            )));
        }
        let y: Vec<f64> = returns.iter().map(|r| r * SCALE).collect();
        let mean = stats::mean(&y);
        let var = stats::variance(&y, 0);
        if var <= 0.0 || !var.is_finite() {
            return Err(Error::Computation("return variance is zero or not finite".into()));
        }

        let start = vec![mean, var * 0.05, 0.1, 0.85];
        let steps = [var.sqrt() * 0.1, var * 0.02, 0.05, -0.05];
        let mut simplex = vec![start.clone()];
        for (i, step) in steps.iter().enumerate() {
            let mut vertex = start.clone();
            vertex[i] += step;
            simplex.push(vertex);
        }

        let solver = NelderMead::new(simplex)
            .with_sd_tolerance(FIT_TOLERANCE)
            .map_err(|e| Error::Computation(format!("GARCH optimizer setup failed: {e}")))?;
        let result = Executor::new(Likelihood { y }, solver)
            .configure(|state| state.max_iters(FIT_MAX_ITERATIONS))
            .run()
            .map_err(|e| Error::Computation(format!("GARCH optimizer failed: {e}")))?;

        let state = result.state();
        let nll = state.get_best_cost();
        let params = state
            .get_best_param()
            .map(|theta| Garch11Params::from_slice(theta))
            .ok_or_else(|| Error::Computation("GARCH optimizer returned no estimate".into()))?;
        if !nll.is_finite() {
            return Err(Error::Computation("GARCH likelihood is not finite".into()));
        }
        if !params.is_admissible() {
            return Err(Error::Computation(format!(
                "GARCH estimate is not stationary (alpha + beta = {:.6})",
                params.persistence()
            )));
        }

        debug!(
            omega = params.omega,
            alpha = params.alpha,
            beta = params.beta,
            nll,
            "fitted GARCH(1,1)"
        );
        Ok(params)
    }
}

impl VolatilityForecaster for Garch11 {
    fn forecast(&self, returns: &[f64], horizon: usize) -> Result<VolatilityForecast> {
        let params = Self::fit(returns)?;
        let y: Vec<f64> = returns.iter().map(|r| r * SCALE).collect();
        let sigma2 = params.conditional_variances(&y);

        let (last_y, last_var) = match (y.last(), sigma2.last()) {
            (Some(&v), Some(&s)) => (v, s),
            _ => return Err(Error::InsufficientData("no returns to forecast from".into())),
        };
        let total: f64 = params
            .forecast_variances(last_y - params.mu, last_var, horizon.max(1))
            .iter()
            .sum();

        Ok(VolatilityForecast {
            volatility: total.sqrt() / SCALE,
            params: params.to_map(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, Normal};

    fn simulate(params: Garch11Params, n: usize, seed: u64) -> Vec<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        let mut var = params.long_run_variance();
        let mut out = Vec::with_capacity(n);
        for _ in 0..n {
            let e = var.sqrt() * normal.sample(&mut rng);
            out.push((params.mu + e) / SCALE);
            var = params.omega + params.alpha * e * e + params.beta * var;
        }
        out
    }

    #[test]
    fn test_likelihood_rejects_inadmissible_parameters() {
        let likelihood = Likelihood {
            y: vec![0.5, -0.3, 0.8, -1.1],
        };
        // α + β ≥ 1
        assert_eq!(likelihood.cost(&vec![0.0, 0.1, 0.5, 0.6]).unwrap(), f64::INFINITY);
        // ω ≤ 0
        assert_eq!(likelihood.cost(&vec![0.0, 0.0, 0.1, 0.8]).unwrap(), f64::INFINITY);

        let admissible = likelihood.cost(&vec![0.0, 0.1, 0.1, 0.8]).unwrap();
        let params = Garch11Params {
            mu: 0.0,
            omega: 0.1,
            alpha: 0.1,
            beta: 0.8,
        };
        assert_relative_eq!(admissible, params.negative_log_likelihood(&likelihood.y));
    }

    #[test]
    fn test_forecast_variances_decay_to_long_run() {
        let params = Garch11Params {
            mu: 0.0,
            omega: 0.1,
            alpha: 0.1,
            beta: 0.8,
        };
        let path = params.forecast_variances(2.0, 1.5, 3);
        // ω + α·4 + β·1.5
        assert_relative_eq!(path[0], 0.1 + 0.4 + 1.2, epsilon = 1e-12);
        // long run = 1.0
        assert_relative_eq!(path[1], 1.0 + 0.9 * 0.7, epsilon = 1e-12);
        assert_relative_eq!(path[2], 1.0 + 0.81 * 0.7, epsilon = 1e-12);
    }

    #[test]
    fn test_fit_recovers_persistent_process() {
        let truth = Garch11Params {
            mu: 0.05,
            omega: 0.05,
            alpha: 0.1,
            beta: 0.85,
        };
        let returns = simulate(truth, 2_000, 11);
        let fitted = Garch11::fit(&returns).unwrap();

        assert!(fitted.persistence() < 1.0);
        assert!(fitted.persistence() > 0.7);
        assert!(fitted.alpha > 0.0);

        let forecast = Garch11.forecast(&returns, 5).unwrap();
        assert!(forecast.volatility.is_finite() && forecast.volatility > 0.0);
        assert!(forecast.params.contains_key("beta[1]"));
    }

    #[test]
    fn test_fit_requires_enough_data() {
        assert!(matches!(Garch11::fit(&[0.01; 10]), Err(Error::InsufficientData(_))));
        assert!(matches!(Garch11::fit(&[0.0; 40]), Err(Error::Computation(_))));
    }
}
