//! Long-only mean-variance optimization on a box-constrained simplex.
//!
//! Every objective reduces to the parametric problem
//! `min wᵀΣw − λ·μᵀw` subject to `Σw = 1, lo ≤ w ≤ hi`, solved with an
//! accelerated projected gradient method. Target-return and target-risk
//! objectives search over λ; max-Sharpe runs argmin's Brent minimizer on the
//! negative Sharpe ratio of the frontier portfolio at λ.

use super::Weights;
use crate::{Error, Result};
use argmin::core::{CostFunction, Executor, State};
use argmin::solver::brent::BrentOpt;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

const QP_TOLERANCE: f64 = 1e-12;
const QP_MAX_ITERATIONS: usize = 20_000;
const SHARPE_MAX_ITERATIONS: u64 = 200;
const LAMBDA_CAP: f64 = 1e12;
const BISECTION_STEPS: usize = 60;

/// Per-asset weight bounds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WeightBounds {
    pub min_weight: f64,
    pub max_weight: f64,
}

impl Default for WeightBounds {
    fn default() -> Self {
        Self {
            min_weight: 0.0,
            max_weight: 1.0,
        }
    }
}

impl WeightBounds {
    pub fn new(min_weight: f64, max_weight: f64) -> Result<Self> {
        if !min_weight.is_finite() || !max_weight.is_finite() {
            return Err(Error::InvalidInput("weight bounds must be finite".into()));
        }
        if min_weight < 0.0 || min_weight > max_weight {
            return Err(Error::InvalidInput(format!(
                "invalid weight bounds [{}, {}]",
                min_weight, max_weight
            )));
        }
        Ok(Self {
            min_weight,
            max_weight,
        })
    }

    /// Whether `n` weights within the bounds can sum to one.
    pub fn check_feasible(&self, n: usize) -> Result<()> {
        let n = n as f64;
        if n * self.min_weight > 1.0 + 1e-12 || n * self.max_weight < 1.0 - 1e-12 {
            return Err(Error::Infeasible(format!(
                "{} assets cannot sum to 1 within bounds [{}, {}]",
                n, self.min_weight, self.max_weight
            )));
        }
        Ok(())
    }
}

/// Expected return, volatility and Sharpe ratio of a weight vector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Performance {
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
}

/// Euclidean projection onto `{w : Σw = 1, lo ≤ w ≤ hi}`.
///
/// Bisects on the shift τ so that `Σ clamp(v − τ, lo, hi) = 1`. Bounds must be
/// feasible for `v.len()` assets.
pub fn project_box_simplex(v: &DVector<f64>, lo: f64, hi: f64) -> DVector<f64> {
    let total = |tau: f64| v.iter().map(|x| (x - tau).clamp(lo, hi)).sum::<f64>();

    let mut low = v.min() - hi;
    let mut high = v.max() - lo;
    for _ in 0..100 {
        let mid = 0.5 * (low + high);
        if total(mid) > 1.0 {
            low = mid;
        } else {
            high = mid;
        }
    }
    let tau = 0.5 * (low + high);
    v.map(|x| (x - tau).clamp(lo, hi))
}

/// Zero out weights below 1e-4 in magnitude and round to 5 decimals.
pub fn clean_weights(weights: &Weights) -> Weights {
    weights
        .iter()
        .map(|(symbol, &w)| {
            let cleaned = if w.abs() < 1e-4 {
                0.0
            } else {
                (w * 1e5).round() / 1e5
            };
            (symbol.clone(), cleaned)
        })
        .collect()
}

/// Expected returns, covariance and bounds for one optimization problem.
#[derive(Debug, Clone)]
pub struct EfficientFrontier {
    mu: DVector<f64>,
    cov: DMatrix<f64>,
    bounds: WeightBounds,
    step: f64,
}

impl EfficientFrontier {
    pub fn new(mu: DVector<f64>, cov: DMatrix<f64>, bounds: WeightBounds) -> Result<Self> {
        let n = mu.len();
        if n == 0 {
            return Err(Error::InsufficientData("no assets to optimize".into()));
        }
        if cov.nrows() != n || cov.ncols() != n {
            return Err(Error::InvalidInput(format!(
                "covariance is {}x{} for {} assets",
                cov.nrows(),
                cov.ncols(),
                n
            )));
        }
        if mu.iter().chain(cov.iter()).any(|v| !v.is_finite()) {
            return Err(Error::Computation("non-finite return or covariance estimate".into()));
        }
        bounds.check_feasible(n)?;

        let largest = cov.symmetric_eigenvalues().max();
        if !largest.is_finite() {
            return Err(Error::Computation("covariance eigenvalues are not finite".into()));
        }
        let lipschitz = 2.0 * largest.max(1e-12);

        Ok(Self {
            mu,
            cov,
            bounds,
            step: 1.0 / lipschitz,
        })
    }

    pub fn n_assets(&self) -> usize {
        self.mu.len()
    }

    pub fn expected_returns(&self) -> &DVector<f64> {
        &self.mu
    }

    pub fn covariance(&self) -> &DMatrix<f64> {
        &self.cov
    }

    pub fn portfolio_return(&self, w: &DVector<f64>) -> f64 {
        self.mu.dot(w)
    }

    pub fn portfolio_volatility(&self, w: &DVector<f64>) -> f64 {
        w.dot(&(&self.cov * w)).max(0.0).sqrt()
    }

    pub fn performance(&self, w: &DVector<f64>, risk_free_rate: f64) -> Performance {
        let expected_return = self.portfolio_return(w);
        let volatility = self.portfolio_volatility(w);
        let sharpe_ratio = if volatility > 0.0 {
            (expected_return - risk_free_rate) / volatility
        } else {
            0.0
        };
        Performance {
            expected_return,
            volatility,
            sharpe_ratio,
        }
    }

    fn project(&self, v: &DVector<f64>) -> DVector<f64> {
        project_box_simplex(v, self.bounds.min_weight, self.bounds.max_weight)
    }

    /// FISTA on `wᵀΣw − λ·μᵀw`.
    fn solve_qp(&self, lambda: f64, warm_start: Option<&DVector<f64>>) -> Result<DVector<f64>> {
        let n = self.n_assets();
        let mut x = match warm_start {
            Some(w) => self.project(w),
            None => self.project(&DVector::from_element(n, 1.0 / n as f64)),
        };
        let mut y = x.clone();
        let mut t = 1.0_f64;

        for _ in 0..QP_MAX_ITERATIONS {
            let grad = (&self.cov * &y) * 2.0 - &self.mu * lambda;
            let next = self.project(&(&y - grad * self.step));
            let t_next = 0.5 * (1.0 + (1.0 + 4.0 * t * t).sqrt());
            let diff = &next - &x;
            y = &next + &diff * ((t - 1.0) / t_next);
            x = next;
            t = t_next;
            if diff.amax() < QP_TOLERANCE {
                break;
            }
        }

        if x.iter().any(|v| !v.is_finite()) {
            return Err(Error::Computation(format!(
                "quadratic program diverged at lambda {}",
                lambda
            )));
        }
        Ok(x)
    }

    /// Minimum-variance weights.
    pub fn min_volatility(&self) -> Result<DVector<f64>> {
        self.solve_qp(0.0, None)
    }

    /// Highest attainable expected return: fill assets to the upper bound in
    /// descending order of μ.
    pub fn max_return_weights(&self) -> DVector<f64> {
        let n = self.n_assets();
        let lo = self.bounds.min_weight;
        let hi = self.bounds.max_weight;

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| self.mu[b].total_cmp(&self.mu[a]));

        let mut w = DVector::from_element(n, lo);
        let mut remaining = 1.0 - lo * n as f64;
        for i in order {
            if remaining <= 0.0 {
                break;
            }
            let add = (hi - lo).min(remaining);
            w[i] += add;
            remaining -= add;
        }
        w
    }

    /// Minimum variance subject to `μᵀw ≥ target`.
    pub fn efficient_return(&self, target: f64) -> Result<DVector<f64>> {
        let w_min = self.min_volatility()?;
        if self.portfolio_return(&w_min) >= target {
            return Ok(w_min);
        }

        let w_max = self.max_return_weights();
        let max_return = self.portfolio_return(&w_max);
        if target > max_return + 1e-9 {
            return Err(Error::Infeasible(format!(
                "target return {:.6} exceeds the maximum attainable {:.6}",
                target, max_return
            )));
        }

        let mut low = 0.0;
        let mut high = 1.0;
        let mut w_high = self.solve_qp(high, Some(&w_min))?;
        while self.portfolio_return(&w_high) < target {
            low = high;
            high *= 2.0;
            if high > LAMBDA_CAP {
                return Ok(w_max);
            }
            w_high = self.solve_qp(high, Some(&w_high))?;
        }

        for _ in 0..BISECTION_STEPS {
            let mid = 0.5 * (low + high);
            let w = self.solve_qp(mid, Some(&w_high))?;
            if self.portfolio_return(&w) >= target {
                high = mid;
                w_high = w;
            } else {
                low = mid;
            }
        }
        Ok(w_high)
    }

    /// Maximum return subject to `√(wᵀΣw) ≤ target_volatility`.
    pub fn efficient_risk(&self, target_volatility: f64) -> Result<DVector<f64>> {
        let w_min = self.min_volatility()?;
        let min_vol = self.portfolio_volatility(&w_min);
        if target_volatility < min_vol - 1e-12 {
            return Err(Error::Infeasible(format!(
                "target volatility {:.6} is below the minimum attainable {:.6}",
                target_volatility, min_vol
            )));
        }

        let w_max = self.max_return_weights();
        if self.portfolio_volatility(&w_max) <= target_volatility {
            return Ok(w_max);
        }

        let mut low = 0.0;
        let mut w_low = w_min;
        let mut high = 1.0;
        let mut w_high = self.solve_qp(high, Some(&w_low))?;
        while self.portfolio_volatility(&w_high) <= target_volatility {
            low = high;
            w_low = w_high.clone();
            high *= 2.0;
            if high > LAMBDA_CAP {
                return Ok(w_low);
            }
            w_high = self.solve_qp(high, Some(&w_high))?;
        }

        for _ in 0..BISECTION_STEPS {
            let mid = 0.5 * (low + high);
            let w = self.solve_qp(mid, Some(&w_low))?;
            if self.portfolio_volatility(&w) <= target_volatility {
                low = mid;
                w_low = w;
            } else {
                high = mid;
            }
        }
        Ok(w_low)
    }

    fn sharpe(&self, w: &DVector<f64>, rf: f64) -> Option<f64> {
        let vol = self.portfolio_volatility(w);
        (vol > 0.0).then(|| (self.portfolio_return(w) - rf) / vol)
    }

    /// Tangency portfolio: maximize `(μᵀw − r_f)/√(wᵀΣw)`.
    pub fn max_sharpe(&self, risk_free_rate: f64) -> Result<DVector<f64>> {
        let rf = risk_free_rate;
        if self.mu.max() <= rf {
            return Err(Error::Infeasible(format!(
                "no asset's expected return exceeds the risk-free rate {}",
                rf
            )));
        }
        let w_max = self.max_return_weights();
        if self.portfolio_return(&w_max) <= rf {
            return Err(Error::Infeasible(format!(
                "no portfolio within the bounds earns more than the risk-free rate {}",
                rf
            )));
        }

        let max_return = self.portfolio_return(&w_max);
        let mut lambda_hi = 1.0;
        while lambda_hi < LAMBDA_CAP
            && self.portfolio_return(&self.solve_qp(lambda_hi, None)?) < max_return - 1e-12
        {
            lambda_hi *= 2.0;
        }

        let solver = BrentOpt::new(0.0, lambda_hi).set_tolerance(f64::EPSILON.sqrt(), 1e-10);
        let result = Executor::new(FrontierSharpe { frontier: self, rf }, solver)
            .configure(|state| state.max_iters(SHARPE_MAX_ITERATIONS))
            .run()
            .map_err(|e| Error::Computation(format!("max-Sharpe search failed: {e}")))?;
        let lambda = result
            .state()
            .get_best_param()
            .copied()
            .ok_or_else(|| Error::Computation("max-Sharpe search returned no estimate".into()))?;

        let candidates = [self.solve_qp(lambda, None)?, self.min_volatility()?, w_max];
        let best = candidates
            .into_iter()
            .filter_map(|w| self.sharpe(&w, rf).map(|s| (w, s)))
            .max_by(|a, b| a.1.total_cmp(&b.1));
        match best {
            Some((w, sharpe)) if sharpe.is_finite() => Ok(w),
            Some(_) => Err(Error::Computation("Sharpe ratio is not finite".into())),
            None => Err(Error::Computation("zero-volatility portfolio".into())),
        }
    }
}

/// Negative Sharpe ratio of the frontier portfolio at risk aversion λ.
///
/// The Sharpe ratio is quasi-concave along the frontier, so a bracketed
/// one-dimensional search over λ finds the tangency portfolio.
struct FrontierSharpe<'a> {
    frontier: &'a EfficientFrontier,
    rf: f64,
}

impl CostFunction for FrontierSharpe<'_> {
    type Param = f64;
    type Output = f64;

    fn cost(&self, lambda: &f64) -> std::result::Result<f64, argmin::core::Error> {
        let w = self.frontier.solve_qp(lambda.max(0.0), None)?;
        Ok(self
            .frontier
            .sharpe(&w, self.rf)
            .map_or(f64::INFINITY, |sharpe| -sharpe))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    fn two_assets() -> EfficientFrontier {
        EfficientFrontier::new(
            DVector::from_vec(vec![0.10, 0.20]),
            DMatrix::from_diagonal(&DVector::from_vec(vec![0.04, 0.09])),
            WeightBounds::default(),
        )
        .unwrap()
    }

    fn three_assets() -> EfficientFrontier {
        let cov = DMatrix::from_row_slice(
            3,
            3,
            &[
                0.040, 0.006, 0.010, //
                0.006, 0.090, 0.012, //
                0.010, 0.012, 0.0625,
            ],
        );
        EfficientFrontier::new(
            DVector::from_vec(vec![0.08, 0.15, 0.11]),
            cov,
            WeightBounds::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_projection_onto_box_simplex() {
        let v = DVector::from_vec(vec![0.9, 0.5, -0.2]);
        let w = project_box_simplex(&v, 0.0, 1.0);
        assert_relative_eq!(w.sum(), 1.0, epsilon = 1e-12);
        // τ = 0.2 clamps the last coordinate to zero
        assert_relative_eq!(w[0], 0.7, epsilon = 1e-12);
        assert_relative_eq!(w[1], 0.3, epsilon = 1e-12);
        assert_eq!(w[2], 0.0);

        let capped = project_box_simplex(&DVector::from_vec(vec![5.0, 0.0, 0.0]), 0.1, 0.5);
        assert_relative_eq!(capped[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(capped[1], 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_bounds_feasibility() {
        assert!(WeightBounds::new(0.4, 1.0).unwrap().check_feasible(3).is_err());
        assert!(WeightBounds::new(0.0, 0.3).unwrap().check_feasible(3).is_err());
        assert!(WeightBounds::new(0.0, 0.34).unwrap().check_feasible(3).is_ok());
        assert!(WeightBounds::new(0.5, 0.2).is_err());
    }

    #[test]
    fn test_min_volatility_inverse_variance_for_diagonal() {
        let ef = two_assets();
        let w = ef.min_volatility().unwrap();
        let expected = (1.0 / 0.04) / (1.0 / 0.04 + 1.0 / 0.09);
        assert_relative_eq!(w[0], expected, epsilon = 1e-8);
        assert_relative_eq!(ef.portfolio_return(&w), 0.130769, epsilon = 1e-6);
    }

    #[test]
    fn test_min_volatility_beats_random_portfolios() {
        let ef = three_assets();
        let w = ef.min_volatility().unwrap();
        let min_var = ef.portfolio_volatility(&w).powi(2);

        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..500 {
            let raw = DVector::from_fn(3, |_, _| rng.random::<f64>());
            let candidate = &raw / raw.sum();
            let var = ef.portfolio_volatility(&candidate).powi(2);
            assert!(min_var <= var + 1e-12);
        }
    }

    #[test]
    fn test_efficient_return_hits_target() {
        let ef = two_assets();
        let w = ef.efficient_return(0.16).unwrap();
        assert_relative_eq!(w[0], 0.4, epsilon = 1e-6);
        assert_relative_eq!(w[1], 0.6, epsilon = 1e-6);

        // Below the min-vol return the min-vol portfolio already qualifies
        let low = ef.efficient_return(0.05).unwrap();
        assert_relative_eq!(low[0], ef.min_volatility().unwrap()[0], epsilon = 1e-12);
    }

    #[test]
    fn test_efficient_return_infeasible_target() {
        let ef = two_assets();
        assert!(matches!(ef.efficient_return(0.25), Err(Error::Infeasible(_))));
    }

    #[test]
    fn test_efficient_risk() {
        let ef = two_assets();
        let w = ef.efficient_risk(0.25).unwrap();
        // 0.13a² − 0.18a + 0.0275 = 0, smaller root
        let a = (0.18 - (0.18f64 * 0.18 - 4.0 * 0.13 * 0.0275).sqrt()) / 0.26;
        assert_relative_eq!(w[0], a, epsilon = 1e-6);
        assert!(ef.portfolio_volatility(&w) <= 0.25 + 1e-12);

        // Loose target returns the max-return corner
        let corner = ef.efficient_risk(0.5).unwrap();
        assert_relative_eq!(corner[1], 1.0, epsilon = 1e-12);

        assert!(matches!(ef.efficient_risk(0.1), Err(Error::Infeasible(_))));
    }

    #[test]
    fn test_max_sharpe_matches_grid() {
        let ef = two_assets();
        let w = ef.max_sharpe(0.02).unwrap();
        // Σ⁻¹(μ − r_f) ∝ [2, 2]
        assert_relative_eq!(w[0], 0.5, epsilon = 1e-5);
        let best = ef.performance(&w, 0.02).sharpe_ratio;

        for i in 0..=1000 {
            let a = i as f64 / 1000.0;
            let grid = DVector::from_vec(vec![a, 1.0 - a]);
            assert!(ef.performance(&grid, 0.02).sharpe_ratio <= best + 1e-9);
        }
    }

    #[test]
    fn test_max_sharpe_beats_random_portfolios() {
        let ef = three_assets();
        let w = ef.max_sharpe(0.03).unwrap();
        let best = ef.performance(&w, 0.03).sharpe_ratio;

        let mut rng = ChaCha8Rng::seed_from_u64(11);
        for _ in 0..2_000 {
            let raw = DVector::from_fn(3, |_, _| rng.random::<f64>());
            let candidate = &raw / raw.sum();
            assert!(ef.performance(&candidate, 0.03).sharpe_ratio <= best + 1e-9);
        }

        // The frontier objective at the chosen λ agrees with the returned weights
        let cost = FrontierSharpe { frontier: &ef, rf: 0.03 };
        let lambda_zero = cost.cost(&0.0).unwrap();
        assert_relative_eq!(
            -lambda_zero,
            ef.performance(&ef.min_volatility().unwrap(), 0.03).sharpe_ratio,
            epsilon = 1e-9
        );
        assert!(-lambda_zero <= best + 1e-12);
    }

    #[test]
    fn test_max_sharpe_respects_bounds() {
        let ef = EfficientFrontier::new(
            three_assets().expected_returns().clone(),
            three_assets().covariance().clone(),
            WeightBounds::new(0.1, 0.5).unwrap(),
        )
        .unwrap();
        let w = ef.max_sharpe(0.02).unwrap();
        assert_relative_eq!(w.sum(), 1.0, epsilon = 1e-9);
        assert!(w.iter().all(|&x| (0.1 - 1e-12..=0.5 + 1e-12).contains(&x)));
    }

    #[test]
    fn test_max_sharpe_infeasible_when_rf_dominates() {
        let ef = two_assets();
        assert!(matches!(ef.max_sharpe(0.25), Err(Error::Infeasible(_))));
    }

    #[test]
    fn test_clean_weights() {
        let raw: Weights = [
            ("A".to_string(), 0.123456789),
            ("B".to_string(), 0.00005),
            ("C".to_string(), 0.876543161),
        ]
        .into();
        let cleaned = clean_weights(&raw);
        assert_eq!(cleaned["A"], 0.12346);
        assert_eq!(cleaned["B"], 0.0);
        assert_eq!(cleaned["C"], 0.87654);
    }
}
