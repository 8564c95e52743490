//! Black-Litterman posterior returns from an equal-weight market prior and
//! optional absolute views.

use crate::{Error, Result};
use nalgebra::{DMatrix, DVector};
use std::collections::BTreeMap;

/// Market risk aversion δ.
pub const RISK_AVERSION: f64 = 2.5;
/// Uncertainty scale τ of the prior.
pub const TAU: f64 = 0.025;

/// Prior and posterior estimates.
#[derive(Debug, Clone)]
pub struct Posterior {
    /// Market-implied equilibrium returns π
    pub implied_returns: DVector<f64>,
    /// Posterior expected returns μ_BL
    pub returns: DVector<f64>,
    /// Posterior covariance Σ + (M1 + M2)⁻¹
    pub covariance: DMatrix<f64>,
}

/// π = δ·Σ·w_mkt
pub fn market_implied_returns(
    cov: &DMatrix<f64>,
    market_weights: &DVector<f64>,
    risk_aversion: f64,
) -> DVector<f64> {
    (cov * market_weights) * risk_aversion
}

fn invert(m: DMatrix<f64>, what: &str) -> Result<DMatrix<f64>> {
    m.try_inverse()
        .ok_or_else(|| Error::Computation(format!("{} is singular", what)))
}

/// Posterior for `symbols` with covariance `cov` (annualized) and absolute
/// views `{symbol: expected_return}`.
pub fn posterior(
    cov: &DMatrix<f64>,
    symbols: &[String],
    views: &BTreeMap<String, f64>,
) -> Result<Posterior> {
    let n = symbols.len();
    if n == 0 || cov.nrows() != n || cov.ncols() != n {
        return Err(Error::InvalidInput(format!(
            "covariance is {}x{} for {} assets",
            cov.nrows(),
            cov.ncols(),
            n
        )));
    }

    let market_weights = DVector::from_element(n, 1.0 / n as f64);
    let pi = market_implied_returns(cov, &market_weights, RISK_AVERSION);
    let m1 = invert(cov * TAU, "prior covariance")?;

    if views.is_empty() {
        let covariance = cov + invert(m1, "prior precision")?;
        return Ok(Posterior {
            implied_returns: pi.clone(),
            returns: pi,
            covariance,
        });
    }

    let k = views.len();
    let mut p = DMatrix::zeros(k, n);
    let mut q = DVector::zeros(k);
    for (row, (symbol, &view)) in views.iter().enumerate() {
        let col = symbols
            .iter()
            .position(|s| s == symbol)
            .ok_or_else(|| Error::InvalidInput(format!("view on unknown asset {}", symbol)))?;
        if !view.is_finite() {
            return Err(Error::InvalidInput(format!("view on {} is not finite", symbol)));
        }
        p[(row, col)] = 1.0;
        q[row] = view;
    }

    // Ω = diag(τ·PΣPᵀ)
    let view_cov = (&p * cov * p.transpose()) * TAU;
    let mut omega_inv = DMatrix::zeros(k, k);
    for i in 0..k {
        let omega = view_cov[(i, i)];
        if omega <= 0.0 {
            return Err(Error::Computation(format!(
                "view uncertainty for row {} is not positive",
                i
            )));
        }
        omega_inv[(i, i)] = 1.0 / omega;
    }

    let m2 = p.transpose() * &omega_inv * &p;
    let precision = invert(&m1 + m2, "posterior precision")?;
    let returns = &precision * (&m1 * &pi + p.transpose() * &omega_inv * q);
    let covariance = cov + precision;

    Ok(Posterior {
        implied_returns: pi,
        returns,
        covariance,
    })
}
