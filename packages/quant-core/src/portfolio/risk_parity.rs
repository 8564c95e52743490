//! Equal-risk-contribution weights.

use crate::{Error, Result};
use nalgebra::{DMatrix, DVector};
use tracing::debug;

const TOLERANCE: f64 = 1e-10;
const MAX_SWEEPS: usize = 10_000;

/// Weights whose variance contributions `w_i·(Σw)_i` are all equal.
///
/// Cyclical coordinate descent on `½xᵀΣx − Σ b_i ln x_i` with `b_i = 1/n`,
/// started from inverse-volatility weights and normalized to sum to one.
pub fn risk_parity_weights(cov: &DMatrix<f64>) -> Result<DVector<f64>> {
    let n = cov.nrows();
    if n == 0 || cov.ncols() != n {
        return Err(Error::InvalidInput(format!(
            "covariance must be square and non-empty, got {}x{}",
            cov.nrows(),
            cov.ncols()
        )));
    }
    if let Some(i) = (0..n).find(|&i| !cov[(i, i)].is_finite() || cov[(i, i)] <= 0.0) {
        return Err(Error::Computation(format!(
            "asset {} has non-positive variance {}",
            i,
            cov[(i, i)]
        )));
    }

    let budget = 1.0 / n as f64;
    let inv_vol = DVector::from_fn(n, |i, _| 1.0 / cov[(i, i)].sqrt());
    let mut x = &inv_vol / inv_vol.sum();

    for sweep in 0..MAX_SWEEPS {
        let mut change: f64 = 0.0;
        for i in 0..n {
            let s_ii = cov[(i, i)];
            let a: f64 = (0..n).filter(|&j| j != i).map(|j| cov[(i, j)] * x[j]).sum();
            let updated = (-a + (a * a + 4.0 * s_ii * budget).sqrt()) / (2.0 * s_ii);
            change = change.max((updated - x[i]).abs());
            x[i] = updated;
        }
        if !change.is_finite() {
            break;
        }
        if change < TOLERANCE {
            debug!(sweeps = sweep + 1, "risk parity converged");
            return Ok(&x / x.sum());
        }
    }

    Err(Error::Computation(format!(
        "risk parity did not converge within {} sweeps",
        MAX_SWEEPS
    )))
}

/// Fraction of total variance contributed by each asset.
pub fn risk_contributions(w: &DVector<f64>, cov: &DMatrix<f64>) -> DVector<f64> {
    let sigma_w = cov * w;
    let total = w.dot(&sigma_w);
    if total <= 0.0 {
        return DVector::zeros(w.len());
    }
    w.component_mul(&sigma_w) / total
}
