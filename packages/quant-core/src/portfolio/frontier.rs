//! Efficient frontier sampling.

use super::mean_variance::{EfficientFrontier, WeightBounds};
use super::returns::{ReturnMatrix, MIN_OBSERVATIONS};
use super::Weights;
use crate::stats::TRADING_DAYS;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrontierPoint {
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    pub weights: Weights,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frontier {
    pub symbols: Vec<String>,
    pub points: Vec<FrontierPoint>,
    pub max_sharpe_portfolio: FrontierPoint,
    pub min_volatility_portfolio: FrontierPoint,
}

/// Minimum-variance portfolios for `num_portfolios` target returns spaced
/// evenly between the lowest and highest asset return.
///
/// Uses the geometric mean return and the annualized sample covariance.
/// Targets with no feasible portfolio are skipped.
pub fn efficient_frontier(
    returns: &ReturnMatrix,
    num_portfolios: usize,
    risk_free_rate: f64,
) -> Result<Frontier> {
    if num_portfolios < 2 {
        return Err(Error::InvalidInput(format!(
            "num_portfolios must be at least 2, got {}",
            num_portfolios
        )));
    }
    returns.require(MIN_OBSERVATIONS, 2)?;

    let ef = EfficientFrontier::new(
        returns.mean_historical_return(),
        returns.sample_covariance(TRADING_DAYS),
        WeightBounds::default(),
    )?;
    let low = ef.expected_returns().min();
    let high = ef.expected_returns().max();
    let step = (high - low) / (num_portfolios - 1) as f64;

    let mut points = Vec::with_capacity(num_portfolios);
    for k in 0..num_portfolios {
        let target = low + step * k as f64;
        match ef.efficient_return(target) {
            Ok(w) => {
                let perf = ef.performance(&w, risk_free_rate);
                points.push(FrontierPoint {
                    expected_return: perf.expected_return,
                    volatility: perf.volatility,
                    sharpe_ratio: perf.sharpe_ratio,
                    weights: returns.to_weights(&w),
                });
            }
            Err(Error::Infeasible(reason)) => {
                debug!(target, %reason, "skipping infeasible frontier point");
            }
            Err(e) => return Err(e),
        }
    }

    let max_sharpe_portfolio = points
        .iter()
        .max_by(|a, b| a.sharpe_ratio.total_cmp(&b.sharpe_ratio))
        .cloned()
        .ok_or_else(|| Error::Computation("no feasible frontier portfolios".into()))?;
    let min_volatility_portfolio = points
        .iter()
        .min_by(|a, b| a.volatility.total_cmp(&b.volatility))
        .cloned()
        .ok_or_else(|| Error::Computation("no feasible frontier portfolios".into()))?;

    Ok(Frontier {
        symbols: returns.symbols().to_vec(),
        points,
        max_sharpe_portfolio,
        min_volatility_portfolio,
    })
}
