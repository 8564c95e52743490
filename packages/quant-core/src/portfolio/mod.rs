//! Portfolio construction module.
//!
//! Provides return estimation, mean-variance and Black-Litterman optimization,
//! risk parity, hierarchical risk parity, frontier sampling and factor analysis.

mod black_litterman;
mod factor;
mod frontier;
mod hrp;
mod mean_variance;
mod optimizer;
mod performance;
mod returns;
mod risk_parity;

use std::collections::BTreeMap;

/// Symbol to portfolio fraction.
pub type Weights = BTreeMap<String, f64>;

pub use black_litterman::{
    market_implied_returns, posterior as black_litterman_posterior, Posterior, RISK_AVERSION, TAU,
};
pub use factor::{factor_analysis, factor_regression, Factor, FactorReport};
pub use frontier::{efficient_frontier, Frontier, FrontierPoint};
pub use hrp::{
    correlation_distance, cov_to_corr, hrp, hrp_weights_from_cov, leaf_order, ward_linkage,
    HrpAllocation, Merge,
};
pub use mean_variance::{
    clean_weights, project_box_simplex, EfficientFrontier, Performance, WeightBounds,
};
pub use optimizer::{
    Allocation, Objective, OptimizationMethod, OptimizationRequest, PortfolioOptimizer,
};
pub use performance::{
    annualize_return, sharpe_ratio, sortino_ratio, volatility, PortfolioMetrics,
};
pub use returns::{ReturnMatrix, MIN_OBSERVATIONS};
pub use risk_parity::{risk_contributions, risk_parity_weights};
