//! Quant Core - Portfolio construction, risk and signal analytics.
//!
//! This crate holds every computation behind the quant analytics service:
//!
//! - **Portfolio construction**: mean-variance, Black-Litterman, risk parity, HRP
//! - **Risk**: historical, parametric, Monte Carlo and GARCH VaR, stress tests, beta
//! - **Technical indicators**: SMA, EMA, RSI, MACD, Bollinger, ATR, ADX, OBV
//! - **Signals**: momentum, mean reversion and a tree/linear ensemble
//! - **Backtesting**: long-only strategy simulation with per-symbol metrics
//!
//! # Example
//!
//! ```rust,no_run
//! use quant_core::portfolio::{OptimizationRequest, PortfolioOptimizer};
//! use quant_core::PriceSeries;
//! use std::path::Path;
//!
//! let prices = PriceSeries::load_map(Path::new("prices.json")).unwrap();
//! let series: Vec<PriceSeries> = prices.into_values().collect();
//!
//! let request = OptimizationRequest::new("mean_variance", "max_sharpe").unwrap();
//! let allocation = PortfolioOptimizer::new(0.02).optimize(&series, &request).unwrap();
//! println!("Weights: {:?}", allocation.weights);
//! ```

pub mod backtest;
pub mod features;
pub mod indicators;
pub mod portfolio;
pub mod risk;
pub mod signals;
pub mod stats;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use types::{pct_change, ApiResponse, PriceBar, PriceSeries, Quote, Trade, TradeSide};

// Re-export main functionality
pub use backtest::{
    get_strategy, list_strategies, BacktestEngine, BacktestResult, StrategyDefinition,
};
pub use features::{FeatureTable, IndicatorSnapshot};
pub use portfolio::{
    Allocation, EfficientFrontier, OptimizationMethod, OptimizationRequest, Objective,
    PortfolioMetrics, PortfolioOptimizer, ReturnMatrix, WeightBounds, Weights,
};
pub use risk::{StressTester, VarCalculator, VarMethod, VarReport};
pub use signals::{Signal, SignalGenerator, StrategyType};
pub use stats::CorrelationMethod;

/// Error types for quant-core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Unknown strategy: {0}")]
    UnknownStrategy(String),

    #[error("Infeasible: {0}")]
    Infeasible(String),

    #[error("Computation failed: {0}")]
    Computation(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result type for quant-core operations.
pub type Result<T> = std::result::Result<T, Error>;
