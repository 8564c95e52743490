//! Optimization request handling: method and objective dispatch, cleaning and
//! reporting.

use super::black_litterman;
use super::hrp::hrp;
use super::mean_variance::{clean_weights, EfficientFrontier, Performance, WeightBounds};
use super::performance::PortfolioMetrics;
use super::returns::{ReturnMatrix, MIN_OBSERVATIONS};
use super::risk_parity::risk_parity_weights;
use super::Weights;
use crate::stats::TRADING_DAYS;
use crate::types::PriceSeries;
use crate::{Error, Result};
use nalgebra::DVector;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Portfolio construction method.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationMethod {
    MeanVariance,
    BlackLitterman,
    RiskParity,
    Hierarchical,
}

impl OptimizationMethod {
    pub const NAMES: [&'static str; 4] =
        ["mean_variance", "black_litterman", "risk_parity", "hierarchical"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MeanVariance => "mean_variance",
            Self::BlackLitterman => "black_litterman",
            Self::RiskParity => "risk_parity",
            Self::Hierarchical => "hierarchical",
        }
    }
}

impl FromStr for OptimizationMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mean_variance" => Ok(Self::MeanVariance),
            "black_litterman" => Ok(Self::BlackLitterman),
            "risk_parity" => Ok(Self::RiskParity),
            "hierarchical" | "hrp" => Ok(Self::Hierarchical),
            other => Err(Error::UnknownMethod(format!(
                "optimization method '{}' (expected one of: {})",
                other,
                Self::NAMES.join(", ")
            ))),
        }
    }
}

impl fmt::Display for OptimizationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mean-variance objective.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    MaxSharpe,
    MinVolatility,
    MaxReturn,
    EfficientRisk,
}

impl Objective {
    pub const NAMES: [&'static str; 4] =
        ["max_sharpe", "min_volatility", "max_return", "efficient_risk"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxSharpe => "max_sharpe",
            Self::MinVolatility => "min_volatility",
            Self::MaxReturn => "max_return",
            Self::EfficientRisk => "efficient_risk",
        }
    }
}

impl FromStr for Objective {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "max_sharpe" => Ok(Self::MaxSharpe),
            "min_volatility" => Ok(Self::MinVolatility),
            "max_return" => Ok(Self::MaxReturn),
            "efficient_risk" => Ok(Self::EfficientRisk),
            other => Err(Error::UnknownMethod(format!(
                "objective '{}' (expected one of: {})",
                other,
                Self::NAMES.join(", ")
            ))),
        }
    }
}

impl fmt::Display for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything an optimization needs besides the price data.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationRequest {
    pub method: OptimizationMethod,
    pub objective: Objective,
    pub bounds: WeightBounds,
    /// Scales the target for `max_return` and `efficient_risk`, in [0, 1]
    pub risk_tolerance: f64,
    /// Absolute Black-Litterman views, symbol to expected annual return
    pub views: BTreeMap<String, f64>,
}

impl OptimizationRequest {
    pub fn new(method: &str, objective: &str) -> Result<Self> {
        Ok(Self {
            method: method.parse()?,
            objective: objective.parse()?,
            bounds: WeightBounds::default(),
            risk_tolerance: 0.5,
            views: BTreeMap::new(),
        })
    }

    pub fn with_bounds(mut self, bounds: WeightBounds) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_risk_tolerance(mut self, risk_tolerance: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&risk_tolerance) {
            return Err(Error::InvalidInput(format!(
                "risk_tolerance must be within [0, 1], got {}",
                risk_tolerance
            )));
        }
        self.risk_tolerance = risk_tolerance;
        Ok(self)
    }

    pub fn with_views(mut self, views: BTreeMap<String, f64>) -> Self {
        self.views = views
            .into_iter()
            .map(|(symbol, view)| (symbol.to_uppercase(), view))
            .collect();
        self
    }
}

/// Result of an optimization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub method: OptimizationMethod,
    /// Objective name; risk parity and HRP report their own criterion
    pub objective: String,
    pub weights: Weights,
    pub expected_return: f64,
    pub volatility: f64,
    pub sharpe_ratio: f64,
    /// Realized metrics of the weighted daily return series
    pub metrics: PortfolioMetrics,
    /// Number of aligned daily return observations used
    pub observations: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster_order: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implied_returns: Option<Weights>,
}

/// Runs optimization requests at a fixed risk-free rate.
#[derive(Debug, Clone, Copy)]
pub struct PortfolioOptimizer {
    risk_free_rate: f64,
}

impl Default for PortfolioOptimizer {
    fn default() -> Self {
        Self::new(0.02)
    }
}

impl PortfolioOptimizer {
    pub fn new(risk_free_rate: f64) -> Self {
        Self { risk_free_rate }
    }

    pub fn risk_free_rate(&self) -> f64 {
        self.risk_free_rate
    }

    /// Align the series on common dates and optimize.
    pub fn optimize(&self, series: &[PriceSeries], request: &OptimizationRequest) -> Result<Allocation> {
        let returns = ReturnMatrix::from_series(series)?;
        self.optimize_returns(&returns, request)
    }

    pub fn optimize_returns(
        &self,
        returns: &ReturnMatrix,
        request: &OptimizationRequest,
    ) -> Result<Allocation> {
        let min_assets = match request.method {
            OptimizationMethod::MeanVariance | OptimizationMethod::BlackLitterman => 2,
            OptimizationMethod::RiskParity | OptimizationMethod::Hierarchical => 1,
        };
        returns.require(MIN_OBSERVATIONS, min_assets)?;

        debug!(
            method = %request.method,
            objective = %request.objective,
            assets = returns.n_assets(),
            observations = returns.n_obs(),
            "optimizing portfolio"
        );

        let mut allocation = match request.method {
            OptimizationMethod::MeanVariance => self.mean_variance(returns, request)?,
            OptimizationMethod::BlackLitterman => self.black_litterman(returns, request)?,
            OptimizationMethod::RiskParity => {
                let w = risk_parity_weights(&returns.sample_covariance(1.0))?;
                let weights = returns.to_weights(&w);
                self.report(returns, request.method, "equal_risk_contribution", weights)?
            }
            OptimizationMethod::Hierarchical => {
                let (weights, order) = hrp(returns)?;
                let mut allocation =
                    self.report(returns, request.method, "hierarchical_diversification", weights)?;
                allocation.cluster_order = Some(order);
                allocation
            }
        };

        let portfolio_returns = returns.weighted(&allocation.weights)?;
        allocation.metrics = PortfolioMetrics::from_returns(&portfolio_returns, self.risk_free_rate);
        Ok(allocation)
    }

    fn solve(&self, ef: &EfficientFrontier, request: &OptimizationRequest) -> Result<DVector<f64>> {
        match request.objective {
            Objective::MaxSharpe => ef.max_sharpe(self.risk_free_rate),
            Objective::MinVolatility => ef.min_volatility(),
            Objective::MaxReturn => {
                let target = ef.expected_returns().mean() * (1.0 + request.risk_tolerance);
                ef.efficient_return(target)
            }
            Objective::EfficientRisk => {
                let target = ef.covariance().diagonal().mean() * request.risk_tolerance;
                ef.efficient_risk(target)
            }
        }
    }

    fn mean_variance(&self, returns: &ReturnMatrix, request: &OptimizationRequest) -> Result<Allocation> {
        let ef = EfficientFrontier::new(
            returns.mean_historical_return(),
            returns.ledoit_wolf(TRADING_DAYS),
            request.bounds,
        )?;
        let w = self.solve(&ef, request)?;
        Ok(self.frontier_allocation(returns, request, &ef, &w))
    }

    fn black_litterman(&self, returns: &ReturnMatrix, request: &OptimizationRequest) -> Result<Allocation> {
        if !matches!(request.objective, Objective::MaxSharpe | Objective::MinVolatility) {
            return Err(Error::InvalidInput(format!(
                "black_litterman supports max_sharpe and min_volatility, not {}",
                request.objective
            )));
        }

        let cov = returns.sample_covariance(TRADING_DAYS);
        let posterior = black_litterman::posterior(&cov, returns.symbols(), &request.views)?;
        let ef = EfficientFrontier::new(posterior.returns, posterior.covariance, request.bounds)?;
        let w = self.solve(&ef, request)?;

        let mut allocation = self.frontier_allocation(returns, request, &ef, &w);
        allocation.implied_returns = Some(returns.to_weights(&posterior.implied_returns));
        Ok(allocation)
    }

    fn frontier_allocation(
        &self,
        returns: &ReturnMatrix,
        request: &OptimizationRequest,
        ef: &EfficientFrontier,
        w: &DVector<f64>,
    ) -> Allocation {
        let weights = clean_weights(&returns.to_weights(w));
        let cleaned = DVector::from_iterator(
            returns.n_assets(),
            returns.symbols().iter().map(|s| weights.get(s).copied().unwrap_or(0.0)),
        );
        let Performance {
            expected_return,
            volatility,
            sharpe_ratio,
        } = ef.performance(&cleaned, self.risk_free_rate);

        Allocation {
            method: request.method,
            objective: request.objective.to_string(),
            weights,
            expected_return,
            volatility,
            sharpe_ratio,
            metrics: PortfolioMetrics::default(),
            observations: returns.n_obs(),
            cluster_order: None,
            implied_returns: None,
        }
    }

    /// Performance of unclamped weights on the geometric mean return and the
    /// annualized sample covariance.
    fn report(
        &self,
        returns: &ReturnMatrix,
        method: OptimizationMethod,
        objective: &str,
        weights: Weights,
    ) -> Result<Allocation> {
        let w = returns.weight_vector(&weights)?;
        let mu = returns.mean_historical_return();
        let cov = returns.sample_covariance(TRADING_DAYS);

        let expected_return = mu.dot(&w);
        let volatility = w.dot(&(&cov * &w)).max(0.0).sqrt();
        let sharpe_ratio = if volatility > 0.0 {
            (expected_return - self.risk_free_rate) / volatility
        } else {
            0.0
        };

        Ok(Allocation {
            method,
            objective: objective.to_string(),
            weights,
            expected_return,
            volatility,
            sharpe_ratio,
            metrics: PortfolioMetrics::default(),
            observations: returns.n_obs(),
            cluster_order: None,
            implied_returns: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn synthetic_series() -> Vec<PriceSeries> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let make = |symbol: &str, drift: f64, amp: f64, freq: f64| {
            let mut price = 100.0;
            let closes: Vec<f64> = (0..120)
                .map(|t| {
                    price *= 1.0 + drift + amp * ((t as f64) * freq).sin();
                    price
                })
                .collect();
            PriceSeries::from_closes(symbol, start, &closes)
        };
        vec![
            make("AAA", 0.0008, 0.010, 0.9),
            make("BBB", 0.0012, 0.020, 1.7),
            make("CCC", 0.0004, 0.006, 2.3),
        ]
    }

    #[test]
    fn test_unknown_method_and_objective() {
        assert!(matches!(
            OptimizationRequest::new("magic", "max_sharpe"),
            Err(Error::UnknownMethod(_))
        ));
        assert!(matches!(
            OptimizationRequest::new("mean_variance", "max_fun"),
            Err(Error::UnknownMethod(_))
        ));
        assert_eq!(
            "HRP".parse::<OptimizationMethod>().unwrap(),
            OptimizationMethod::Hierarchical
        );
    }

    #[test]
    fn test_risk_tolerance_range() {
        let request = OptimizationRequest::new("mean_variance", "max_return").unwrap();
        assert!(request.clone().with_risk_tolerance(1.5).is_err());
        assert!(request.with_risk_tolerance(0.3).is_ok());
    }

    #[test]
    fn test_min_volatility_allocation() {
        let request = OptimizationRequest::new("mean_variance", "min_volatility").unwrap();
        let allocation = PortfolioOptimizer::default()
            .optimize(&synthetic_series(), &request)
            .unwrap();

        let total: f64 = allocation.weights.values().sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-4);
        assert!(allocation.weights.values().all(|&w| w >= 0.0));
        // Lowest-variance asset carries the most weight
        assert!(allocation.weights["CCC"] > allocation.weights["BBB"]);
        assert_eq!(allocation.observations, 119);
        assert!(allocation.metrics.annual_volatility > 0.0);
    }

    #[test]
    fn test_risk_parity_and_hrp_allocations() {
        let optimizer = PortfolioOptimizer::new(0.02);
        for method in ["risk_parity", "hierarchical"] {
            let request = OptimizationRequest::new(method, "max_sharpe").unwrap();
            let allocation = optimizer.optimize(&synthetic_series(), &request).unwrap();
            let total: f64 = allocation.weights.values().sum();
            assert_relative_eq!(total, 1.0, epsilon = 1e-9);
        }

        let request = OptimizationRequest::new("hrp", "max_sharpe").unwrap();
        let allocation = optimizer.optimize(&synthetic_series(), &request).unwrap();
        assert_eq!(allocation.cluster_order.map(|o| o.len()), Some(3));
    }

    #[test]
    fn test_black_litterman_objectives() {
        let optimizer = PortfolioOptimizer::default();
        let request = OptimizationRequest::new("black_litterman", "min_volatility")
            .unwrap()
            .with_views([("aaa".to_string(), 0.3)].into());
        let allocation = optimizer.optimize(&synthetic_series(), &request).unwrap();
        assert_eq!(allocation.implied_returns.map(|r| r.len()), Some(3));

        let unsupported = OptimizationRequest::new("black_litterman", "efficient_risk").unwrap();
        assert!(matches!(
            optimizer.optimize(&synthetic_series(), &unsupported),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_insufficient_history() {
        let short: Vec<PriceSeries> = synthetic_series()
            .into_iter()
            .map(|s| PriceSeries::new(&s.symbol, s.bars[..20].to_vec()))
            .collect();
        let request = OptimizationRequest::new("mean_variance", "max_sharpe").unwrap();
        assert!(matches!(
            PortfolioOptimizer::default().optimize(&short, &request),
            Err(Error::InsufficientData(_))
        ));

        let single = vec![synthetic_series().remove(0)];
        assert!(matches!(
            PortfolioOptimizer::default().optimize(&single, &request),
            Err(Error::InsufficientData(_))
        ));
    }
}
