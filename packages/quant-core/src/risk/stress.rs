//! Scenario stress testing.
//!
//! Every scenario reports its portfolio impact as a signed return, negative
//! for a loss.

use crate::portfolio::Weights;
use crate::stats;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub const DEFAULT_SHOCK_MAGNITUDE: f64 = 0.2;

const RATE_SHOCKS: [f64; 5] = [0.01, 0.02, 0.03, -0.01, -0.02];
const PORTFOLIO_DURATION: f64 = 5.0;
const NORMAL_VARIANCE: f64 = 0.04;
const CRISIS_VARIANCE: f64 = 0.09;

/// Historical crash used by the `market_crash` scenario.
#[derive(Debug, Clone, Copy)]
struct CrashEvent {
    name: &'static str,
    equity_shock: f64,
    bond_shock: f64,
}

const CRASHES: [CrashEvent; 4] = [
    CrashEvent {
        name: "2008 Financial Crisis",
        equity_shock: -0.37,
        bond_shock: 0.05,
    },
    CrashEvent {
        name: "2020 COVID Crash",
        equity_shock: -0.34,
        bond_shock: 0.08,
    },
    CrashEvent {
        name: "Black Monday 1987",
        equity_shock: -0.22,
        bond_shock: 0.02,
    },
    CrashEvent {
        name: "Dot-com Crash 2000",
        equity_shock: -0.49,
        bond_shock: 0.12,
    },
];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioKind {
    Historical,
    MarketCrash,
    InterestRate,
    CorrelationBreakdown,
    UniformShock,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 5] = [
        ScenarioKind::Historical,
        ScenarioKind::MarketCrash,
        ScenarioKind::InterestRate,
        ScenarioKind::CorrelationBreakdown,
        ScenarioKind::UniformShock,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Historical => "historical",
            Self::MarketCrash => "market_crash",
            Self::InterestRate => "interest_rate",
            Self::CorrelationBreakdown => "correlation_breakdown",
            Self::UniformShock => "uniform_shock",
        }
    }
}

impl FromStr for ScenarioKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(ScenarioKind::as_str).collect();
                Error::UnknownMethod(format!(
                    "stress scenario '{}' (expected one of: {})",
                    s,
                    names.join(", ")
                ))
            })
    }
}

impl fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-defined shock: per-asset moves plus a market-wide move.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CustomScenario {
    pub name: String,
    #[serde(default)]
    pub asset_shocks: BTreeMap<String, f64>,
    #[serde(default)]
    pub market_shock: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrashImpact {
    pub equity_shock: f64,
    pub bond_shock: f64,
    pub portfolio_impact: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "scenario", rename_all = "snake_case")]
pub enum ScenarioResult {
    Historical {
        worst_day: f64,
        worst_week: f64,
        worst_month: f64,
        portfolio_loss: f64,
    },
    MarketCrash {
        scenarios: BTreeMap<String, CrashImpact>,
        portfolio_loss: f64,
    },
    InterestRate {
        /// Rate shock in basis points to portfolio impact
        impacts: BTreeMap<String, f64>,
        portfolio_loss: f64,
    },
    CorrelationBreakdown {
        normal_volatility: f64,
        crisis_volatility: f64,
        portfolio_loss: f64,
    },
    UniformShock {
        shock_magnitude: f64,
        portfolio_loss: f64,
    },
    Custom {
        name: String,
        portfolio_loss: f64,
    },
}

impl ScenarioResult {
    pub fn portfolio_loss(&self) -> f64 {
        match self {
            Self::Historical { portfolio_loss, .. }
            | Self::MarketCrash { portfolio_loss, .. }
            | Self::InterestRate { portfolio_loss, .. }
            | Self::CorrelationBreakdown { portfolio_loss, .. }
            | Self::UniformShock { portfolio_loss, .. }
            | Self::Custom { portfolio_loss, .. } => *portfolio_loss,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StressSummary {
    pub worst_case_loss: f64,
    pub average_loss: f64,
    pub scenarios_tested: usize,
    pub losses_exceeding_10pct: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StressReport {
    pub scenarios: BTreeMap<String, ScenarioResult>,
    pub summary: StressSummary,
}

/// Applies stress scenarios to a weighted portfolio.
#[derive(Debug, Clone)]
pub struct StressTester {
    shock_magnitude: f64,
}

impl Default for StressTester {
    fn default() -> Self {
        Self {
            shock_magnitude: DEFAULT_SHOCK_MAGNITUDE,
        }
    }
}

impl StressTester {
    pub fn new(shock_magnitude: f64) -> Result<Self> {
        if !shock_magnitude.is_finite() || shock_magnitude < 0.0 {
            return Err(Error::InvalidInput(format!(
                "shock magnitude must be a non-negative number, got {}",
                shock_magnitude
            )));
        }
        Ok(Self { shock_magnitude })
    }

    pub fn shock_magnitude(&self) -> f64 {
        self.shock_magnitude
    }

    /// Run the requested built-in scenarios and any custom ones.
    ///
    /// `returns` is the weighted daily portfolio return series and is only
    /// read by the historical scenario.
    pub fn run(
        &self,
        weights: &Weights,
        returns: &[f64],
        kinds: &[ScenarioKind],
        custom: &[CustomScenario],
    ) -> Result<StressReport> {
        if weights.is_empty() {
            return Err(Error::InvalidInput("portfolio has no positions".into()));
        }
        if kinds.is_empty() && custom.is_empty() {
            return Err(Error::InvalidInput("no stress scenarios requested".into()));
        }

        let mut scenarios = BTreeMap::new();
        for kind in kinds {
            let result = match kind {
                ScenarioKind::Historical => historical(returns)?,
                ScenarioKind::MarketCrash => market_crash(weights),
                ScenarioKind::InterestRate => interest_rate(weights),
                ScenarioKind::CorrelationBreakdown => correlation_breakdown(),
                ScenarioKind::UniformShock => ScenarioResult::UniformShock {
                    shock_magnitude: self.shock_magnitude,
                    portfolio_loss: -self.shock_magnitude * total_weight(weights),
                },
            };
            scenarios.insert(kind.as_str().to_string(), result);
        }
        for scenario in custom {
            let result = apply_custom(weights, scenario);
            scenarios.insert(scenario.name.clone(), result);
        }

        let losses: Vec<f64> = scenarios.values().map(ScenarioResult::portfolio_loss).collect();
        let summary = StressSummary {
            worst_case_loss: losses.iter().copied().fold(f64::INFINITY, f64::min),
            average_loss: stats::mean(&losses),
            scenarios_tested: losses.len(),
            losses_exceeding_10pct: losses.iter().filter(|&&l| l < -0.10).count(),
        };

        Ok(StressReport { scenarios, summary })
    }
}

fn total_weight(weights: &Weights) -> f64 {
    weights.values().sum()
}

fn historical(returns: &[f64]) -> Result<ScenarioResult> {
    let worst_day = returns
        .iter()
        .copied()
        .min_by(|a, b| a.total_cmp(b))
        .ok_or_else(|| Error::InsufficientData("historical stress needs returns".into()))?;
    let worst_week = stats::rolling_sum_min(returns, 5).unwrap_or(worst_day);
    let worst_month = stats::rolling_sum_min(returns, 21).unwrap_or(worst_week);
    Ok(ScenarioResult::Historical {
        worst_day,
        worst_week,
        worst_month,
        portfolio_loss: worst_month,
    })
}

fn market_crash(weights: &Weights) -> ScenarioResult {
    let exposure = total_weight(weights);
    let scenarios: BTreeMap<String, CrashImpact> = CRASHES
        .iter()
        .map(|c| {
            (
                c.name.to_string(),
                CrashImpact {
                    equity_shock: c.equity_shock,
                    bond_shock: c.bond_shock,
                    portfolio_impact: exposure * c.equity_shock,
                },
            )
        })
        .collect();
    let portfolio_loss = scenarios
        .values()
        .map(|c| c.portfolio_impact)
        .fold(f64::INFINITY, f64::min);
    ScenarioResult::MarketCrash {
        scenarios,
        portfolio_loss,
    }
}

fn interest_rate(weights: &Weights) -> ScenarioResult {
    let exposure = total_weight(weights);
    let impacts: BTreeMap<String, f64> = RATE_SHOCKS
        .iter()
        .map(|shock| {
            let bps = (shock * 10_000.0).round() as i64;
            (format!("{:+}bps", bps), exposure * shock * -PORTFOLIO_DURATION)
        })
        .collect();
    let portfolio_loss = impacts.values().copied().fold(f64::INFINITY, f64::min);
    ScenarioResult::InterestRate {
        impacts,
        portfolio_loss,
    }
}

fn correlation_breakdown() -> ScenarioResult {
    ScenarioResult::CorrelationBreakdown {
        normal_volatility: NORMAL_VARIANCE.sqrt(),
        crisis_volatility: CRISIS_VARIANCE.sqrt(),
        portfolio_loss: -2.0 * (CRISIS_VARIANCE - NORMAL_VARIANCE).sqrt(),
    }
}

fn apply_custom(weights: &Weights, scenario: &CustomScenario) -> ScenarioResult {
    let asset_impact: f64 = weights
        .iter()
        .map(|(symbol, w)| w * scenario.asset_shocks.get(symbol).copied().unwrap_or(0.0))
        .sum();
    ScenarioResult::Custom {
        name: scenario.name.clone(),
        portfolio_loss: asset_impact + scenario.market_shock,
    }
}
