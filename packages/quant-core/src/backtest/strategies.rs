//! Built-in backtest strategies and their entry/exit rules.

use crate::indicators::{bollinger_bands, crossover_signals, momentum, rsi, sma};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

/// Named numeric parameters of a strategy.
pub type StrategyParameters = BTreeMap<String, f64>;

/// Trading strategy definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StrategyDefinition {
    /// Strategy identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Description of how the strategy works
    pub description: String,
    /// Default parameters, or the effective ones after overrides
    pub parameters: StrategyParameters,
}

fn definition(id: &str, name: &str, description: &str, parameters: &[(&str, f64)]) -> StrategyDefinition {
    StrategyDefinition {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        parameters: parameters.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
    }
}

/// Built-in trading strategies.
pub static BUILTIN_STRATEGIES: LazyLock<HashMap<String, StrategyDefinition>> = LazyLock::new(|| {
    [
        definition(
            "sma_crossover",
            "SMA Crossover Strategy",
            "Buy when the fast SMA crosses above the slow SMA, sell on the opposite cross",
            &[("fast_period", 10.0), ("slow_period", 30.0)],
        ),
        definition(
            "rsi_mean_reversion",
            "RSI Mean Reversion Strategy",
            "Buy when RSI falls below the lower bound, sell when it rises above the upper bound",
            &[("rsi_period", 14.0), ("rsi_lower", 30.0), ("rsi_upper", 70.0)],
        ),
        definition(
            "momentum",
            "Momentum Strategy",
            "Buy when the rate of change exceeds the threshold, sell when it falls below its negative",
            &[("period", 20.0), ("threshold", 0.02)],
        ),
        definition(
            "mean_reversion",
            "Mean Reversion Strategy",
            "Buy below the lower standard-deviation band, sell above the upper band",
            &[("period", 20.0), ("std_dev", 2.0)],
        ),
        definition(
            "bollinger_bands",
            "Bollinger Bands Strategy",
            "Buy when price closes below the lower Bollinger Band, sell above the upper band",
            &[("period", 20.0), ("std_dev", 2.0)],
        ),
    ]
    .into_iter()
    .map(|s| (s.id.clone(), s))
    .collect()
});

/// List all available strategies, ordered by id.
pub fn list_strategies() -> Vec<StrategyDefinition> {
    let mut strategies: Vec<StrategyDefinition> = BUILTIN_STRATEGIES.values().cloned().collect();
    strategies.sort_by(|a, b| a.id.cmp(&b.id));
    strategies
}

/// Get a specific strategy by ID, case-insensitively.
pub fn get_strategy(id: &str) -> Result<StrategyDefinition> {
    BUILTIN_STRATEGIES.get(&id.to_lowercase()).cloned().ok_or_else(|| {
        let ids: Vec<String> = list_strategies().into_iter().map(|s| s.id).collect();
        Error::UnknownStrategy(format!(
            "backtest strategy '{}' (expected one of: {})",
            id,
            ids.join(", ")
        ))
    })
}

impl StrategyDefinition {
    /// Copy of the definition with parameter values replaced from a JSON map.
    pub fn with_overrides(&self, overrides: &serde_json::Map<String, Value>) -> Result<Self> {
        let mut updated = self.clone();
        for (key, value) in overrides {
            let slot = updated.parameters.get_mut(key).ok_or_else(|| {
                let known: Vec<&str> = self.parameters.keys().map(String::as_str).collect();
                Error::InvalidInput(format!(
                    "unknown parameter '{}' for {} (expected one of: {})",
                    key,
                    self.id,
                    known.join(", ")
                ))
            })?;
            *slot = value
                .as_f64()
                .filter(|v| v.is_finite())
                .ok_or_else(|| Error::InvalidInput(format!("parameter '{}' must be a number", key)))?;
        }
        updated.rule()?;
        Ok(updated)
    }

    fn param(&self, key: &str) -> Result<f64> {
        self.parameters
            .get(key)
            .copied()
            .ok_or_else(|| Error::InvalidInput(format!("{} is missing parameter '{}'", self.id, key)))
    }

    fn period(&self, key: &str) -> Result<usize> {
        let value = self.param(key)?;
        if value < 1.0 || value.fract() != 0.0 {
            return Err(Error::InvalidInput(format!(
                "parameter '{}' must be a positive whole number, got {}",
                key, value
            )));
        }
        Ok(value as usize)
    }

    /// Entry/exit rule described by this definition.
    pub fn rule(&self) -> Result<Rule> {
        match self.id.as_str() {
            "sma_crossover" => {
                let fast = self.period("fast_period")?;
                let slow = self.period("slow_period")?;
                if fast >= slow {
                    return Err(Error::InvalidInput(format!(
                        "fast_period ({}) must be shorter than slow_period ({})",
                        fast, slow
                    )));
                }
                Ok(Rule::SmaCrossover { fast, slow })
            }
            "rsi_mean_reversion" => {
                let lower = self.param("rsi_lower")?;
                let upper = self.param("rsi_upper")?;
                if !(0.0..=100.0).contains(&lower) || !(0.0..=100.0).contains(&upper) || lower >= upper {
                    return Err(Error::InvalidInput(format!(
                        "RSI bounds must satisfy 0 <= lower < upper <= 100, got {} and {}",
                        lower, upper
                    )));
                }
                Ok(Rule::Rsi {
                    period: self.period("rsi_period")?,
                    lower,
                    upper,
                })
            }
            "momentum" => Ok(Rule::Momentum {
                period: self.period("period")?,
                threshold: self.param("threshold")?.abs(),
            }),
            "mean_reversion" | "bollinger_bands" => {
                let std_dev = self.param("std_dev")?;
                if std_dev <= 0.0 {
                    return Err(Error::InvalidInput(format!("std_dev must be positive, got {}", std_dev)));
                }
                Ok(Rule::Bands {
                    period: self.period("period")?,
                    std_dev,
                })
            }
            other => Err(Error::UnknownStrategy(other.to_string())),
        }
    }
}

/// Compiled entry/exit logic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rule {
    SmaCrossover { fast: usize, slow: usize },
    Rsi { period: usize, lower: f64, upper: f64 },
    Momentum { period: usize, threshold: f64 },
    Bands { period: usize, std_dev: f64 },
}

/// Per-bar entry and exit flags, evaluated on each close.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSignals {
    pub entry: Vec<bool>,
    pub exit: Vec<bool>,
}

impl Rule {
    pub fn evaluate(&self, closes: &[f64]) -> RuleSignals {
        let (entry, exit) = match *self {
            Rule::SmaCrossover { fast, slow } => {
                let cross = crossover_signals(&sma(closes, fast), &sma(closes, slow));
                cross.iter().map(|&c| (c > 0.0, c < 0.0)).unzip()
            }
            Rule::Rsi { period, lower, upper } => rsi(closes, period)
                .iter()
                .map(|&r| (r < lower, r > upper))
                .unzip(),
            Rule::Momentum { period, threshold } => momentum(closes, period)
                .iter()
                .map(|&m| (m > threshold, m < -threshold))
                .unzip(),
            Rule::Bands { period, std_dev } => {
                let bands = bollinger_bands(closes, period, std_dev);
                closes
                    .iter()
                    .enumerate()
                    .map(|(i, &c)| (c < bands.lower[i], c > bands.upper[i]))
                    .unzip()
            }
        };
        RuleSignals { entry, exit }
    }
}
