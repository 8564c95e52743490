//! Trading signal generation from indicator tables.
//!
//! Three strategies are available:
//!
//! - **momentum**: RSI, MACD and SMA-20 votes on the latest bar
//! - **mean_reversion**: position inside the Bollinger band plus RSI extremes
//! - **ml_ensemble**: next-bar return forecast from a seeded model ensemble

mod ensemble;

pub use ensemble::{
    EnsembleModel, GradientBoosting, RandomForest, Regressor, Ridge, StandardScaler, ENSEMBLE_SEED,
};

use crate::features::{FeatureRow, FeatureTable};
use crate::types::PriceSeries;
use crate::{stats, Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Minimum training rows for the ensemble.
pub const MIN_TRAINING_ROWS: usize = 50;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyType {
    Momentum,
    MeanReversion,
    MlEnsemble,
}

impl StrategyType {
    pub const NAMES: [&'static str; 3] = ["momentum", "mean_reversion", "ml_ensemble"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Momentum => "momentum",
            Self::MeanReversion => "mean_reversion",
            Self::MlEnsemble => "ml_ensemble",
        }
    }
}

impl FromStr for StrategyType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "momentum" => Ok(Self::Momentum),
            "mean_reversion" => Ok(Self::MeanReversion),
            "ml_ensemble" => Ok(Self::MlEnsemble),
            other => Err(Error::UnknownStrategy(format!(
                "signal strategy '{}' (expected one of: {})",
                other,
                Self::NAMES.join(", ")
            ))),
        }
    }
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    fn from_score(score: f64, threshold: f64) -> Self {
        if score > threshold {
            Self::Buy
        } else if score < -threshold {
            Self::Sell
        } else {
            Self::Hold
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Signal {
    pub symbol: String,
    pub strategy: StrategyType,
    pub action: Action,
    pub strength: f64,
    pub position_size: f64,
    pub confidence: f64,
    /// Date of the bar the signal was computed on
    pub as_of: NaiveDate,
    pub indicators: BTreeMap<String, f64>,
    pub predicted_return: Option<f64>,
    /// Why the ensemble fell back to the momentum signal
    pub fallback: Option<String>,
}

/// A trained ensemble is specific to the symbol and the bar interval of its
/// training history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelKey {
    pub symbol: String,
    pub timeframe: String,
}

impl ModelKey {
    pub fn new(symbol: &str, timeframe: &str) -> Self {
        Self {
            symbol: symbol.trim().to_uppercase(),
            timeframe: timeframe.trim().to_lowercase(),
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.symbol, self.timeframe)
    }
}

/// Cache of trained ensembles.
pub trait ModelStore: Send + Sync {
    fn get(&self, key: &ModelKey) -> Option<Arc<EnsembleModel>>;
    fn put(&self, key: ModelKey, model: Arc<EnsembleModel>);
}

#[derive(Clone)]
pub struct SignalGenerator {
    models: Option<Arc<dyn ModelStore>>,
    seed: u64,
}

impl fmt::Debug for SignalGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalGenerator")
            .field("cached_models", &self.models.is_some())
            .field("seed", &self.seed)
            .finish()
    }
}

impl Default for SignalGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalGenerator {
    pub fn new() -> Self {
        Self {
            models: None,
            seed: ENSEMBLE_SEED,
        }
    }

    pub fn with_model_store(mut self, store: Arc<dyn ModelStore>) -> Self {
        self.models = Some(store);
        self
    }

    /// Signal on the latest complete bar of `series`, whose bars are
    /// `timeframe` apart (e.g. `1d`).
    pub fn generate(
        &self,
        series: &PriceSeries,
        timeframe: &str,
        strategy: StrategyType,
        risk_level: f64,
    ) -> Result<Signal> {
        if !(0.0..=1.0).contains(&risk_level) {
            return Err(Error::InvalidInput(format!(
                "risk level must be in [0, 1], got {}",
                risk_level
            )));
        }
        let table = FeatureTable::build(series).drop_warmup();
        let Some(latest) = table.latest() else {
            return Err(Error::InsufficientData(format!(
                "{} has no bars with a full indicator history ({} bars)",
                series.symbol,
                series.len()
            )));
        };

        let signal = match strategy {
            StrategyType::Momentum => momentum_signal(&table.symbol, latest, risk_level),
            StrategyType::MeanReversion => mean_reversion_signal(&table.symbol, latest, risk_level),
            StrategyType::MlEnsemble => {
                let key = ModelKey::new(&table.symbol, timeframe);
                self.ml_signal(&table, &key, latest, risk_level)
            }
        };
        Ok(signal)
    }

    fn ml_signal(&self, table: &FeatureTable, key: &ModelKey, latest: &FeatureRow, risk_level: f64) -> Signal {
        let training_rows = table.len().saturating_sub(1);
        if training_rows < MIN_TRAINING_ROWS {
            let reason = format!(
                "ensemble needs {} training rows, have {}",
                MIN_TRAINING_ROWS, training_rows
            );
            debug!(symbol = %table.symbol, %reason, "using momentum signal");
            return with_fallback(momentum_signal(&table.symbol, latest, risk_level), reason);
        }

        let predictions = match self
            .model_for(table, key)
            .and_then(|model| model.predictions(&model_features(latest)))
        {
            Ok(predictions) => predictions,
            Err(e) => {
                warn!(%key, error = %e, "ensemble failed, using momentum signal");
                return with_fallback(momentum_signal(&table.symbol, latest, risk_level), e.to_string());
            }
        };
        let predicted = stats::mean(&predictions);
        let confidence = (1.0 - stats::std_dev(&predictions, 0)).clamp(0.0, 1.0);
        let score = (10.0 * predicted).tanh();

        let indicators = BTreeMap::from([
            ("random_forest".to_string(), predictions[0]),
            ("gradient_boosting".to_string(), predictions[1]),
            ("ridge".to_string(), predictions[2]),
        ]);

        Signal {
            symbol: table.symbol.clone(),
            strategy: StrategyType::MlEnsemble,
            action: Action::from_score(score, 0.2),
            strength: score.abs(),
            position_size: score.abs() * risk_level * confidence,
            confidence,
            as_of: latest.date,
            indicators,
            predicted_return: Some(predicted),
            fallback: None,
        }
    }

    fn model_for(&self, table: &FeatureTable, key: &ModelKey) -> Result<Arc<EnsembleModel>> {
        if let Some(model) = self.models.as_ref().and_then(|store| store.get(key)) {
            debug!(%key, "ensemble cache hit");
            return Ok(model);
        }

        let (x, y) = training_data(table);
        let model = Arc::new(EnsembleModel::train(&x, &y, self.seed)?);
        debug!(%key, rows = y.len(), "trained ensemble");
        if let Some(store) = &self.models {
            store.put(key.clone(), Arc::clone(&model));
        }
        Ok(model)
    }
}

fn with_fallback(mut signal: Signal, reason: String) -> Signal {
    signal.fallback = Some(reason);
    signal
}

/// Ensemble inputs, in model column order.
fn model_features(row: &FeatureRow) -> Vec<f64> {
    vec![
        row.rsi,
        row.macd,
        row.atr,
        row.adx,
        row.returns,
        row.volatility,
        row.volume_ratio,
    ]
}

/// Features of each row paired with the following row's return.
fn training_data(table: &FeatureTable) -> (Vec<Vec<f64>>, Vec<f64>) {
    table
        .rows
        .windows(2)
        .map(|pair| (model_features(&pair[0]), pair[1].returns))
        .unzip()
}

fn vote(condition_up: bool, condition_down: bool) -> f64 {
    if condition_up {
        1.0
    } else if condition_down {
        -1.0
    } else {
        0.0
    }
}

pub fn momentum_signal(symbol: &str, row: &FeatureRow, risk_level: f64) -> Signal {
    let rsi_vote = vote(row.rsi > 70.0, row.rsi < 30.0);
    let macd_vote = if row.macd > row.macd_signal { 1.0 } else { -1.0 };
    let sma_vote = if row.close > row.sma_20 { 1.0 } else { -1.0 };
    let score = (rsi_vote + macd_vote + sma_vote) / 3.0;

    Signal {
        symbol: symbol.to_string(),
        strategy: StrategyType::Momentum,
        action: Action::from_score(score, 0.3),
        strength: score.abs(),
        position_size: score.abs() * risk_level,
        confidence: (score.abs() + 0.5).min(1.0),
        as_of: row.date,
        indicators: BTreeMap::from([
            ("rsi".to_string(), row.rsi),
            ("macd".to_string(), row.macd),
            ("sma_20".to_string(), row.sma_20),
        ]),
        predicted_return: None,
        fallback: None,
    }
}

pub fn mean_reversion_signal(symbol: &str, row: &FeatureRow, risk_level: f64) -> Signal {
    let width = row.bb_upper - row.bb_lower;
    let bb_position = if width > 0.0 {
        (row.close - row.bb_lower) / width
    } else {
        0.5
    };
    let rsi_vote = vote(row.rsi < 30.0, row.rsi > 70.0);
    let score = -(bb_position - 0.5) * 2.0 + 0.5 * rsi_vote;

    Signal {
        symbol: symbol.to_string(),
        strategy: StrategyType::MeanReversion,
        action: Action::from_score(score, 0.3),
        strength: score.abs(),
        position_size: score.abs() * risk_level,
        confidence: (score.abs() + 0.4).min(1.0),
        as_of: row.date,
        indicators: BTreeMap::from([
            ("bb_position".to_string(), bb_position),
            ("price_position".to_string(), row.price_position),
            ("rsi".to_string(), row.rsi),
        ]),
        predicted_return: None,
        fallback: None,
    }
}
