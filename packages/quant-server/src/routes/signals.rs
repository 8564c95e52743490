use axum::{extract::State, routing::post, Json, Router};
use chrono::{DateTime, Utc};
use quant_core::{ApiResponse, PriceSeries, Signal, StrategyType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use super::{blocking, request_symbols};
use crate::error::{ApiError, ApiJson};
use crate::market::{HistoryQuery, Interval, Period};
use crate::state::AppState;

/// Training window for every signal request.
const SIGNAL_PERIOD: Period = Period::OneYear;

#[derive(Debug, Deserialize)]
pub struct SignalsBody {
    pub symbols: Vec<String>,
    /// Bar interval of the history the signal is computed on
    pub timeframe: Option<String>,
    pub strategy_type: Option<String>,
    pub risk_level: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct SignalBatch {
    pub signals: BTreeMap<String, Signal>,
    pub errors: BTreeMap<String, String>,
    pub strategy_type: StrategyType,
    pub risk_level: f64,
    pub timestamp: DateTime<Utc>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/v1/ai/generate-signals", post(generate_signals))
}

/// POST /api/v1/ai/generate-signals
///
/// A symbol whose data or model fails lands in `errors`; the rest still get signals.
async fn generate_signals(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<SignalsBody>,
) -> Result<Json<ApiResponse<SignalBatch>>, ApiError> {
    let symbols = request_symbols(&body.symbols)?;
    let strategy: StrategyType = body.strategy_type.as_deref().unwrap_or("momentum").parse()?;
    let risk_level = body.risk_level.unwrap_or(0.5);
    if !(0.0..=1.0).contains(&risk_level) {
        return Err(ApiError::BadRequest(format!(
            "risk_level must be in [0, 1], got {risk_level}"
        )));
    }
    let interval = match body.timeframe.as_deref() {
        Some(t) => t.parse::<Interval>().map_err(ApiError::BadRequest)?,
        None => Interval::Daily,
    };
    let query = HistoryQuery::period(SIGNAL_PERIOD).with_interval(interval);

    let mut errors = BTreeMap::new();
    let mut series: Vec<PriceSeries> = Vec::with_capacity(symbols.len());
    for (symbol, result) in state.market.histories_settled(&symbols, &query).await {
        match result {
            Ok(s) => series.push(s),
            Err(e) => {
                warn!(%symbol, error = %e, "No history for signal");
                errors.insert(symbol, e.to_string());
            }
        }
    }

    let generator = state.signals.clone();
    let (signals, failed) = blocking(move || {
        let mut signals = BTreeMap::new();
        let mut failed = BTreeMap::new();
        for s in &series {
            match generator.generate(s, interval.as_str(), strategy, risk_level) {
                Ok(signal) => {
                    signals.insert(s.symbol.clone(), signal);
                }
                Err(e) => {
                    failed.insert(s.symbol.clone(), e.to_string());
                }
            }
        }
        Ok((signals, failed))
    })
    .await?;
    for (symbol, error) in &failed {
        warn!(%symbol, %error, "Signal generation failed");
    }
    errors.extend(failed);

    Ok(Json(ApiResponse::ok(SignalBatch {
        signals,
        errors,
        strategy_type: strategy,
        risk_level,
        timestamp: Utc::now(),
    })))
}
