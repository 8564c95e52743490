use axum::{extract::State, routing::post, Json, Router};
use quant_core::risk::{
    beta_from_series, portfolio_returns, BetaReport, CustomScenario, ScenarioKind, StressReport,
    DEFAULT_BENCHMARK, DEFAULT_SHOCK_MAGNITUDE,
};
use quant_core::{ApiResponse, StressTester, VarMethod, VarReport};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use super::{blocking, history_query, portfolio_weights};
use crate::error::{ApiError, ApiJson};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct VarBody {
    pub portfolio: BTreeMap<String, f64>,
    pub confidence_level: Option<f64>,
    pub time_horizon: Option<usize>,
    pub method: Option<String>,
    pub period: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StressBody {
    pub portfolio: BTreeMap<String, f64>,
    /// Built-in scenario names; all of them when omitted
    pub scenarios: Option<Vec<String>>,
    pub shock_magnitude: Option<f64>,
    #[serde(default)]
    pub custom_scenarios: Vec<CustomScenario>,
    pub period: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BetaBody {
    pub portfolio: BTreeMap<String, f64>,
    pub benchmark: Option<String>,
    pub period: Option<String>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/risk/calculate-var", post(calculate_var))
        .route("/api/v1/risk/stress-test", post(stress_test))
        .route("/api/v1/risk/beta", post(beta))
}

/// POST /api/v1/risk/calculate-var
async fn calculate_var(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<VarBody>,
) -> Result<Json<ApiResponse<VarReport>>, ApiError> {
    let weights = portfolio_weights(&body.portfolio)?;
    let method: VarMethod = body.method.as_deref().unwrap_or("historical").parse()?;
    let confidence = body.confidence_level.unwrap_or(0.95);
    let horizon = body.time_horizon.unwrap_or(1);
    let query = history_query(&state, body.period.as_deref())?;

    info!(
        positions = weights.len(),
        %method,
        confidence,
        horizon,
        "Calculating VaR"
    );

    let symbols: Vec<String> = weights.keys().cloned().collect();
    let series = state.market.histories(&symbols, &query).await?;
    let calculator = state.var.clone();
    let report = blocking(move || {
        let returns = portfolio_returns(&series, &weights)?;
        calculator.calculate(&returns, confidence, horizon, method)
    })
    .await?;
    Ok(Json(ApiResponse::ok(report)))
}

/// POST /api/v1/risk/stress-test
async fn stress_test(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<StressBody>,
) -> Result<Json<ApiResponse<StressReport>>, ApiError> {
    let weights = portfolio_weights(&body.portfolio)?;
    let kinds: Vec<ScenarioKind> = match &body.scenarios {
        Some(names) => names
            .iter()
            .map(|n| n.parse())
            .collect::<quant_core::Result<_>>()?,
        None => ScenarioKind::ALL.to_vec(),
    };
    let tester = StressTester::new(body.shock_magnitude.unwrap_or(DEFAULT_SHOCK_MAGNITUDE))?;
    let query = history_query(&state, body.period.as_deref())?;

    let symbols: Vec<String> = weights.keys().cloned().collect();
    let series = state.market.histories(&symbols, &query).await?;
    let custom = body.custom_scenarios;
    let report = blocking(move || {
        let returns = portfolio_returns(&series, &weights)?;
        tester.run(&weights, &returns, &kinds, &custom)
    })
    .await?;
    Ok(Json(ApiResponse::ok(report)))
}

/// POST /api/v1/risk/beta
async fn beta(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<BetaBody>,
) -> Result<Json<ApiResponse<BetaReport>>, ApiError> {
    let weights = portfolio_weights(&body.portfolio)?;
    let benchmark = body
        .benchmark
        .as_deref()
        .map(|b| b.trim().to_uppercase())
        .filter(|b| !b.is_empty())
        .unwrap_or_else(|| DEFAULT_BENCHMARK.to_string());
    let query = history_query(&state, body.period.as_deref())?;

    let mut symbols: Vec<String> = weights.keys().cloned().collect();
    if !symbols.contains(&benchmark) {
        symbols.push(benchmark.clone());
    }
    let series = state.market.histories(&symbols, &query).await?;
    let risk_free_rate = state.config.analytics.risk_free_rate;
    let report = blocking(move || beta_from_series(&series, &weights, &benchmark, risk_free_rate)).await?;
    Ok(Json(ApiResponse::ok(report)))
}
