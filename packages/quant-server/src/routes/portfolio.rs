use axum::{extract::State, routing::post, Json, Router};
use quant_core::portfolio::{efficient_frontier, Frontier};
use quant_core::{Allocation, ApiResponse, OptimizationRequest, ReturnMatrix, WeightBounds};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

use super::{blocking, history_query, request_symbols};
use crate::error::{ApiError, ApiJson};
use crate::state::AppState;

const DEFAULT_FRONTIER_POINTS: usize = 100;

#[derive(Debug, Default, Deserialize)]
pub struct Constraints {
    pub min_weight: Option<f64>,
    pub max_weight: Option<f64>,
}

/// Body for POST /api/v1/portfolio/optimize.
#[derive(Debug, Deserialize)]
pub struct OptimizeBody {
    pub symbols: Vec<String>,
    pub method: Option<String>,
    pub objective: Option<String>,
    #[serde(default)]
    pub constraints: Constraints,
    pub risk_tolerance: Option<f64>,
    /// Black-Litterman absolute views, symbol to expected annual return
    #[serde(default)]
    pub views: BTreeMap<String, f64>,
    pub period: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FrontierBody {
    pub symbols: Vec<String>,
    pub num_portfolios: Option<usize>,
    pub risk_free_rate: Option<f64>,
    pub period: Option<String>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/portfolio/optimize", post(optimize))
        .route("/api/v1/portfolio/efficient-frontier", post(frontier))
}

/// POST /api/v1/portfolio/optimize
async fn optimize(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<OptimizeBody>,
) -> Result<Json<ApiResponse<Allocation>>, ApiError> {
    let symbols = request_symbols(&body.symbols)?;
    let bounds = WeightBounds::new(
        body.constraints.min_weight.unwrap_or(0.0),
        body.constraints.max_weight.unwrap_or(1.0),
    )?;
    let mut request = OptimizationRequest::new(
        body.method.as_deref().unwrap_or("mean_variance"),
        body.objective.as_deref().unwrap_or("max_sharpe"),
    )?
    .with_bounds(bounds)
    .with_views(body.views);
    if let Some(tolerance) = body.risk_tolerance {
        request = request.with_risk_tolerance(tolerance)?;
    }
    let query = history_query(&state, body.period.as_deref())?;

    info!(
        symbols = ?symbols,
        method = %request.method,
        objective = %request.objective,
        "Optimizing portfolio"
    );

    let series = state.market.histories(&symbols, &query).await?;
    let optimizer = state.optimizer;
    let allocation = blocking(move || optimizer.optimize(&series, &request)).await?;
    Ok(Json(ApiResponse::ok(allocation)))
}

/// POST /api/v1/portfolio/efficient-frontier
async fn frontier(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<FrontierBody>,
) -> Result<Json<ApiResponse<Frontier>>, ApiError> {
    let symbols = request_symbols(&body.symbols)?;
    let query = history_query(&state, body.period.as_deref())?;
    let points = body.num_portfolios.unwrap_or(DEFAULT_FRONTIER_POINTS);
    let risk_free_rate = body
        .risk_free_rate
        .unwrap_or(state.config.analytics.risk_free_rate);

    let series = state.market.histories(&symbols, &query).await?;
    let frontier = blocking(move || {
        let returns = ReturnMatrix::from_series(&series)?;
        efficient_frontier(&returns, points, risk_free_rate)
    })
    .await?;
    Ok(Json(ApiResponse::ok(frontier)))
}
