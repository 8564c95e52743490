use axum::{extract::State, routing::post, Json, Router};
use quant_core::portfolio::{factor_analysis, Factor, FactorReport};
use quant_core::{ApiResponse, CorrelationMethod};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{blocking, history_query, portfolio_weights};
use crate::error::{ApiError, ApiJson};
use crate::market::CorrelationReport;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct FactorBody {
    pub portfolio: BTreeMap<String, f64>,
    /// Factor names; every known factor when omitted
    pub factors: Option<Vec<String>>,
    pub period: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CorrelationBody {
    pub symbols: Vec<String>,
    pub period: Option<String>,
    pub method: Option<String>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/analytics/factor-analysis", post(factors))
        .route("/api/v1/analytics/correlation-analysis", post(correlations))
}

/// POST /api/v1/analytics/factor-analysis
async fn factors(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<FactorBody>,
) -> Result<Json<ApiResponse<FactorReport>>, ApiError> {
    let weights = portfolio_weights(&body.portfolio)?;
    let factors: Vec<Factor> = match &body.factors {
        Some(names) => names
            .iter()
            .map(|n| n.parse())
            .collect::<quant_core::Result<_>>()?,
        None => Factor::ALL.to_vec(),
    };
    if factors.is_empty() {
        return Err(ApiError::BadRequest("at least one factor is required".into()));
    }
    let query = history_query(&state, body.period.as_deref())?;

    // Holdings plus each factor's proxy ETF
    let mut symbols: Vec<String> = weights.keys().cloned().collect();
    for factor in &factors {
        let proxy = factor.proxy().to_string();
        if !symbols.contains(&proxy) {
            symbols.push(proxy);
        }
    }
    let series = state.market.histories(&symbols, &query).await?;
    let report = blocking(move || factor_analysis(&series, &weights, &factors)).await?;
    Ok(Json(ApiResponse::ok(report)))
}

/// POST /api/v1/analytics/correlation-analysis
async fn correlations(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<CorrelationBody>,
) -> Result<Json<ApiResponse<CorrelationReport>>, ApiError> {
    let method: CorrelationMethod = match body.method.as_deref() {
        Some(m) => m.parse()?,
        None => CorrelationMethod::Pearson,
    };
    let query = history_query(&state, body.period.as_deref())?;
    let report = state.market.correlations(&body.symbols, &query, method).await?;
    Ok(Json(ApiResponse::ok(report)))
}
