pub mod analytics;
pub mod backtest;
pub mod market;
pub mod portfolio;
pub mod risk;
pub mod signals;

use axum::extract::State;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::ApiError;
use crate::market::{HistoryQuery, Period};
use crate::state::AppState;

/// Assemble the `/api/v1` router.
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(market::routes())
        .merge(portfolio::routes())
        .merge(risk::routes())
        .merge(signals::routes())
        .merge(backtest::routes())
        .merge(analytics::routes())
}

/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "services": {
            "market_data": state.market.provider_name(),
            "portfolio_optimizer": "ready",
            "risk_manager": "ready",
            "signal_generator": "ready",
            "backtest_runner": "ready",
        },
    }))
}

/// Run a CPU-bound computation off the async workers.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> quant_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

/// Optional `period` string, falling back to the configured default.
pub(crate) fn history_query(state: &AppState, period: Option<&str>) -> Result<HistoryQuery, ApiError> {
    let period = match period {
        Some(p) => p.parse::<Period>().map_err(ApiError::BadRequest)?,
        None => state.config.analytics.default_period,
    };
    Ok(HistoryQuery::period(period))
}

/// Trimmed, uppercased symbols in request order; empty lists are rejected.
pub(crate) fn request_symbols(symbols: &[String]) -> Result<Vec<String>, ApiError> {
    let mut out: Vec<String> = Vec::with_capacity(symbols.len());
    for symbol in symbols {
        let symbol = symbol.trim().to_uppercase();
        if !symbol.is_empty() && !out.contains(&symbol) {
            out.push(symbol);
        }
    }
    if out.is_empty() {
        return Err(ApiError::BadRequest("at least one symbol is required".into()));
    }
    Ok(out)
}

/// Uppercase portfolio keys; empty portfolios and keys that collide once
/// normalized (e.g. `aapl` and `AAPL`) are rejected.
pub(crate) fn portfolio_weights(
    portfolio: &std::collections::BTreeMap<String, f64>,
) -> Result<quant_core::Weights, ApiError> {
    let mut weights = quant_core::Weights::new();
    for (key, weight) in portfolio {
        let symbol = key.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(ApiError::BadRequest("portfolio has an empty symbol".into()));
        }
        if weights.insert(symbol.clone(), *weight).is_some() {
            return Err(ApiError::BadRequest(format!(
                "portfolio lists {symbol} more than once"
            )));
        }
    }
    if weights.is_empty() {
        return Err(ApiError::BadRequest("portfolio has no positions".into()));
    }
    Ok(weights)
}
