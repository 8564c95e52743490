use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use quant_core::{ApiResponse, IndicatorSnapshot, Quote};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

use super::{history_query, request_symbols};
use crate::error::{ApiError, ApiJson, ApiQuery};
use crate::market::{
    BatchQuotes, CompanyProfile, HistoryQuery, Interval, MarketSnapshot, SectorPerformance, TrackedStock,
};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct BatchQuotesBody {
    pub symbols: Vec<String>,
}

/// Query for GET /api/v1/market/historical/{symbol}.
///
/// `start` and `end` together select an explicit range and take precedence
/// over `period`.
#[derive(Debug, Default, Deserialize)]
pub struct HistoricalParams {
    pub period: Option<String>,
    pub interval: Option<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TopPerformersParams {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct TopPerformers {
    pub stocks: Vec<TrackedStock>,
    pub errors: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct SectorReport {
    pub sectors: BTreeMap<String, SectorPerformance>,
    pub errors: BTreeMap<String, String>,
}

/// Profile of a tracked company; `quote` is absent when it could not be fetched.
#[derive(Debug, Serialize)]
pub struct CompanyDetails {
    pub symbol: String,
    #[serde(flatten)]
    pub profile: CompanyProfile,
    pub quote: Option<Quote>,
    pub error: Option<String>,
}

const DEFAULT_TOP_PERFORMERS: usize = 10;

#[derive(Debug, Serialize)]
pub struct HistoricalData {
    pub symbol: String,
    pub interval: Interval,
    pub bars: Vec<IndicatorSnapshot>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/market/quote/{symbol}", get(quote))
        .route("/api/v1/market/batch-quotes", post(batch_quotes))
        .route("/api/v1/market/historical/{symbol}", get(historical))
        .route("/api/v1/market/universe", get(universe))
        .route("/api/v1/market/top-performers", get(top_performers))
        .route("/api/v1/market/sector-performance", get(sector_performance))
        .route("/api/v1/market/company/{symbol}", get(company))
}

async fn universe_snapshot(state: &AppState) -> MarketSnapshot {
    let universe = &state.config.universe;
    universe.snapshot(state.market.batch_quotes(&universe.symbols()).await)
}

/// GET /api/v1/market/universe
async fn universe(State(state): State<Arc<AppState>>) -> Json<ApiResponse<MarketSnapshot>> {
    Json(ApiResponse::ok(universe_snapshot(&state).await))
}

/// GET /api/v1/market/top-performers
async fn top_performers(
    State(state): State<Arc<AppState>>,
    ApiQuery(params): ApiQuery<TopPerformersParams>,
) -> Result<Json<ApiResponse<TopPerformers>>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_TOP_PERFORMERS);
    if limit == 0 {
        return Err(ApiError::BadRequest("limit must be at least 1".into()));
    }
    let snapshot = universe_snapshot(&state).await;
    Ok(Json(ApiResponse::ok(TopPerformers {
        stocks: snapshot.top_performers(limit),
        errors: snapshot.errors,
    })))
}

/// GET /api/v1/market/sector-performance
async fn sector_performance(State(state): State<Arc<AppState>>) -> Json<ApiResponse<SectorReport>> {
    let snapshot = universe_snapshot(&state).await;
    Json(ApiResponse::ok(SectorReport {
        sectors: snapshot.sector_performance(),
        errors: snapshot.errors,
    }))
}

/// GET /api/v1/market/company/{symbol}
async fn company(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<CompanyDetails>>, ApiError> {
    let symbol = symbol.trim().to_uppercase();
    let profile = state
        .config
        .universe
        .get(&symbol)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("{symbol} is not in the tracked universe")))?;

    let (quote, error) = match state.market.quote(&symbol).await {
        Ok(quote) => (Some(quote), None),
        Err(e) => {
            warn!(%symbol, error = %e, "No quote for tracked company");
            (None, Some(e.to_string()))
        }
    };
    Ok(Json(ApiResponse::ok(CompanyDetails {
        symbol,
        profile,
        quote,
        error,
    })))
}

/// GET /api/v1/market/quote/{symbol}
async fn quote(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<Quote>>, ApiError> {
    let quote = state.market.quote(&symbol).await?;
    Ok(Json(ApiResponse::ok(quote)))
}

/// POST /api/v1/market/batch-quotes
async fn batch_quotes(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<BatchQuotesBody>,
) -> Result<Json<ApiResponse<BatchQuotes>>, ApiError> {
    let symbols = request_symbols(&body.symbols)?;
    Ok(Json(ApiResponse::ok(state.market.batch_quotes(&symbols).await)))
}

/// GET /api/v1/market/historical/{symbol}
async fn historical(
    State(state): State<Arc<AppState>>,
    Path(symbol): Path<String>,
    ApiQuery(params): ApiQuery<HistoricalParams>,
) -> Result<Json<ApiResponse<HistoricalData>>, ApiError> {
    let interval = match params.interval.as_deref() {
        Some(i) => i.parse::<Interval>().map_err(ApiError::BadRequest)?,
        None => Interval::Daily,
    };
    let query = match (params.start, params.end) {
        (Some(start), Some(end)) if start <= end => HistoryQuery::between(start, end),
        (Some(_), Some(_)) => return Err(ApiError::BadRequest("start must not be after end".into())),
        (None, None) => history_query(&state, params.period.as_deref())?,
        _ => return Err(ApiError::BadRequest("start and end must be given together".into())),
    }
    .with_interval(interval);

    let series = state.market.history(&symbol, &query).await?;
    Ok(Json(ApiResponse::ok(HistoricalData {
        symbol: series.symbol.clone(),
        interval,
        bars: IndicatorSnapshot::from_series(&series),
    })))
}
