use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use quant_core::backtest::{AggregateResult, Sizer, DEFAULT_INITIAL_CAPITAL};
use quant_core::{
    get_strategy, list_strategies, ApiResponse, BacktestEngine, BacktestResult, StrategyDefinition,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use super::{blocking, request_symbols};
use crate::error::{ApiError, ApiJson};
use crate::market::HistoryQuery;
use crate::state::AppState;

/// Body for POST /api/v1/backtest/run.
#[derive(Debug, Deserialize)]
pub struct RunBacktestBody {
    pub strategy: String,
    pub symbols: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: Option<f64>,
    /// Shares bought per entry; all available cash when omitted
    pub stake: Option<u32>,
    /// Overrides for the strategy's default parameters
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

/// A completed backtest, retrievable by id until the run cache expires it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BacktestRun {
    pub id: String,
    /// Strategy with the parameters actually used
    pub strategy: StrategyDefinition,
    pub symbols: Vec<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    pub sizer: Sizer,
    pub results: BTreeMap<String, BacktestResult>,
    /// Symbols left out because their history could not be fetched
    #[serde(default)]
    pub errors: BTreeMap<String, String>,
    pub aggregate: AggregateResult,
    pub created_at: DateTime<Utc>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/v1/backtest/run", post(run_backtest))
        .route("/api/v1/backtest/results/{id}", get(backtest_results))
        .route("/api/v1/backtest/strategies", get(strategies))
}

/// POST /api/v1/backtest/run
async fn run_backtest(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<RunBacktestBody>,
) -> Result<Json<ApiResponse<BacktestRun>>, ApiError> {
    let symbols = request_symbols(&body.symbols)?;
    if body.start_date >= body.end_date {
        return Err(ApiError::BadRequest(format!(
            "start_date {} must be before end_date {}",
            body.start_date, body.end_date
        )));
    }
    let strategy = get_strategy(&body.strategy)?.with_overrides(&body.parameters)?;
    let initial_capital = body.initial_capital.unwrap_or(DEFAULT_INITIAL_CAPITAL);
    let sizer = match body.stake {
        Some(0) => return Err(ApiError::BadRequest("stake must be at least one share".into())),
        Some(stake) => Sizer::Fixed(stake),
        None => Sizer::AllIn,
    };
    let engine = BacktestEngine::new(initial_capital)?.with_sizer(sizer);

    let id = uuid::Uuid::new_v4().to_string();
    info!(
        %id,
        strategy = %strategy.id,
        symbols = ?symbols,
        start = %body.start_date,
        end = %body.end_date,
        initial_capital,
        "Running backtest"
    );

    let query = HistoryQuery::between(body.start_date, body.end_date);
    let mut series = Vec::with_capacity(symbols.len());
    let mut errors = BTreeMap::new();
    let mut first_error = None;
    for (symbol, result) in state.market.histories_settled(&symbols, &query).await {
        match result {
            Ok(s) => series.push(s),
            Err(e) => {
                warn!(%id, %symbol, error = %e, "Skipping symbol without history");
                errors.insert(symbol, e.to_string());
                first_error.get_or_insert(e);
            }
        }
    }
    if let (true, Some(e)) = (series.is_empty(), first_error) {
        return Err(e.into());
    }
    let outcome = blocking(move || engine.run(&strategy, &series)).await?;

    let run = BacktestRun {
        id: id.clone(),
        strategy: outcome.strategy,
        symbols,
        start_date: body.start_date,
        end_date: body.end_date,
        initial_capital,
        sizer,
        results: outcome.results,
        errors,
        aggregate: outcome.aggregate,
        created_at: Utc::now(),
    };
    state.backtests.insert(id, run.clone());
    Ok(Json(ApiResponse::ok(run)))
}

/// GET /api/v1/backtest/results/{id}
async fn backtest_results(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<BacktestRun>>, ApiError> {
    state
        .backtests
        .get(&id)
        .map(|run| Json(ApiResponse::ok(run)))
        .ok_or_else(|| ApiError::NotFound(format!("backtest {id} not found")))
}

/// GET /api/v1/backtest/strategies
async fn strategies() -> Json<ApiResponse<Vec<StrategyDefinition>>> {
    Json(ApiResponse::ok(list_strategies()))
}
