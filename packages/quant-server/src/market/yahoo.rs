//! Yahoo Finance chart API client.

use super::{HistoryQuery, MarketDataProvider, Period, ProviderError, Span};
use async_trait::async_trait;
use chrono::{DateTime, NaiveTime};
use quant_core::{PriceBar, PriceSeries, Quote};
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://query1.finance.yahoo.com";

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    #[serde(default)]
    result: Option<Vec<ChartResult>>,
    #[serde(default)]
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    #[serde(default)]
    quote: Vec<OhlcvArrays>,
    #[serde(default)]
    adjclose: Vec<AdjClose>,
}

#[derive(Debug, Default, Deserialize)]
struct OhlcvArrays {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

#[derive(Debug, Deserialize)]
struct AdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

/// Turn a chart API body into a series, skipping bars with missing fields.
///
/// When an adjusted close is present the open, high and low are scaled by
/// `adjclose / close` so every bar stays internally consistent.
pub fn parse_chart(symbol: &str, body: &str) -> Result<PriceSeries, ProviderError> {
    let response: ChartResponse =
        serde_json::from_str(body).map_err(|e| ProviderError::Decode(e.to_string()))?;

    if let Some(error) = response.chart.error {
        return Err(if error.code.eq_ignore_ascii_case("Not Found") {
            ProviderError::NotFound(symbol.to_uppercase())
        } else {
            ProviderError::Upstream(format!("{}: {}", error.code, error.description))
        });
    }

    let result = response
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| ProviderError::NotFound(symbol.to_uppercase()))?;
    let arrays = result.indicators.quote.into_iter().next().unwrap_or_default();
    let adjusted = result.indicators.adjclose.into_iter().next().map(|a| a.adjclose);

    let at = |values: &[Option<f64>], i: usize| values.get(i).copied().flatten();
    let bars: Vec<PriceBar> = result
        .timestamp
        .iter()
        .enumerate()
        .filter_map(|(i, &ts)| {
            let date = DateTime::from_timestamp(ts, 0)?.date_naive();
            let raw_close = at(&arrays.close, i)?;
            let close = adjusted
                .as_deref()
                .and_then(|adj| at(adj, i))
                .unwrap_or(raw_close);
            // Rescale the intraday prices onto the adjusted close
            let factor = if raw_close != 0.0 { close / raw_close } else { 1.0 };
            Some(PriceBar {
                date,
                open: at(&arrays.open, i)? * factor,
                high: at(&arrays.high, i)? * factor,
                low: at(&arrays.low, i)? * factor,
                close,
                volume: at(&arrays.volume, i)?,
            })
        })
        .collect();

    if bars.is_empty() {
        return Err(ProviderError::NotFound(symbol.to_uppercase()));
    }
    Ok(PriceSeries::new(symbol, bars))
}

#[derive(Debug, Clone)]
pub struct YahooProvider {
    base_url: String,
    client: Client,
}

impl YahooProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("quant-server/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ProviderError::Upstream(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn query_params(query: &HistoryQuery) -> Vec<(&'static str, String)> {
        let mut params = vec![("interval", query.interval.as_str().to_string())];
        match query.span {
            Span::Period(period) => params.push(("range", period.as_str().to_string())),
            Span::Between { start, end } => {
                let from = start.and_time(NaiveTime::MIN).and_utc().timestamp();
                // Inclusive end date
                let to = end.and_time(NaiveTime::MIN).and_utc().timestamp() + 86_400;
                params.push(("period1", from.to_string()));
                params.push(("period2", to.to_string()));
            }
        }
        params
    }

    async fn chart(&self, symbol: &str, query: &HistoryQuery) -> Result<PriceSeries, ProviderError> {
        let url = format!("{}/v8/finance/chart/{}", self.base_url, symbol.to_uppercase());
        debug!(%url, span = %query.span, interval = %query.interval, "Fetching chart");

        let response = self
            .client
            .get(&url)
            .query(&Self::query_params(query))
            .send()
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(ProviderError::NotFound(symbol.to_uppercase())),
            StatusCode::TOO_MANY_REQUESTS => {
                let retry_after = response
                    .headers()
                    .get(header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                return Err(ProviderError::RateLimited { retry_after });
            }
            status if !status.is_success() => {
                return Err(ProviderError::Upstream(format!(
                    "chart request for {} failed with {}",
                    symbol, status
                )));
            }
            _ => {}
        }

        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;
        parse_chart(symbol, &body)
    }
}

#[async_trait]
impl MarketDataProvider for YahooProvider {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn quote(&self, symbol: &str) -> Result<Quote, ProviderError> {
        let series = self.chart(symbol, &HistoryQuery::period(Period::OneMonth)).await?;
        Quote::from_bars(&series.symbol, &series.bars)
            .map_err(|_| ProviderError::NotFound(symbol.to_uppercase()))
    }

    async fn history(&self, symbol: &str, query: &HistoryQuery) -> Result<PriceSeries, ProviderError> {
        self.chart(symbol, query).await
    }
}
