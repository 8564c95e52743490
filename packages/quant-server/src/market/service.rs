//! Cached, rate-limit aware access to a market data provider.

use super::{HistoryQuery, MarketDataProvider, ProviderError};
use crate::error::ApiError;
use crate::store::TtlStore;
use futures::stream::{self, StreamExt, TryStreamExt};
use quant_core::portfolio::ReturnMatrix;
use quant_core::{CorrelationMethod, PriceSeries, Quote};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Exponential backoff applied to rate-limited provider calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Run `op`, retrying only `RateLimited` failures.
///
/// Waits double from `initial_backoff` up to `max_backoff`; a larger
/// `retry_after` hint replaces the computed wait, still capped.
pub async fn with_backoff<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0;
    loop {
        match op().await {
            Err(ProviderError::RateLimited { retry_after }) if attempt < policy.max_retries => {
                attempt += 1;
                let wait = retry_after.map_or(backoff, |hint| hint.max(backoff)).min(policy.max_backoff);
                warn!(
                    what,
                    attempt,
                    wait_ms = wait.as_millis() as u64,
                    "Rate limited by market data provider, backing off"
                );
                tokio::time::sleep(wait).await;
                backoff = (backoff * 2).min(policy.max_backoff);
            }
            other => return other,
        }
    }
}

/// Quotes for a symbol list with per-symbol failures kept apart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchQuotes {
    pub quotes: BTreeMap<String, Quote>,
    pub errors: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorrelationReport {
    pub symbols: Vec<String>,
    pub method: CorrelationMethod,
    pub matrix: Vec<Vec<f64>>,
    pub observations: usize,
}

pub struct MarketDataService {
    provider: Arc<dyn MarketDataProvider>,
    quotes: TtlStore<String, Quote>,
    history: TtlStore<String, PriceSeries>,
    retry: RetryPolicy,
    concurrency: usize,
}

impl std::fmt::Debug for MarketDataService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketDataService")
            .field("provider", &self.provider.name())
            .field("retry", &self.retry)
            .field("concurrency", &self.concurrency)
            .finish()
    }
}

/// Uppercased, de-duplicated, sorted symbols.
pub fn normalize_symbols(symbols: &[String]) -> Vec<String> {
    symbols
        .iter()
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

impl MarketDataService {
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        quotes: TtlStore<String, Quote>,
        history: TtlStore<String, PriceSeries>,
        retry: RetryPolicy,
        concurrency: usize,
    ) -> Self {
        Self {
            provider,
            quotes,
            history,
            retry,
            concurrency: concurrency.max(1),
        }
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    pub async fn quote(&self, symbol: &str) -> Result<Quote, ProviderError> {
        let symbol = symbol.trim().to_uppercase();
        if let Some(quote) = self.quotes.get(&symbol) {
            debug!(%symbol, "Quote cache hit");
            return Ok(quote);
        }
        let quote = with_backoff(&self.retry, &symbol, || self.provider.quote(&symbol)).await?;
        self.quotes.insert(symbol, quote.clone());
        Ok(quote)
    }

    /// Fetch quotes through a pool of at most `concurrency` in-flight calls.
    pub async fn batch_quotes(&self, symbols: &[String]) -> BatchQuotes {
        let results: Vec<(String, Result<Quote, ProviderError>)> = stream::iter(normalize_symbols(symbols))
            .map(|symbol| async move {
                let result = self.quote(&symbol).await;
                (symbol, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut batch = BatchQuotes::default();
        for (symbol, result) in results {
            match result {
                Ok(quote) => {
                    batch.quotes.insert(symbol, quote);
                }
                Err(e) => {
                    warn!(%symbol, error = %e, "Quote failed in batch");
                    batch.errors.insert(symbol, e.to_string());
                }
            }
        }
        batch
    }

    pub async fn history(&self, symbol: &str, query: &HistoryQuery) -> Result<PriceSeries, ProviderError> {
        let symbol = symbol.trim().to_uppercase();
        let key = query.cache_key(&symbol);
        if let Some(series) = self.history.get(&key) {
            debug!(%key, "History cache hit");
            return Ok(series);
        }
        let series = with_backoff(&self.retry, &key, || self.provider.history(&symbol, query)).await?;
        self.history.insert(key, series.clone());
        Ok(series)
    }

    /// Histories for every symbol, in the given order; the first failure aborts.
    pub async fn histories(&self, symbols: &[String], query: &HistoryQuery) -> Result<Vec<PriceSeries>, ProviderError> {
        stream::iter(symbols.iter().cloned())
            .map(|symbol| async move { self.history(&symbol, query).await })
            .buffered(self.concurrency)
            .try_collect()
            .await
    }

    /// Histories for every symbol, in the given order, with each outcome kept.
    ///
    /// Shares the `concurrency` bound with the other batch calls.
    pub async fn histories_settled(
        &self,
        symbols: &[String],
        query: &HistoryQuery,
    ) -> Vec<(String, Result<PriceSeries, ProviderError>)> {
        stream::iter(symbols.iter().cloned())
            .map(|symbol| async move {
                let result = self.history(&symbol, query).await;
                (symbol, result)
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }

    /// Return-correlation matrix over the dates all symbols share.
    pub async fn correlations(
        &self,
        symbols: &[String],
        query: &HistoryQuery,
        method: CorrelationMethod,
    ) -> Result<CorrelationReport, ApiError> {
        let symbols = normalize_symbols(symbols);
        if symbols.len() < 2 {
            return Err(ApiError::BadRequest("correlation needs at least two symbols".into()));
        }
        let series = self.histories(&symbols, query).await?;
        let returns = ReturnMatrix::from_series(&series)?;
        returns.require(2, 2)?;
        Ok(CorrelationReport {
            symbols: returns.symbols().to_vec(),
            method,
            matrix: returns.correlation(method),
            observations: returns.n_obs(),
        })
    }
}
