//! Provider backed by price series held in memory.

use super::{resample, HistoryQuery, MarketDataProvider, ProviderError, Span};
use async_trait::async_trait;
use quant_core::{PriceSeries, Quote};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct Faults {
    /// Returned on every call for the symbol
    failing: HashMap<String, ProviderError>,
    /// Remaining calls answered with `RateLimited`
    rate_limited: HashMap<String, usize>,
    /// Simulated response time of every call
    latency: Duration,
}

/// Counts a call as in flight until dropped.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Serves daily series from a price file or from test fixtures.
///
/// Periods are measured back from each series' last bar. Failures, rate
/// limits and latency can be injected; peak concurrency is recorded.
#[derive(Debug, Default)]
pub struct InMemoryProvider {
    series: BTreeMap<String, PriceSeries>,
    faults: Mutex<Faults>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl InMemoryProvider {
    pub fn new(series: impl IntoIterator<Item = PriceSeries>) -> Self {
        Self {
            series: series.into_iter().map(|s| (s.symbol.clone(), s)).collect(),
            ..Self::default()
        }
    }

    /// Load a `{"SYMBOL": [bars...]}` JSON price file.
    pub fn from_file(path: &Path) -> quant_core::Result<Self> {
        Ok(Self::new(PriceSeries::load_map(path)?.into_values()))
    }

    pub fn symbols(&self) -> Vec<String> {
        self.series.keys().cloned().collect()
    }

    /// Fail every call for `symbol` with `error`.
    pub fn fail_with(&self, symbol: &str, error: ProviderError) {
        self.faults().failing.insert(symbol.to_uppercase(), error);
    }

    /// Answer the next `times` calls for `symbol` with `RateLimited`.
    pub fn rate_limit(&self, symbol: &str, times: usize) {
        self.faults().rate_limited.insert(symbol.to_uppercase(), times);
    }

    /// Delay every call by `latency` before answering.
    pub fn set_latency(&self, latency: Duration) {
        self.faults().latency = latency;
    }

    /// Highest number of calls that were in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Provider calls made so far, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn faults(&self) -> MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self) -> InFlight<'_> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);
        let latency = self.faults().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        guard
    }

    fn lookup(&self, symbol: &str) -> Result<&PriceSeries, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let symbol = symbol.to_uppercase();
        {
            let mut faults = self.faults();
            if let Some(error) = faults.failing.get(&symbol) {
                return Err(error.clone());
            }
            if let Some(remaining) = faults.rate_limited.get_mut(&symbol) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ProviderError::RateLimited { retry_after: None });
                }
            }
        }
        self.series
            .get(&symbol)
            .filter(|s| !s.is_empty())
            .ok_or(ProviderError::NotFound(symbol))
    }
}

#[async_trait]
impl MarketDataProvider for InMemoryProvider {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn quote(&self, symbol: &str) -> Result<Quote, ProviderError> {
        let _in_flight = self.enter().await;
        let series = self.lookup(symbol)?;
        Quote::from_bars(&series.symbol, &series.bars)
            .map_err(|_| ProviderError::NotFound(series.symbol.clone()))
    }

    async fn history(&self, symbol: &str, query: &HistoryQuery) -> Result<PriceSeries, ProviderError> {
        let _in_flight = self.enter().await;
        let series = self.lookup(symbol)?;
        let window = match query.span {
            Span::Period(period) => match period.days() {
                Some(days) => series.trailing_days(days),
                None => series.clone(),
            },
            Span::Between { start, end } => series.between(start, end),
        };
        if window.is_empty() {
            return Err(ProviderError::NotFound(format!(
                "{} has no bars in {}",
                series.symbol, query.span
            )));
        }
        Ok(resample(&window, query.interval))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{Interval, Period};
    use chrono::NaiveDate;
    use std::io::Write;

    fn series(symbol: &str, n: usize) -> PriceSeries {
        let closes: Vec<f64> = (0..n).map(|i| 100.0 + i as f64).collect();
        PriceSeries::from_closes(symbol, NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(), &closes)
    }

    #[tokio::test]
    async fn test_quote_and_history() {
        let provider = InMemoryProvider::new([series("AAPL", 400)]);

        let quote = provider.quote("aapl").await.unwrap();
        assert_eq!(quote.price, 499.0);
        assert_eq!(quote.previous_close, 498.0);

        let year = provider
            .history("AAPL", &HistoryQuery::period(Period::OneYear))
            .await
            .unwrap();
        assert_eq!(year.len(), 366);

        let monthly = provider
            .history(
                "AAPL",
                &HistoryQuery::period(Period::Max).with_interval(Interval::Monthly),
            )
            .await
            .unwrap();
        assert_eq!(monthly.len(), 14);
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn test_unknown_symbol_and_empty_range() {
        let provider = InMemoryProvider::new([series("AAPL", 10)]);
        assert!(matches!(
            provider.quote("NOPE").await,
            Err(ProviderError::NotFound(_))
        ));

        let day = |d| NaiveDate::from_ymd_opt(2024, 6, d).unwrap();
        assert!(matches!(
            provider.history("AAPL", &HistoryQuery::between(day(1), day(30))).await,
            Err(ProviderError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let provider = InMemoryProvider::new([series("AAPL", 10), series("MSFT", 10)]);
        provider.rate_limit("AAPL", 2);
        provider.fail_with("MSFT", ProviderError::Upstream("down".into()));

        assert!(matches!(
            provider.quote("AAPL").await,
            Err(ProviderError::RateLimited { .. })
        ));
        assert!(provider.quote("AAPL").await.is_err());
        assert!(provider.quote("AAPL").await.is_ok());
        assert!(matches!(
            provider.quote("MSFT").await,
            Err(ProviderError::Upstream(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_and_in_flight_tracking() {
        let provider = InMemoryProvider::new([series("AAPL", 10), series("MSFT", 10)]);
        provider.set_latency(Duration::from_millis(50));

        let started = tokio::time::Instant::now();
        let (a, b) = tokio::join!(provider.quote("AAPL"), provider.quote("MSFT"));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(started.elapsed(), Duration::from_millis(50));
        assert_eq!(provider.max_in_flight(), 2);

        provider.quote("AAPL").await.unwrap();
        assert_eq!(provider.max_in_flight(), 2);
    }

    #[tokio::test]
    async fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"spy": [{{"date": "2024-01-02", "open": 1, "high": 2, "low": 0.5, "close": 1.5, "volume": 10}}]}}"#
        )
        .unwrap();

        let provider = InMemoryProvider::from_file(file.path()).unwrap();
        assert_eq!(provider.symbols(), vec!["SPY"]);
        assert_eq!(provider.quote("SPY").await.unwrap().price, 1.5);
    }
}
