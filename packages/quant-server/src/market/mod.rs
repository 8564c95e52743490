//! Market data providers and the caching, retrying service in front of them.

mod memory;
mod service;
mod universe;
mod yahoo;

pub use memory::InMemoryProvider;
pub use service::{with_backoff, BatchQuotes, CorrelationReport, MarketDataService, RetryPolicy};
pub use universe::{CompanyProfile, MarketSnapshot, SectorPerformance, TrackedStock, Universe};
pub use yahoo::{YahooProvider, DEFAULT_BASE_URL as YAHOO_BASE_URL};

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use quant_core::{PriceBar, PriceSeries, Quote};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Failure talking to an upstream data source.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("symbol not found: {0}")]
    NotFound(String),

    #[error("rate limited by market data provider")]
    RateLimited { retry_after: Option<Duration> },

    #[error("market data provider error: {0}")]
    Upstream(String),

    #[error("could not decode market data: {0}")]
    Decode(String),
}

/// Lookback window ending at the latest bar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Period {
    #[serde(rename = "1mo")]
    OneMonth,
    #[serde(rename = "3mo")]
    ThreeMonths,
    #[serde(rename = "6mo")]
    SixMonths,
    #[serde(rename = "1y")]
    OneYear,
    #[serde(rename = "2y")]
    TwoYears,
    #[serde(rename = "5y")]
    FiveYears,
    #[serde(rename = "max")]
    Max,
}

impl Period {
    pub const NAMES: [&'static str; 7] = ["1mo", "3mo", "6mo", "1y", "2y", "5y", "max"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneMonth => "1mo",
            Self::ThreeMonths => "3mo",
            Self::SixMonths => "6mo",
            Self::OneYear => "1y",
            Self::TwoYears => "2y",
            Self::FiveYears => "5y",
            Self::Max => "max",
        }
    }

    /// Calendar days covered; `None` for the full history.
    pub fn days(&self) -> Option<u64> {
        match self {
            Self::OneMonth => Some(31),
            Self::ThreeMonths => Some(92),
            Self::SixMonths => Some(183),
            Self::OneYear => Some(365),
            Self::TwoYears => Some(730),
            Self::FiveYears => Some(1826),
            Self::Max => None,
        }
    }
}

impl FromStr for Period {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1mo" => Ok(Self::OneMonth),
            "3mo" => Ok(Self::ThreeMonths),
            "6mo" => Ok(Self::SixMonths),
            "1y" => Ok(Self::OneYear),
            "2y" => Ok(Self::TwoYears),
            "5y" => Ok(Self::FiveYears),
            "max" => Ok(Self::Max),
            other => Err(format!(
                "unknown period '{}' (expected one of: {})",
                other,
                Self::NAMES.join(", ")
            )),
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bar size.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub enum Interval {
    #[default]
    #[serde(rename = "1d")]
    Daily,
    #[serde(rename = "1wk")]
    Weekly,
    #[serde(rename = "1mo")]
    Monthly,
}

impl Interval {
    pub const NAMES: [&'static str; 3] = ["1d", "1wk", "1mo"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "1d",
            Self::Weekly => "1wk",
            Self::Monthly => "1mo",
        }
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1d" => Ok(Self::Daily),
            "1wk" => Ok(Self::Weekly),
            "1mo" => Ok(Self::Monthly),
            other => Err(format!(
                "unknown interval '{}' (expected one of: {})",
                other,
                Self::NAMES.join(", ")
            )),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Span {
    Period(Period),
    /// Inclusive date range
    Between { start: NaiveDate, end: NaiveDate },
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Period(p) => write!(f, "{}", p),
            Self::Between { start, end } => write!(f, "{}..{}", start, end),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HistoryQuery {
    pub span: Span,
    pub interval: Interval,
}

impl HistoryQuery {
    pub fn period(period: Period) -> Self {
        Self {
            span: Span::Period(period),
            interval: Interval::Daily,
        }
    }

    pub fn between(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            span: Span::Between { start, end },
            interval: Interval::Daily,
        }
    }

    pub fn with_interval(mut self, interval: Interval) -> Self {
        self.interval = interval;
        self
    }

    /// Cache key for `symbol` under this query.
    pub fn cache_key(&self, symbol: &str) -> String {
        format!("hist:{}:{}:{}", symbol, self.span, self.interval)
    }
}

/// Source of quotes and OHLCV history.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Short provider name reported by the health check.
    fn name(&self) -> &'static str;

    async fn quote(&self, symbol: &str) -> Result<Quote, ProviderError>;

    async fn history(&self, symbol: &str, query: &HistoryQuery) -> Result<PriceSeries, ProviderError>;
}

/// Aggregate daily bars into weekly or monthly bars dated by their last day.
pub fn resample(series: &PriceSeries, interval: Interval) -> PriceSeries {
    if interval == Interval::Daily {
        return series.clone();
    }
    let bucket = |date: NaiveDate| -> (i32, u32) {
        match interval {
            Interval::Daily => (date.year(), date.ordinal()),
            Interval::Weekly => {
                let week = date.iso_week();
                (week.year(), week.week())
            }
            Interval::Monthly => (date.year(), date.month()),
        }
    };

    let mut bars: Vec<PriceBar> = Vec::new();
    let mut current: Option<(i32, u32)> = None;
    for bar in &series.bars {
        let key = bucket(bar.date);
        if current == Some(key) {
            if let Some(last) = bars.last_mut() {
                last.date = bar.date;
                last.high = last.high.max(bar.high);
                last.low = last.low.min(bar.low);
                last.close = bar.close;
                last.volume += bar.volume;
                continue;
            }
        }
        bars.push(*bar);
        current = Some(key);
    }
    PriceSeries {
        symbol: series.symbol.clone(),
        bars,
    }
}
