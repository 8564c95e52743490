//! Core data types shared by the analytics modules.

use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// One OHLCV bar.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PriceBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl PriceBar {
    /// Bar where open, high, low and close are all the same price.
    pub fn flat(date: NaiveDate, price: f64, volume: f64) -> Self {
        Self {
            date,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
        }
    }
}

/// Date-ordered price history for a single symbol.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceSeries {
    /// Ticker symbol (uppercase)
    pub symbol: String,
    /// Bars in ascending date order, one per date
    pub bars: Vec<PriceBar>,
}

impl PriceSeries {
    /// Create a series, sorting bars by date and dropping duplicate dates.
    pub fn new(symbol: &str, mut bars: Vec<PriceBar>) -> Self {
        bars.sort_by_key(|b| b.date);
        bars.dedup_by_key(|b| b.date);
        Self {
            symbol: symbol.to_uppercase(),
            bars,
        }
    }

    /// Build a series from closing prices on consecutive calendar days.
    pub fn from_closes(symbol: &str, start: NaiveDate, closes: &[f64]) -> Self {
        let bars = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| PriceBar::flat(start + chrono::Days::new(i as u64), c, 1_000.0))
            .collect();
        Self::new(symbol, bars)
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.bars.iter().map(|b| b.date).collect()
    }

    pub fn opens(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.open).collect()
    }

    pub fn highs(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.high).collect()
    }

    pub fn lows(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.low).collect()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.close).collect()
    }

    pub fn volumes(&self) -> Vec<f64> {
        self.bars.iter().map(|b| b.volume).collect()
    }

    /// Simple returns of the closing price, one shorter than the series.
    pub fn returns(&self) -> Vec<f64> {
        pct_change(&self.closes())
    }

    /// Bars with `start <= date <= end`.
    pub fn between(&self, start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            symbol: self.symbol.clone(),
            bars: self
                .bars
                .iter()
                .filter(|b| b.date >= start && b.date <= end)
                .copied()
                .collect(),
        }
    }

    /// Bars within `days` calendar days of the last bar.
    pub fn trailing_days(&self, days: u64) -> Self {
        match self.bars.last() {
            Some(last) => {
                let start = last.date - chrono::Days::new(days);
                self.between(start, last.date)
            }
            None => self.clone(),
        }
    }

    /// Load a `{"SYMBOL": [bars...]}` JSON price file.
    pub fn load_map(path: &Path) -> Result<BTreeMap<String, PriceSeries>> {
        let content = fs::read_to_string(path)?;
        let raw: BTreeMap<String, Vec<PriceBar>> = serde_json::from_str(&content)?;

        let mut series = BTreeMap::new();
        for (symbol, bars) in raw {
            if bars.is_empty() {
                return Err(Error::InsufficientData(format!(
                    "price file has no bars for {}",
                    symbol
                )));
            }
            let s = PriceSeries::new(&symbol, bars);
            series.insert(s.symbol.clone(), s);
        }
        Ok(series)
    }
}

/// Percentage change between consecutive values.
///
/// A non-positive predecessor yields a 0.0 return rather than an infinite one.
pub fn pct_change(values: &[f64]) -> Vec<f64> {
    values
        .windows(2)
        .map(|w| if w[0] > 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect()
}

/// Latest market quote for a symbol.
///
/// Fields some providers do not publish are `Option`s; use the `*_or_*`
/// accessors instead of defaulting at call sites.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Quote {
    pub symbol: String,
    /// Last traded price
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: f64,
    pub high: f64,
    pub low: f64,
    pub open: f64,
    pub previous_close: f64,
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub market_cap: Option<f64>,
    pub pe_ratio: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Build a quote from the most recent bars of a series.
    pub fn from_bars(symbol: &str, bars: &[PriceBar]) -> Result<Self> {
        let latest = bars
            .last()
            .ok_or_else(|| Error::NotFound(format!("no price data for {}", symbol)))?;
        let previous_close = if bars.len() > 1 {
            bars[bars.len() - 2].close
        } else {
            latest.close
        };

        let change = latest.close - previous_close;
        let change_percent = if previous_close != 0.0 {
            change / previous_close * 100.0
        } else {
            0.0
        };

        Ok(Self {
            symbol: symbol.to_uppercase(),
            price: latest.close,
            change,
            change_percent,
            volume: latest.volume,
            high: latest.high,
            low: latest.low,
            open: latest.open,
            previous_close,
            bid: None,
            ask: None,
            market_cap: None,
            pe_ratio: None,
            dividend_yield: None,
            timestamp: Utc::now(),
        })
    }

    /// Best bid, falling back to the last price.
    pub fn bid_or_last(&self) -> f64 {
        self.bid.unwrap_or(self.price)
    }

    /// Best ask, falling back to the last price.
    pub fn ask_or_last(&self) -> f64 {
        self.ask.unwrap_or(self.price)
    }

    pub fn spread(&self) -> f64 {
        self.ask_or_last() - self.bid_or_last()
    }

    /// Dividend yield, treating an unpublished yield as no dividend.
    pub fn dividend_yield_or_zero(&self) -> f64 {
        self.dividend_yield.unwrap_or(0.0)
    }
}

/// Trade direction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// A simulated fill.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trade {
    pub symbol: String,
    pub side: TradeSide,
    pub shares: f64,
    /// Fill price per share
    pub price: f64,
    /// Total value of the trade
    pub value: f64,
    /// Realized P&L (for closing trades)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pnl: Option<f64>,
    /// Bar on which the fill happened
    pub date: NaiveDate,
}

impl Trade {
    pub fn new(symbol: &str, side: TradeSide, shares: f64, price: f64, date: NaiveDate) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            side,
            shares,
            price,
            value: shares * price,
            pnl: None,
            date,
        }
    }

    /// Create a closing trade with P&L.
    pub fn with_pnl(mut self, pnl: f64) -> Self {
        self.pnl = Some(pnl);
        self
    }
}

/// API response wrapper used by the CLI and the HTTP service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response.
    pub fn ok(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response.
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(error.into()),
        }
    }
}
