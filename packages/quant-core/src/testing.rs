//! Deterministic price fixtures for unit tests.

use crate::types::{PriceBar, PriceSeries};
use chrono::{Days, NaiveDate};

/// Daily OHLCV series oscillating around a linear trend of `drift` per bar.
pub(crate) fn wavy_series(symbol: &str, n: usize, drift: f64) -> PriceSeries {
    let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
    let bars = (0..n)
        .map(|i| {
            let t = i as f64;
            let close = 100.0 + drift * t + 4.0 * (t * 0.3).sin();
            PriceBar {
                date: start + Days::new(i as u64),
                open: close - 0.3 * (t * 1.1).cos(),
                high: close + 1.0 + 0.2 * (t * 0.7).cos(),
                low: close - 1.0,
                close,
                volume: 1_000_000.0 + 50_000.0 * (t * 0.5).sin(),
            }
        })
        .collect();
    PriceSeries::new(symbol, bars)
}
