//! Per-bar indicator tables built from a price series.

use crate::indicators::{
    adx, atr, bollinger_bands, ema, macd, obv, rolling_max, rolling_min, rolling_std, rsi, sma,
    volume_ratio, volume_sma,
};
use crate::types::{PriceBar, PriceSeries};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const RSI_PERIOD: usize = 14;
pub const ATR_PERIOD: usize = 14;
pub const ADX_PERIOD: usize = 14;
pub const BAND_PERIOD: usize = 20;
pub const BAND_STD: f64 = 2.0;
pub const VOLUME_PERIOD: usize = 20;

/// Indicator values for one bar. Warm-up fields are `NaN`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureRow {
    pub date: NaiveDate,
    pub close: f64,
    pub volume: f64,
    pub rsi: f64,
    pub macd: f64,
    pub macd_signal: f64,
    pub macd_hist: f64,
    pub bb_upper: f64,
    pub bb_middle: f64,
    pub bb_lower: f64,
    pub sma_20: f64,
    pub sma_50: f64,
    pub ema_12: f64,
    pub ema_26: f64,
    pub atr: f64,
    pub adx: f64,
    pub returns: f64,
    pub log_returns: f64,
    pub volatility: f64,
    pub price_position: f64,
    pub volume_sma: f64,
    pub volume_ratio: f64,
    pub obv: f64,
}

impl FeatureRow {
    fn values(&self) -> [f64; 22] {
        [
            self.close,
            self.volume,
            self.rsi,
            self.macd,
            self.macd_signal,
            self.macd_hist,
            self.bb_upper,
            self.bb_middle,
            self.bb_lower,
            self.sma_20,
            self.sma_50,
            self.ema_12,
            self.ema_26,
            self.atr,
            self.adx,
            self.returns,
            self.log_returns,
            self.volatility,
            self.price_position,
            self.volume_sma,
            self.volume_ratio,
            self.obv,
        ]
    }

    /// True once every indicator has left its warm-up window.
    pub fn is_complete(&self) -> bool {
        self.values().iter().all(|v| v.is_finite())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureTable {
    pub symbol: String,
    pub rows: Vec<FeatureRow>,
}

impl FeatureTable {
    /// Compute every indicator for each bar of `series`.
    pub fn build(series: &PriceSeries) -> Self {
        let close = series.closes();
        let high = series.highs();
        let low = series.lows();
        let volume = series.volumes();
        let n = close.len();

        let rsi_values = rsi(&close, RSI_PERIOD);
        let macd_values = macd(&close, 12, 26, 9);
        let bands = bollinger_bands(&close, BAND_PERIOD, BAND_STD);
        let sma_20 = sma(&close, 20);
        let sma_50 = sma(&close, 50);
        let ema_12 = ema(&close, 12);
        let ema_26 = ema(&close, 26);
        let atr_values = atr(&high, &low, &close, ATR_PERIOD);
        let adx_values = adx(&high, &low, &close, ADX_PERIOD);

        let mut returns = vec![f64::NAN; n];
        let mut log_returns = vec![f64::NAN; n];
        for i in 1..n {
            if close[i - 1] != 0.0 {
                returns[i] = close[i] / close[i - 1] - 1.0;
                log_returns[i] = (close[i] / close[i - 1]).ln();
            }
        }
        let volatility = rolling_std(&returns, 20, 1);

        let lowest = rolling_min(&low, 20);
        let highest = rolling_max(&high, 20);
        let volume_avg = volume_sma(&volume, VOLUME_PERIOD);
        let volume_rel = volume_ratio(&volume, VOLUME_PERIOD);
        let obv_values = obv(&close, &volume);

        let rows = series
            .bars
            .iter()
            .enumerate()
            .map(|(i, bar)| {
                let range = highest[i] - lowest[i];
                let price_position = if range > 0.0 {
                    (close[i] - lowest[i]) / range
                } else {
                    f64::NAN
                };
                FeatureRow {
                    date: bar.date,
                    close: close[i],
                    volume: volume[i],
                    rsi: rsi_values[i],
                    macd: macd_values.macd_line[i],
                    macd_signal: macd_values.signal_line[i],
                    macd_hist: macd_values.histogram[i],
                    bb_upper: bands.upper[i],
                    bb_middle: bands.middle[i],
                    bb_lower: bands.lower[i],
                    sma_20: sma_20[i],
                    sma_50: sma_50[i],
                    ema_12: ema_12[i],
                    ema_26: ema_26[i],
                    atr: atr_values[i],
                    adx: adx_values[i],
                    returns: returns[i],
                    log_returns: log_returns[i],
                    volatility: volatility[i],
                    price_position,
                    volume_sma: volume_avg[i],
                    volume_ratio: volume_rel[i],
                    obv: obv_values[i],
                }
            })
            .collect();

        Self {
            symbol: series.symbol.clone(),
            rows,
        }
    }

    /// Keep only rows where every field is finite.
    pub fn drop_warmup(mut self) -> Self {
        self.rows.retain(FeatureRow::is_complete);
        self
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn latest(&self) -> Option<&FeatureRow> {
        self.rows.last()
    }
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

/// A price bar with its chart indicators; `None` marks warm-up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndicatorSnapshot {
    #[serde(flatten)]
    pub bar: PriceBar,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub sma_200: Option<f64>,
    pub ema_12: Option<f64>,
    pub ema_26: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub rsi: Option<f64>,
    pub bb_upper: Option<f64>,
    pub bb_middle: Option<f64>,
    pub bb_lower: Option<f64>,
    pub volume_sma: Option<f64>,
    pub volume_ratio: Option<f64>,
}

impl IndicatorSnapshot {
    pub fn from_series(series: &PriceSeries) -> Vec<Self> {
        let close = series.closes();
        let volume = series.volumes();

        let sma_20 = sma(&close, 20);
        let sma_50 = sma(&close, 50);
        let sma_200 = sma(&close, 200);
        let ema_12 = ema(&close, 12);
        let ema_26 = ema(&close, 26);
        let macd_values = macd(&close, 12, 26, 9);
        let rsi_values = rsi(&close, RSI_PERIOD);
        let bands = bollinger_bands(&close, BAND_PERIOD, BAND_STD);
        let volume_avg = volume_sma(&volume, VOLUME_PERIOD);
        let volume_rel = volume_ratio(&volume, VOLUME_PERIOD);

        series
            .bars
            .iter()
            .enumerate()
            .map(|(i, bar)| Self {
                bar: *bar,
                sma_20: finite(sma_20[i]),
                sma_50: finite(sma_50[i]),
                sma_200: finite(sma_200[i]),
                ema_12: finite(ema_12[i]),
                ema_26: finite(ema_26[i]),
                macd: finite(macd_values.macd_line[i]),
                macd_signal: finite(macd_values.signal_line[i]),
                macd_histogram: finite(macd_values.histogram[i]),
                rsi: finite(rsi_values[i]),
                bb_upper: finite(bands.upper[i]),
                bb_middle: finite(bands.middle[i]),
                bb_lower: finite(bands.lower[i]),
                volume_sma: finite(volume_avg[i]),
                volume_ratio: finite(volume_rel[i]),
            })
            .collect()
    }
}
