//! Technical indicators for trading analysis.
//!
//! Every indicator returns a vector the same length as its input. Positions
//! inside the warm-up window are `NaN`.
//!
//! - **Moving averages**: SMA, EMA, WMA
//! - **Oscillators**: RSI, MACD, momentum
//! - **Bands and ranges**: Bollinger Bands, ATR, ADX, rolling statistics
//! - **Volume**: OBV, volume average and ratio

mod rsi;
mod sma;
mod volatility;
mod volume;

pub use rsi::{rsi, rsi_signals};
pub use sma::{ema, sma, wma};
pub use volatility::{adx, atr, rolling_max, rolling_min, rolling_std, true_range};
pub use volume::{obv, volume_ratio, volume_sma};

/// Bollinger Bands result.
#[derive(Debug, Clone)]
pub struct BollingerBands {
    /// Middle band (SMA)
    pub middle: Vec<f64>,
    /// Upper band (middle + num_std * std)
    pub upper: Vec<f64>,
    /// Lower band (middle - num_std * std)
    pub lower: Vec<f64>,
}

/// Calculate Bollinger Bands over windows ending at each bar.
///
/// # Arguments
///
/// * `data` - Price series
/// * `period` - Lookback period (typically 20)
/// * `num_std` - Number of population standard deviations (typically 2.0)
pub fn bollinger_bands(data: &[f64], period: usize, num_std: f64) -> BollingerBands {
    let middle = sma(data, period);
    let std = rolling_std(data, period, 0);

    let upper = middle.iter().zip(&std).map(|(m, s)| m + num_std * s).collect();
    let lower = middle.iter().zip(&std).map(|(m, s)| m - num_std * s).collect();

    BollingerBands {
        middle,
        upper,
        lower,
    }
}

/// Calculate momentum (rate of change over n periods).
///
/// `NaN` for the first `period` values and where the base price is zero.
pub fn momentum(data: &[f64], period: usize) -> Vec<f64> {
    let n = data.len();
    let mut result = vec![f64::NAN; n];

    for i in period..n {
        if data[i - period] != 0.0 {
            result[i] = (data[i] - data[i - period]) / data[i - period];
        }
    }

    result
}

/// MACD (Moving Average Convergence Divergence) result.
#[derive(Debug, Clone)]
pub struct Macd {
    /// MACD line (fast EMA - slow EMA)
    pub macd_line: Vec<f64>,
    /// Signal line (EMA of MACD line)
    pub signal_line: Vec<f64>,
    /// Histogram (MACD - Signal)
    pub histogram: Vec<f64>,
}

/// Calculate MACD indicator.
///
/// # Arguments
///
/// * `data` - Price series
/// * `fast_period` - Fast EMA period (typically 12)
/// * `slow_period` - Slow EMA period (typically 26)
/// * `signal_period` - Signal line EMA period (typically 9)
pub fn macd(data: &[f64], fast_period: usize, slow_period: usize, signal_period: usize) -> Macd {
    let fast_ema = ema(data, fast_period);
    let slow_ema = ema(data, slow_period);

    let macd_line: Vec<f64> = fast_ema.iter().zip(&slow_ema).map(|(f, s)| f - s).collect();
    let signal_line = ema(&macd_line, signal_period);
    let histogram = macd_line.iter().zip(&signal_line).map(|(m, s)| m - s).collect();

    Macd {
        macd_line,
        signal_line,
        histogram,
    }
}

/// Generate trading signals based on indicator crossovers.
///
/// Returns 1.0 when `fast` crosses above `slow`, -1.0 when it crosses
/// below, 0.0 otherwise. Comparisons against `NaN` never signal.
pub fn crossover_signals(fast: &[f64], slow: &[f64]) -> Vec<f64> {
    let n = fast.len().min(slow.len());
    let mut signals = vec![0.0; n];

    for i in 1..n {
        let prev_diff = fast[i - 1] - slow[i - 1];
        let curr_diff = fast[i] - slow[i];

        if prev_diff <= 0.0 && curr_diff > 0.0 {
            signals[i] = 1.0;
        } else if prev_diff >= 0.0 && curr_diff < 0.0 {
            signals[i] = -1.0;
        }
    }

    signals
}
