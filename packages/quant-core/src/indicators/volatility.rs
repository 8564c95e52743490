//! Range and dispersion indicators: ATR, ADX and rolling window statistics.

use crate::stats;

/// Apply `f` to every full window; windows containing a non-finite value are `NaN`.
fn rolling<F>(values: &[f64], window: usize, f: F) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let mut result = vec![f64::NAN; values.len()];
    if window == 0 || window > values.len() {
        return result;
    }
    for (i, w) in values.windows(window).enumerate() {
        if w.iter().all(|x| x.is_finite()) {
            result[i + window - 1] = f(w);
        }
    }
    result
}

/// Rolling standard deviation with the given delta degrees of freedom.
pub fn rolling_std(values: &[f64], window: usize, ddof: usize) -> Vec<f64> {
    if window <= ddof {
        return vec![f64::NAN; values.len()];
    }
    rolling(values, window, |w| stats::std_dev(w, ddof))
}

pub fn rolling_min(values: &[f64], window: usize) -> Vec<f64> {
    rolling(values, window, |w| w.iter().copied().fold(f64::INFINITY, f64::min))
}

pub fn rolling_max(values: &[f64], window: usize) -> Vec<f64> {
    rolling(values, window, |w| w.iter().copied().fold(f64::NEG_INFINITY, f64::max))
}

/// True range for bars after the first; index 0 is `NaN`.
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let n = high.len().min(low.len()).min(close.len());
    let mut tr = vec![f64::NAN; n];
    for i in 1..n {
        let prev_close = close[i - 1];
        tr[i] = (high[i] - low[i])
            .max((high[i] - prev_close).abs())
            .max((low[i] - prev_close).abs());
    }
    tr
}

/// Average True Range with Wilder smoothing.
///
/// The first value, at index `period`, is the mean true range of bars
/// `1..=period`; positions before it are `NaN`.
pub fn atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let tr = true_range(high, low, close);
    let n = tr.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n <= period {
        return result;
    }

    let p = period as f64;
    let mut value = tr[1..=period].iter().sum::<f64>() / p;
    result[period] = value;
    for i in (period + 1)..n {
        value = (value * (p - 1.0) + tr[i]) / p;
        result[i] = value;
    }
    result
}

/// Directional movement index from smoothed +DM, -DM and TR.
fn directional_index(plus_dm: f64, minus_dm: f64, tr: f64) -> f64 {
    if tr <= 0.0 {
        return 0.0;
    }
    let plus_di = 100.0 * plus_dm / tr;
    let minus_di = 100.0 * minus_dm / tr;
    let total = plus_di + minus_di;
    if total <= 0.0 {
        0.0
    } else {
        100.0 * (plus_di - minus_di).abs() / total
    }
}

/// Average Directional Index with Wilder smoothing.
///
/// DX is defined from index `period`; ADX starts at `2 * period - 1` as the
/// mean of the first `period` DX values.
pub fn adx(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<f64> {
    let tr = true_range(high, low, close);
    let n = tr.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < 2 * period {
        return result;
    }

    let mut plus_dm = vec![0.0; n];
    let mut minus_dm = vec![0.0; n];
    for i in 1..n {
        let up = high[i] - high[i - 1];
        let down = low[i - 1] - low[i];
        if up > down && up > 0.0 {
            plus_dm[i] = up;
        }
        if down > up && down > 0.0 {
            minus_dm[i] = down;
        }
    }

    let p = period as f64;
    let mut s_tr: f64 = tr[1..=period].iter().sum();
    let mut s_plus: f64 = plus_dm[1..=period].iter().sum();
    let mut s_minus: f64 = minus_dm[1..=period].iter().sum();

    let mut dx = vec![f64::NAN; n];
    dx[period] = directional_index(s_plus, s_minus, s_tr);
    for i in (period + 1)..n {
        s_tr = s_tr - s_tr / p + tr[i];
        s_plus = s_plus - s_plus / p + plus_dm[i];
        s_minus = s_minus - s_minus / p + minus_dm[i];
        dx[i] = directional_index(s_plus, s_minus, s_tr);
    }

    let first = 2 * period - 1;
    let mut value = dx[period..=first].iter().sum::<f64>() / p;
    result[first] = value;
    for i in (first + 1)..n {
        value = (value * (p - 1.0) + dx[i]) / p;
        result[i] = value;
    }
    result
}
