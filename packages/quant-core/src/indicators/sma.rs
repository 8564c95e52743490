//! Simple, exponential and weighted moving averages.
//!
//! Positions without a full lookback window are `NaN`.

/// Calculate Simple Moving Average.
///
/// # Arguments
///
/// * `data` - Price series
/// * `period` - Lookback period
///
/// # Returns
///
/// Vector of SMA values. The first `period - 1` values are `NaN`, as is any
/// window containing a `NaN`.
///
/// # Example
///
/// ```rust
/// use quant_core::indicators::sma;
///
/// let prices = vec![10.0, 11.0, 12.0, 11.0, 10.0];
/// let sma_values = sma(&prices, 3);
///
/// assert!(sma_values[1].is_nan());
/// // SMA at index 2 = (10 + 11 + 12) / 3 = 11.0
/// assert!((sma_values[2] - 11.0).abs() < 1e-12);
/// ```
pub fn sma(data: &[f64], period: usize) -> Vec<f64> {
    let n = data.len();
    let mut result = vec![f64::NAN; n];

    if period == 0 || period > n {
        return result;
    }

    for (i, window) in data.windows(period).enumerate() {
        result[i + period - 1] = window.iter().sum::<f64>() / period as f64;
    }

    result
}

/// Calculate Exponential Moving Average.
///
/// Uses `EMA[i] = alpha * x[i] + (1 - alpha) * EMA[i-1]` with
/// `alpha = 2 / (period + 1)`, seeded with the first finite value.
/// Leading `NaN`s in the input stay `NaN`.
///
/// # Example
///
/// ```rust
/// use quant_core::indicators::ema;
///
/// let prices = vec![10.0, 11.0, 12.0];
/// let ema_values = ema(&prices, 3);
///
/// assert_eq!(ema_values[0], 10.0);
/// assert!((ema_values[1] - 10.5).abs() < 1e-12);
/// ```
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    let n = data.len();
    let mut result = vec![f64::NAN; n];

    if period == 0 {
        return result;
    }
    let Some(start) = data.iter().position(|x| x.is_finite()) else {
        return result;
    };

    let alpha = 2.0 / (period as f64 + 1.0);
    result[start] = data[start];
    for i in (start + 1)..n {
        result[i] = alpha * data[i] + (1.0 - alpha) * result[i - 1];
    }

    result
}

/// Calculate Weighted Moving Average.
///
/// The most recent value in the window has weight `period`, the oldest has
/// weight 1.
pub fn wma(data: &[f64], period: usize) -> Vec<f64> {
    let n = data.len();
    let mut result = vec![f64::NAN; n];

    if period == 0 || period > n {
        return result;
    }

    // 1 + 2 + ... + period
    let weight_sum = (period * (period + 1)) as f64 / 2.0;

    for (i, window) in data.windows(period).enumerate() {
        let weighted: f64 = window
            .iter()
            .enumerate()
            .map(|(j, x)| x * (j + 1) as f64)
            .sum();
        result[i + period - 1] = weighted / weight_sum;
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_sma_basic() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = sma(&data, 3);

        assert!(result[0].is_nan() && result[1].is_nan());
        assert_relative_eq!(result[2], 2.0);
        assert_relative_eq!(result[3], 3.0);
        assert_relative_eq!(result[4], 4.0);
    }

    #[test]
    fn test_sma_period_1() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(sma(&data, 1), data);
    }

    #[test]
    fn test_sma_period_larger_than_data() {
        let result = sma(&[1.0, 2.0, 3.0], 10);
        assert_eq!(result.len(), 3);
        assert!(result.iter().all(|x| x.is_nan()));
    }

    #[test]
    fn test_sma_nan_window() {
        let result = sma(&[f64::NAN, 2.0, 4.0, 6.0], 2);
        assert!(result[1].is_nan());
        assert_relative_eq!(result[2], 3.0);
        assert_relative_eq!(result[3], 5.0);
    }

    #[test]
    fn test_ema_seed_and_recursion() {
        let data = vec![10.0, 11.0, 12.0, 11.0, 10.0];
        let result = ema(&data, 3);

        // alpha = 0.5
        assert_eq!(result[0], 10.0);
        assert_relative_eq!(result[1], 10.5);
        assert_relative_eq!(result[2], 11.25);
        assert_relative_eq!(result[3], 11.125);
        assert_relative_eq!(result[4], 10.5625);
    }

    #[test]
    fn test_ema_skips_leading_nan() {
        let result = ema(&[f64::NAN, f64::NAN, 4.0, 8.0], 3);
        assert!(result[0].is_nan() && result[1].is_nan());
        assert_eq!(result[2], 4.0);
        assert_relative_eq!(result[3], 6.0);
    }

    #[test]
    fn test_ema_responsiveness() {
        let data: Vec<f64> = (0..20).map(|i| if i < 10 { 100.0 } else { 150.0 }).collect();
        let sma_result = sma(&data, 5);
        let ema_result = ema(&data, 5);

        // Two bars after the jump the EMA has moved further than the SMA
        assert!(ema_result[11] > sma_result[11]);
    }

    #[test]
    fn test_wma() {
        let result = wma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);

        // (1*1 + 2*2 + 3*3) / 6
        assert_relative_eq!(result[2], 14.0 / 6.0);
        assert_relative_eq!(result[4], (3.0 + 8.0 + 15.0) / 6.0);
        assert!(result[1].is_nan());
    }

    #[test]
    fn test_empty_data() {
        let data: Vec<f64> = vec![];
        assert!(sma(&data, 3).is_empty());
        assert!(ema(&data, 3).is_empty());
        assert!(wma(&data, 3).is_empty());
    }
}
