//! Relative Strength Index (RSI) indicator.

/// Calculate RSI value from average gain and average loss.
/// No losses gives 100, no gains gives 0 and a flat window gives 50.
#[inline]
fn calculate_rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss <= 0.0 {
        if avg_gain <= 0.0 {
            50.0
        } else {
            100.0
        }
    } else if avg_gain <= 0.0 {
        0.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - (100.0 / (1.0 + rs))
    }
}

/// Calculate Relative Strength Index with Wilder smoothing.
///
/// 1. Split price changes into gains and losses
/// 2. Seed the averages with the simple mean of the first `period` changes
/// 3. Smooth with `avg = (prev * (period - 1) + current) / period`
/// 4. RSI = 100 - 100 / (1 + avg_gain / avg_loss)
///
/// # Arguments
///
/// * `prices` - Price series (typically closing prices)
/// * `period` - Lookback period (typically 14)
///
/// # Returns
///
/// Vector of RSI values on a 0-100 scale. The first `period` positions are
/// `NaN`.
///
/// # Example
///
/// ```rust
/// use quant_core::indicators::rsi;
///
/// let prices = vec![44.0, 44.25, 44.5, 43.75, 44.5, 44.25, 44.5, 44.0, 43.5, 44.0,
///                   44.25, 44.0, 43.5, 44.0, 44.5, 44.25, 44.0];
/// let rsi_values = rsi(&prices, 14);
///
/// assert!(rsi_values[13].is_nan());
/// for &value in &rsi_values[14..] {
///     assert!(value >= 0.0 && value <= 100.0);
/// }
/// ```
pub fn rsi(prices: &[f64], period: usize) -> Vec<f64> {
    let n = prices.len();
    let mut result = vec![f64::NAN; n];

    if period == 0 || n <= period {
        return result;
    }

    let mut gains = vec![0.0; n];
    let mut losses = vec![0.0; n];
    for i in 1..n {
        let change = prices[i] - prices[i - 1];
        if change > 0.0 {
            gains[i] = change;
        } else {
            losses[i] = -change;
        }
    }

    let mut avg_gain: f64 = gains[1..=period].iter().sum::<f64>() / period as f64;
    let mut avg_loss: f64 = losses[1..=period].iter().sum::<f64>() / period as f64;
    result[period] = calculate_rsi_value(avg_gain, avg_loss);

    let alpha = 1.0 / period as f64;
    for i in (period + 1)..n {
        avg_gain = alpha * gains[i] + (1.0 - alpha) * avg_gain;
        avg_loss = alpha * losses[i] + (1.0 - alpha) * avg_loss;
        result[i] = calculate_rsi_value(avg_gain, avg_loss);
    }

    result
}

/// Generate RSI-based trading signals.
///
/// Returns 1.0 below `oversold`, -1.0 above `overbought`, 0.0 otherwise
/// (including warm-up).
pub fn rsi_signals(rsi_values: &[f64], oversold: f64, overbought: f64) -> Vec<f64> {
    rsi_values
        .iter()
        .map(|&rsi| {
            if rsi < oversold {
                1.0
            } else if rsi > overbought {
                -1.0
            } else {
                0.0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_rsi_trends() {
        let up_prices: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        let rsi_up = rsi(&up_prices, 14);
        assert_eq!(rsi_up[19], 100.0);

        let down_prices: Vec<f64> = (0..20).map(|i| 100.0 - i as f64).collect();
        let rsi_down = rsi(&down_prices, 14);
        assert_eq!(rsi_down[19], 0.0);
    }

    #[test]
    fn test_rsi_wilder_values() {
        // changes: +1, -1, +2, then +1
        let prices = vec![10.0, 11.0, 10.0, 12.0, 13.0];
        let result = rsi(&prices, 3);

        assert!(result[2].is_nan());
        // avg_gain = 1, avg_loss = 1/3 → RS = 3
        assert_relative_eq!(result[3], 75.0, epsilon = 1e-12);
        // avg_gain = (2 + 1) / 3 = 1, avg_loss = (2/3) / 3 = 2/9 → RS = 4.5
        assert_relative_eq!(result[4], 100.0 - 100.0 / 5.5, epsilon = 1e-12);
    }

    #[test]
    fn test_rsi_range() {
        let prices: Vec<f64> = (0..50).map(|i| 100.0 + (i as f64 * 0.5).sin() * 10.0).collect();
        let rsi_values = rsi(&prices, 14);
        for &value in &rsi_values[14..] {
            assert!((0.0..=100.0).contains(&value));
        }
    }

    #[test]
    fn test_rsi_neutral() {
        let prices: Vec<f64> = (0..30).map(|i| if i % 2 == 0 { 101.0 } else { 99.0 }).collect();
        let rsi_values = rsi(&prices, 14);
        assert!(rsi_values[29] > 40.0 && rsi_values[29] < 60.0);
    }

    #[test]
    fn test_rsi_signals() {
        let rsi_values = vec![25.0, 45.0, 75.0, 30.0, 70.0, f64::NAN];
        let signals = rsi_signals(&rsi_values, 30.0, 70.0);
        assert_eq!(signals, vec![1.0, 0.0, -1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_rsi_short_data() {
        let rsi_values = rsi(&[100.0, 101.0, 102.0], 14);
        assert!(rsi_values.iter().all(|v| v.is_nan()));
    }
}
