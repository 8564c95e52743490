//! Volume indicators.

use super::sma;

/// On-Balance Volume, starting from the first bar's volume.
pub fn obv(close: &[f64], volume: &[f64]) -> Vec<f64> {
    let n = close.len().min(volume.len());
    let mut result = Vec::with_capacity(n);
    let mut total = 0.0;
    for i in 0..n {
        if i == 0 {
            total = volume[0];
        } else if close[i] > close[i - 1] {
            total += volume[i];
        } else if close[i] < close[i - 1] {
            total -= volume[i];
        }
        result.push(total);
    }
    result
}

pub fn volume_sma(volume: &[f64], period: usize) -> Vec<f64> {
    sma(volume, period)
}

/// Volume relative to its `period` average; `NaN` during warm-up or on a zero average.
pub fn volume_ratio(volume: &[f64], period: usize) -> Vec<f64> {
    volume
        .iter()
        .zip(volume_sma(volume, period))
        .map(|(v, avg)| if avg > 0.0 { v / avg } else { f64::NAN })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obv() {
        let close = vec![10.0, 11.0, 11.0, 9.0, 12.0];
        let volume = vec![100.0, 200.0, 300.0, 400.0, 500.0];
        assert_eq!(obv(&close, &volume), vec![100.0, 300.0, 300.0, -100.0, 400.0]);
    }

    #[test]
    fn test_volume_ratio() {
        let volume = vec![100.0, 300.0, 200.0, 0.0, 0.0];
        let ratio = volume_ratio(&volume, 2);
        assert!(ratio[0].is_nan());
        assert_eq!(ratio[1], 1.5);
        assert_eq!(ratio[2], 0.8);
        assert!(ratio[4].is_nan());
    }
}
