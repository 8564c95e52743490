//! Descriptive statistics shared by the portfolio, risk and backtest modules.
//!
//! Percentiles interpolate linearly between order statistics. Skewness and
//! kurtosis are the biased estimators, with kurtosis reported as excess.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Trading days per year used for annualization.
pub const TRADING_DAYS: f64 = 252.0;

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Variance with `ddof` delta degrees of freedom.
///
/// Returns 0.0 when there are not more than `ddof` observations.
pub fn variance(values: &[f64], ddof: usize) -> f64 {
    let n = values.len();
    if n <= ddof {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (n - ddof) as f64
}

pub fn std_dev(values: &[f64], ddof: usize) -> f64 {
    variance(values, ddof).sqrt()
}

/// Covariance of two equally long series.
pub fn covariance(x: &[f64], y: &[f64], ddof: usize) -> f64 {
    let n = x.len().min(y.len());
    if n <= ddof {
        return 0.0;
    }
    let mx = mean(&x[..n]);
    let my = mean(&y[..n]);
    x[..n]
        .iter()
        .zip(&y[..n])
        .map(|(a, b)| (a - mx) * (b - my))
        .sum::<f64>()
        / (n - ddof) as f64
}

/// Percentile `q` (0..=100) with linear interpolation between closest ranks.
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let pos = (q.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

fn central_moment(values: &[f64], k: i32) -> f64 {
    let m = mean(values);
    values.iter().map(|x| (x - m).powi(k)).sum::<f64>() / values.len() as f64
}

/// Biased sample skewness. Zero for constant or empty input.
pub fn skewness(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m2 = central_moment(values, 2);
    if m2 <= 0.0 {
        return 0.0;
    }
    central_moment(values, 3) / m2.powf(1.5)
}

/// Biased excess kurtosis. Zero for constant or empty input.
pub fn kurtosis(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let m2 = central_moment(values, 2);
    if m2 <= 0.0 {
        return 0.0;
    }
    central_moment(values, 4) / (m2 * m2) - 3.0
}

/// Maximum peak-to-trough decline of the compounded return path.
///
/// Returns a positive fraction (0.15 for a 15% drawdown).
pub fn max_drawdown(returns: &[f64]) -> f64 {
    let mut cum = 1.0;
    let mut running_max = f64::NEG_INFINITY;
    let mut max_drawdown = 0.0;

    for r in returns {
        cum *= 1.0 + r;
        if cum > running_max {
            running_max = cum;
        }
        let drawdown = (running_max - cum) / running_max;
        if drawdown > max_drawdown {
            max_drawdown = drawdown;
        }
    }

    max_drawdown
}

/// Maximum drawdown of an equity curve (levels, not returns).
pub fn max_drawdown_of_levels(levels: &[f64]) -> f64 {
    let mut running_max = f64::NEG_INFINITY;
    let mut max_drawdown = 0.0;
    for &v in levels {
        if v > running_max {
            running_max = v;
        }
        if running_max > 0.0 {
            let drawdown = (running_max - v) / running_max;
            if drawdown > max_drawdown {
                max_drawdown = drawdown;
            }
        }
    }
    max_drawdown
}

/// Minimum of the rolling `window`-sum, or `None` when the series is shorter.
pub fn rolling_sum_min(values: &[f64], window: usize) -> Option<f64> {
    if window == 0 || values.len() < window {
        return None;
    }
    values
        .windows(window)
        .map(|w| w.iter().sum::<f64>())
        .min_by(|a, b| a.total_cmp(b))
}

/// Mean of the observations at or below the `q` percentile.
pub fn tail_mean(values: &[f64], q: f64) -> Option<f64> {
    let threshold = percentile(values, q);
    let tail: Vec<f64> = values.iter().copied().filter(|&r| r <= threshold).collect();
    if tail.is_empty() {
        None
    } else {
        Some(mean(&tail))
    }
}

/// Inverse cumulative distribution function for standard normal distribution.
///
/// Acklam's rational approximation, relative error below 1.15e-9.
pub fn norm_ppf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];
    const P_LOW: f64 = 0.02425;
    const P_HIGH: f64 = 1.0 - P_LOW;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= P_HIGH {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    }
}

/// Pearson product-moment correlation. Zero when either side is constant.
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let sx = std_dev(x, 0);
    let sy = std_dev(y, 0);
    if sx == 0.0 || sy == 0.0 {
        return 0.0;
    }
    covariance(x, y, 0) / (sx * sy)
}

/// Ranks starting at 1, ties receive the average of their positions.
fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut idx: Vec<usize> = (0..values.len()).collect();
    idx.sort_by(|&a, &b| values[a].total_cmp(&values[b]));

    let mut ranks = vec![0.0; values.len()];
    let mut i = 0;
    while i < idx.len() {
        let mut j = i;
        while j + 1 < idx.len() && values[idx[j + 1]] == values[idx[i]] {
            j += 1;
        }
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for k in i..=j {
            ranks[idx[k]] = rank;
        }
        i = j + 1;
    }
    ranks
}

/// Spearman rank correlation.
pub fn spearman(x: &[f64], y: &[f64]) -> f64 {
    pearson(&average_ranks(x), &average_ranks(y))
}

fn sign(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Kendall tau-b, which corrects for ties in either series.
pub fn kendall(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    let (mut concordant, mut discordant): (f64, f64) = (0.0, 0.0);
    let (mut ties_x, mut ties_y): (f64, f64) = (0.0, 0.0);

    for i in 0..n {
        for j in (i + 1)..n {
            let dx = sign(x[i] - x[j]);
            let dy = sign(y[i] - y[j]);
            if dx == 0.0 && dy == 0.0 {
                continue;
            }
            if dx == 0.0 {
                ties_x += 1.0;
            } else if dy == 0.0 {
                ties_y += 1.0;
            } else if dx * dy > 0.0 {
                concordant += 1.0;
            } else {
                discordant += 1.0;
            }
        }
    }

    let denom = ((concordant + discordant + ties_x) * (concordant + discordant + ties_y)).sqrt();
    if denom == 0.0 {
        0.0
    } else {
        (concordant - discordant) / denom
    }
}

/// Correlation coefficient flavour.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMethod {
    #[default]
    Pearson,
    Spearman,
    Kendall,
}

impl CorrelationMethod {
    pub fn correlate(self, x: &[f64], y: &[f64]) -> f64 {
        match self {
            Self::Pearson => pearson(x, y),
            Self::Spearman => spearman(x, y),
            Self::Kendall => kendall(x, y),
        }
    }

    /// Full symmetric matrix for a set of equally long columns.
    pub fn matrix(self, columns: &[Vec<f64>]) -> Vec<Vec<f64>> {
        let n = columns.len();
        let mut out = vec![vec![0.0; n]; n];
        for i in 0..n {
            out[i][i] = 1.0;
            for j in (i + 1)..n {
                let c = self.correlate(&columns[i], &columns[j]);
                out[i][j] = c;
                out[j][i] = c;
            }
        }
        out
    }
}

impl FromStr for CorrelationMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pearson" => Ok(Self::Pearson),
            "spearman" => Ok(Self::Spearman),
            "kendall" => Ok(Self::Kendall),
            other => Err(Error::UnknownMethod(format!(
                "correlation method '{}' (expected pearson, spearman or kendall)",
                other
            ))),
        }
    }
}

impl fmt::Display for CorrelationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pearson => "pearson",
            Self::Spearman => "spearman",
            Self::Kendall => "kendall",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_norm_ppf() {
        assert!(norm_ppf(0.5).abs() < 1e-9);
        assert_relative_eq!(norm_ppf(0.95), 1.6448536269514722, epsilon = 1e-8);
        assert_relative_eq!(norm_ppf(0.975), 1.959963984540054, epsilon = 1e-8);
        assert_relative_eq!(norm_ppf(0.01), -2.3263478740408408, epsilon = 1e-8);
        // Symmetry
        assert_relative_eq!(norm_ppf(0.05), -norm_ppf(0.95), epsilon = 1e-12);
        assert_eq!(norm_ppf(0.0), f64::NEG_INFINITY);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = vec![5.0, 1.0, 4.0, 2.0, 3.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert_eq!(percentile(&values, 100.0), 5.0);
        // pos = 0.1 * 4 = 0.4 between 1 and 2
        assert_relative_eq!(percentile(&values, 10.0), 1.4, epsilon = 1e-12);
    }

    #[test]
    fn test_variance_ddof() {
        let values = vec![1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(variance(&values, 0), 1.25, epsilon = 1e-12);
        assert_relative_eq!(variance(&values, 1), 5.0 / 3.0, epsilon = 1e-12);
        assert_eq!(variance(&[1.0], 1), 0.0);
    }

    #[test]
    fn test_skew_and_kurtosis() {
        // Symmetric sample has zero skew
        let symmetric = vec![-2.0, -1.0, 0.0, 1.0, 2.0];
        assert!(skewness(&symmetric).abs() < 1e-12);
        // m2 = 2, m4 = 6.8 → 6.8 / 4 - 3
        assert_relative_eq!(kurtosis(&symmetric), -1.3, epsilon = 1e-12);

        let right_tail = vec![0.0, 0.0, 0.0, 10.0];
        assert!(skewness(&right_tail) > 0.0);
        assert_eq!(skewness(&[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_max_drawdown() {
        let returns = vec![0.10, 0.05, -0.15, -0.10, 0.05];
        // peak 1.155, trough 1.155 * 0.85 * 0.9
        assert_relative_eq!(max_drawdown(&returns), 1.0 - 0.85 * 0.9, epsilon = 1e-12);
        assert_eq!(max_drawdown(&[0.01, 0.02]), 0.0);
    }

    #[test]
    fn test_drawdown_from_first_observation() {
        // Peaks are tracked from the first compounded value
        assert_relative_eq!(max_drawdown(&[-0.2]), 0.0, epsilon = 1e-12);
        assert_relative_eq!(max_drawdown_of_levels(&[100.0, 80.0, 90.0]), 0.2, epsilon = 1e-12);
    }

    #[test]
    fn test_rolling_sum_min() {
        let values = vec![0.01, -0.02, -0.03, 0.04];
        assert_relative_eq!(rolling_sum_min(&values, 2).unwrap(), -0.05, epsilon = 1e-12);
        assert!(rolling_sum_min(&values, 5).is_none());
    }

    #[test]
    fn test_correlations() {
        let x = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let y = vec![2.0, 4.0, 6.0, 8.0, 10.0];
        let z = vec![1.0, 8.0, 27.0, 64.0, 125.0];

        assert_relative_eq!(pearson(&x, &y), 1.0, epsilon = 1e-12);
        assert!(pearson(&x, &z) < 1.0);
        assert_relative_eq!(spearman(&x, &z), 1.0, epsilon = 1e-12);
        assert_relative_eq!(kendall(&x, &z), 1.0, epsilon = 1e-12);

        let reversed: Vec<f64> = x.iter().rev().copied().collect();
        assert_relative_eq!(kendall(&x, &reversed), -1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_spearman_with_ties() {
        let x = vec![1.0, 2.0, 2.0, 3.0];
        assert_eq!(average_ranks(&x), vec![1.0, 2.5, 2.5, 4.0]);
    }

    #[test]
    fn test_correlation_method_parse() {
        assert_eq!("Spearman".parse::<CorrelationMethod>().unwrap(), CorrelationMethod::Spearman);
        assert!(matches!(
            "distance".parse::<CorrelationMethod>(),
            Err(Error::UnknownMethod(_))
        ));
    }
}
