//! Aligned return matrices and the estimators built on them.

use super::Weights;
use crate::stats::{CorrelationMethod, TRADING_DAYS};
use crate::types::{pct_change, PriceSeries};
use crate::{Error, Result};
use chrono::NaiveDate;
use nalgebra::{DMatrix, DVector};
use std::collections::{BTreeMap, BTreeSet};

/// Minimum number of aligned return rows for any estimator.
pub const MIN_OBSERVATIONS: usize = 30;

/// T×N simple returns with one named column per asset.
#[derive(Debug, Clone)]
pub struct ReturnMatrix {
    symbols: Vec<String>,
    data: DMatrix<f64>,
}

impl ReturnMatrix {
    /// Align closing prices on the dates every series shares, then take
    /// percentage changes column by column.
    pub fn from_series(series: &[PriceSeries]) -> Result<Self> {
        if series.is_empty() {
            return Err(Error::InsufficientData("no price series supplied".into()));
        }

        let mut seen = BTreeSet::new();
        for s in series {
            if !seen.insert(s.symbol.as_str()) {
                return Err(Error::InvalidInput(format!("duplicate symbol {}", s.symbol)));
            }
        }

        let closes_by_date: Vec<BTreeMap<NaiveDate, f64>> = series
            .iter()
            .map(|s| s.bars.iter().map(|b| (b.date, b.close)).collect())
            .collect();

        let common: Vec<NaiveDate> = closes_by_date[0]
            .keys()
            .filter(|d| closes_by_date[1..].iter().all(|m| m.contains_key(d)))
            .copied()
            .collect();

        let columns = closes_by_date
            .iter()
            .map(|m| {
                let aligned: Vec<f64> = common.iter().filter_map(|d| m.get(d).copied()).collect();
                pct_change(&aligned)
            })
            .collect();

        Self::from_columns(series.iter().map(|s| s.symbol.clone()).collect(), columns)
    }

    /// Build from already-aligned return columns.
    pub fn from_columns(symbols: Vec<String>, columns: Vec<Vec<f64>>) -> Result<Self> {
        if symbols.len() != columns.len() {
            return Err(Error::InvalidInput(format!(
                "{} symbols for {} return columns",
                symbols.len(),
                columns.len()
            )));
        }
        let rows = columns.first().map(Vec::len).unwrap_or(0);
        if columns.iter().any(|c| c.len() != rows) {
            return Err(Error::InvalidInput("return columns differ in length".into()));
        }
        if columns.iter().flatten().any(|r| !r.is_finite()) {
            return Err(Error::InvalidInput("returns must be finite".into()));
        }

        let data = DMatrix::from_fn(rows, columns.len(), |t, j| columns[j][t]);
        Ok(Self { symbols, data })
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Number of return rows.
    pub fn n_obs(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_assets(&self) -> usize {
        self.data.ncols()
    }

    pub fn column(&self, index: usize) -> Vec<f64> {
        self.data.column(index).iter().copied().collect()
    }

    pub fn column_by_symbol(&self, symbol: &str) -> Option<Vec<f64>> {
        self.position(symbol).map(|i| self.column(i))
    }

    pub fn columns(&self) -> Vec<Vec<f64>> {
        (0..self.n_assets()).map(|j| self.column(j)).collect()
    }

    fn position(&self, symbol: &str) -> Option<usize> {
        self.symbols.iter().position(|s| s == symbol)
    }

    /// Sub-matrix with the given columns in the given order.
    pub fn select(&self, symbols: &[String]) -> Result<Self> {
        let columns = symbols
            .iter()
            .map(|s| {
                self.column_by_symbol(s)
                    .ok_or_else(|| Error::NotFound(format!("no returns for {}", s)))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_columns(symbols.to_vec(), columns)
    }

    /// Fail with `InsufficientData` below `min_rows` rows or `min_assets` columns.
    pub fn require(&self, min_rows: usize, min_assets: usize) -> Result<()> {
        if self.n_assets() < min_assets {
            return Err(Error::InsufficientData(format!(
                "need at least {} assets, got {}",
                min_assets,
                self.n_assets()
            )));
        }
        if self.n_obs() < min_rows {
            return Err(Error::InsufficientData(format!(
                "need at least {} aligned return observations, got {}",
                min_rows,
                self.n_obs()
            )));
        }
        Ok(())
    }

    /// Annualized geometric mean return per asset: `(Π(1+r))^(252/T) - 1`.
    pub fn mean_historical_return(&self) -> DVector<f64> {
        let t = self.n_obs().max(1) as f64;
        DVector::from_iterator(
            self.n_assets(),
            self.data.column_iter().map(|col| {
                let growth: f64 = col.iter().map(|r| 1.0 + r).product();
                growth.max(0.0).powf(TRADING_DAYS / t) - 1.0
            }),
        )
    }

    fn centered(&self) -> DMatrix<f64> {
        let mut x = self.data.clone();
        for mut col in x.column_iter_mut() {
            let m = col.mean();
            col.add_scalar_mut(-m);
        }
        x
    }

    /// Sample covariance (ddof 1) scaled by `frequency` (1.0 for daily, 252.0 annual).
    pub fn sample_covariance(&self, frequency: f64) -> DMatrix<f64> {
        let x = self.centered();
        let denom = (self.n_obs().max(2) - 1) as f64;
        (x.transpose() * &x) * (frequency / denom)
    }

    /// Ledoit-Wolf covariance shrunk toward `trace(S)/N · I`, scaled by `frequency`.
    ///
    /// S is the maximum-likelihood (ddof 0) covariance; the shrinkage intensity
    /// is the Ledoit-Wolf optimal estimate.
    pub fn ledoit_wolf(&self, frequency: f64) -> DMatrix<f64> {
        let (shrunk, _) = self.ledoit_wolf_with_shrinkage();
        shrunk * frequency
    }

    pub(crate) fn ledoit_wolf_with_shrinkage(&self) -> (DMatrix<f64>, f64) {
        let n_samples = self.n_obs().max(1) as f64;
        let n_features = self.n_assets();
        let p = n_features as f64;

        let x = self.centered();
        let x2 = x.map(|v| v * v);
        let emp_cov = (x.transpose() * &x) / n_samples;

        let emp_cov_trace: Vec<f64> = x2.column_iter().map(|c| c.sum() / n_samples).collect();
        let mu = emp_cov_trace.iter().sum::<f64>() / p;

        let beta_sum = (x2.transpose() * &x2).sum();
        let delta_sum = (x.transpose() * &x).map(|v| v * v).sum() / (n_samples * n_samples);

        let beta = (beta_sum / n_samples - delta_sum) / (p * n_samples);
        let delta =
            (delta_sum - 2.0 * mu * emp_cov_trace.iter().sum::<f64>() + p * mu * mu) / p;
        let beta = beta.min(delta);
        let shrinkage = if beta == 0.0 || delta == 0.0 {
            0.0
        } else {
            beta / delta
        };

        let target = DMatrix::<f64>::identity(n_features, n_features) * mu;
        (emp_cov * (1.0 - shrinkage) + target * shrinkage, shrinkage)
    }

    /// Pairwise correlation matrix of the return columns.
    pub fn correlation(&self, method: CorrelationMethod) -> Vec<Vec<f64>> {
        method.matrix(&self.columns())
    }

    /// Weight vector in column order. Symbols without a weight get 0;
    /// weights for symbols outside the matrix are an error.
    pub fn weight_vector(&self, weights: &Weights) -> Result<DVector<f64>> {
        if let Some(unknown) = weights.keys().find(|s| self.position(s).is_none()) {
            return Err(Error::InvalidInput(format!("weight given for unknown asset {}", unknown)));
        }
        if let Some((s, w)) = weights.iter().find(|(_, w)| !w.is_finite()) {
            return Err(Error::InvalidInput(format!("weight for {} is not finite: {}", s, w)));
        }
        Ok(DVector::from_iterator(
            self.n_assets(),
            self.symbols.iter().map(|s| weights.get(s).copied().unwrap_or(0.0)),
        ))
    }

    /// Portfolio return series `R·w`.
    pub fn weighted(&self, weights: &Weights) -> Result<Vec<f64>> {
        let w = self.weight_vector(weights)?;
        Ok((&self.data * w).iter().copied().collect())
    }

    /// Pair a weight vector with the column symbols.
    pub fn to_weights(&self, w: &DVector<f64>) -> Weights {
        self.symbols.iter().cloned().zip(w.iter().copied()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceBar;
    use approx::assert_relative_eq;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn matrix() -> ReturnMatrix {
        ReturnMatrix::from_columns(
            vec!["A".into(), "B".into()],
            vec![
                vec![0.01, -0.02, 0.03, 0.00],
                vec![0.02, 0.01, -0.01, 0.02],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_from_series_inner_join() {
        let a = PriceSeries::new(
            "a",
            vec![
                PriceBar::flat(date(1), 100.0, 1.0),
                PriceBar::flat(date(2), 110.0, 1.0),
                PriceBar::flat(date(3), 121.0, 1.0),
            ],
        );
        // B has no bar on the 2nd
        let b = PriceSeries::new(
            "b",
            vec![
                PriceBar::flat(date(1), 50.0, 1.0),
                PriceBar::flat(date(3), 55.0, 1.0),
                PriceBar::flat(date(4), 60.0, 1.0),
            ],
        );

        let m = ReturnMatrix::from_series(&[a, b]).unwrap();
        assert_eq!(m.symbols(), &["A".to_string(), "B".to_string()]);
        assert_eq!(m.n_obs(), 1);
        assert_relative_eq!(m.column(0)[0], 0.21, epsilon = 1e-12);
        assert_relative_eq!(m.column(1)[0], 0.10, epsilon = 1e-12);
    }

    #[test]
    fn test_duplicate_symbols_rejected() {
        let a = PriceSeries::from_closes("A", date(1), &[1.0, 2.0]);
        assert!(matches!(
            ReturnMatrix::from_series(&[a.clone(), a]),
            Err(Error::InvalidInput(_))
        ));
    }

    #[test]
    fn test_mean_historical_return_is_geometric() {
        let m = ReturnMatrix::from_columns(vec!["A".into()], vec![vec![0.10, -0.10]]).unwrap();
        let mu = m.mean_historical_return();
        // growth 0.99 over 2 periods
        assert_relative_eq!(mu[0], 0.99f64.powf(126.0) - 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_sample_covariance_matches_stats() {
        let m = matrix();
        let cov = m.sample_covariance(1.0);
        let a = m.column(0);
        let b = m.column(1);
        assert_relative_eq!(cov[(0, 1)], crate::stats::covariance(&a, &b, 1), epsilon = 1e-15);
        assert_relative_eq!(cov[(0, 0)], crate::stats::variance(&a, 1), epsilon = 1e-15);

        let annual = m.sample_covariance(252.0);
        assert_relative_eq!(annual[(1, 1)], cov[(1, 1)] * 252.0, epsilon = 1e-15);
    }

    #[test]
    fn test_ledoit_wolf_shrinks_toward_scaled_identity() {
        let m = matrix();
        let (shrunk, shrinkage) = m.ledoit_wolf_with_shrinkage();
        assert!((0.0..=1.0).contains(&shrinkage));

        // The target keeps the trace, so shrinkage preserves it.
        let emp = m.sample_covariance(1.0) * (3.0 / 4.0);
        assert_relative_eq!(shrunk.trace(), emp.trace(), epsilon = 1e-15);
        // Off-diagonal terms only get smaller in magnitude.
        assert!(shrunk[(0, 1)].abs() <= emp[(0, 1)].abs() + 1e-18);
        assert_relative_eq!(shrunk[(0, 1)], shrunk[(1, 0)], epsilon = 1e-18);
    }

    #[test]
    fn test_ledoit_wolf_identity_sample_needs_no_shrinkage() {
        // Uncorrelated columns with equal variance: S is already mu*I.
        let m = ReturnMatrix::from_columns(
            vec!["A".into(), "B".into()],
            vec![vec![1.0, -1.0, 1.0, -1.0], vec![1.0, 1.0, -1.0, -1.0]],
        )
        .unwrap();
        let (shrunk, shrinkage) = m.ledoit_wolf_with_shrinkage();
        assert_eq!(shrinkage, 0.0);
        assert_relative_eq!(shrunk[(0, 0)], 1.0, epsilon = 1e-15);
        assert_relative_eq!(shrunk[(0, 1)], 0.0, epsilon = 1e-15);
    }

    #[test]
    fn test_weighted_returns() {
        let m = matrix();
        let weights: Weights = [("A".to_string(), 0.5), ("B".to_string(), 0.5)].into();
        let r = m.weighted(&weights).unwrap();
        assert_relative_eq!(r[0], 0.015, epsilon = 1e-15);
        assert_relative_eq!(r[2], 0.01, epsilon = 1e-15);

        let unknown: Weights = [("Z".to_string(), 1.0)].into();
        assert!(matches!(m.weighted(&unknown), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn test_require_observations() {
        let m = matrix();
        assert!(m.require(4, 2).is_ok());
        assert!(matches!(m.require(MIN_OBSERVATIONS, 2), Err(Error::InsufficientData(_))));
        assert!(matches!(m.require(1, 3), Err(Error::InsufficientData(_))));
    }
}
