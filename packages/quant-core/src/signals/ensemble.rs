//! Next-bar return ensemble: random forest, gradient boosting and ridge
//! regression on standardized features, built on smartcore estimators.

use crate::stats;
use crate::{Error, Result};
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;
use smartcore::linear::ridge_regression::{RidgeRegression, RidgeRegressionParameters};
use smartcore::tree::decision_tree_regressor::{
    DecisionTreeRegressor, DecisionTreeRegressorParameters,
};
use std::fmt;

pub const ENSEMBLE_SEED: u64 = 42;
pub const FOREST_TREES: usize = 100;
pub const FOREST_DEPTH: u16 = 8;
pub const FOREST_MIN_LEAF: usize = 5;
pub const BOOSTING_ROUNDS: usize = 100;
pub const BOOSTING_DEPTH: u16 = 3;
pub const LEARNING_RATE: f64 = 0.1;
pub const RIDGE_ALPHA: f64 = 1.0;

type Matrix = DenseMatrix<f64>;

fn to_matrix(rows: &[Vec<f64>]) -> Result<Matrix> {
    DenseMatrix::from_2d_vec(&rows.to_vec())
        .map_err(|e| Error::InvalidInput(format!("feature matrix: {}", e)))
}

fn model_error(model: &'static str) -> impl Fn(smartcore::error::Failed) -> Error {
    move |e| Error::Computation(format!("{}: {}", model, e))
}

/// A fitted regressor predicting one value per feature row.
pub trait Regressor: Send + Sync {
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>>;
}

/// Z-score scaling with population standard deviation.
#[derive(Debug, Clone)]
pub struct StandardScaler {
    means: Vec<f64>,
    scales: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(x: &[Vec<f64>]) -> Self {
        let n_features = x.first().map_or(0, Vec::len);
        let (means, scales) = (0..n_features)
            .map(|j| {
                let column: Vec<f64> = x.iter().map(|row| row[j]).collect();
                let std = stats::std_dev(&column, 0);
                (stats::mean(&column), if std > 0.0 { std } else { 1.0 })
            })
            .unzip();
        Self { means, scales }
    }

    pub fn transform(&self, row: &[f64]) -> Vec<f64> {
        row.iter()
            .zip(self.means.iter().zip(&self.scales))
            .map(|(v, (m, s))| (v - m) / s)
            .collect()
    }
}

/// Bootstrap-aggregated trees with √p features per split.
pub struct RandomForest {
    model: RandomForestRegressor<f64, f64, Matrix, Vec<f64>>,
}

impl RandomForest {
    pub fn fit(x: &Matrix, y: &[f64], n_features: usize, seed: u64) -> Result<Self> {
        let params = RandomForestRegressorParameters::default()
            .with_n_trees(FOREST_TREES)
            .with_max_depth(FOREST_DEPTH)
            .with_min_samples_leaf(FOREST_MIN_LEAF)
            .with_m(((n_features as f64).sqrt().floor() as usize).max(1))
            .with_seed(seed);
        let model = RandomForestRegressor::fit(x, &y.to_vec(), params)
            .map_err(model_error("random forest"))?;
        Ok(Self { model })
    }
}

impl Regressor for RandomForest {
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        self.model
            .predict(&to_matrix(rows)?)
            .map_err(model_error("random forest"))
    }
}

/// Least-squares gradient boosting: shallow regression trees fitted to the
/// running residuals, shrunk by the learning rate.
pub struct GradientBoosting {
    init: f64,
    learning_rate: f64,
    trees: Vec<DecisionTreeRegressor<f64, f64, Matrix, Vec<f64>>>,
}

impl GradientBoosting {
    pub fn fit(x: &Matrix, y: &[f64], rounds: usize, learning_rate: f64, seed: u64) -> Result<Self> {
        let params = DecisionTreeRegressorParameters {
            seed: Some(seed),
            ..Default::default()
        }
        .with_max_depth(BOOSTING_DEPTH)
        .with_min_samples_leaf(1);

        let init = stats::mean(y);
        let mut fitted = vec![init; y.len()];
        let mut trees = Vec::with_capacity(rounds);
        for _ in 0..rounds {
            let residuals: Vec<f64> = y.iter().zip(&fitted).map(|(t, f)| t - f).collect();
            let tree = DecisionTreeRegressor::fit(x, &residuals, params.clone())
                .map_err(model_error("gradient boosting"))?;
            let step = tree.predict(x).map_err(model_error("gradient boosting"))?;
            for (f, s) in fitted.iter_mut().zip(step) {
                *f += learning_rate * s;
            }
            trees.push(tree);
        }

        Ok(Self {
            init,
            learning_rate,
            trees,
        })
    }
}

impl Regressor for GradientBoosting {
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        let x = to_matrix(rows)?;
        let mut out = vec![self.init; rows.len()];
        for tree in &self.trees {
            let step = tree.predict(&x).map_err(model_error("gradient boosting"))?;
            for (o, s) in out.iter_mut().zip(step) {
                *o += self.learning_rate * s;
            }
        }
        Ok(out)
    }
}

/// Ridge with an unpenalized intercept.
///
/// Columns and target are centered before the fit so the penalty never
/// touches the intercept.
pub struct Ridge {
    x_means: Vec<f64>,
    y_mean: f64,
    model: RidgeRegression<f64, f64, Matrix, Vec<f64>>,
}

impl Ridge {
    pub fn fit(x: &[Vec<f64>], y: &[f64], alpha: f64) -> Result<Self> {
        let rows = y.len();
        let cols = x.first().map_or(0, Vec::len);
        if rows == 0 || cols == 0 {
            return Err(Error::InsufficientData("ridge regression needs data".into()));
        }
        let x_means: Vec<f64> = (0..cols)
            .map(|j| x.iter().map(|r| r[j]).sum::<f64>() / rows as f64)
            .collect();
        let y_mean = stats::mean(y);

        let centered = to_matrix(&center(x, &x_means))?;
        let target: Vec<f64> = y.iter().map(|v| v - y_mean).collect();
        let params = RidgeRegressionParameters::default()
            .with_alpha(alpha)
            .with_normalize(false);
        let model = RidgeRegression::fit(&centered, &target, params).map_err(model_error("ridge"))?;
        Ok(Self {
            x_means,
            y_mean,
            model,
        })
    }
}

impl Regressor for Ridge {
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        let centered = to_matrix(&center(rows, &self.x_means))?;
        let out = self.model.predict(&centered).map_err(model_error("ridge"))?;
        Ok(out.into_iter().map(|v| v + self.y_mean).collect())
    }
}

fn center(rows: &[Vec<f64>], means: &[f64]) -> Vec<Vec<f64>> {
    rows.iter()
        .map(|row| row.iter().zip(means).map(|(v, m)| v - m).collect())
        .collect()
}

/// Trained ensemble for one symbol and timeframe.
pub struct EnsembleModel {
    scaler: StandardScaler,
    forest: RandomForest,
    boosting: GradientBoosting,
    ridge: Ridge,
    training_rows: usize,
}

impl fmt::Debug for EnsembleModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnsembleModel")
            .field("training_rows", &self.training_rows)
            .field("boosting_rounds", &self.boosting.trees.len())
            .finish()
    }
}

impl EnsembleModel {
    pub fn train(x: &[Vec<f64>], y: &[f64], seed: u64) -> Result<Self> {
        if x.len() != y.len() {
            return Err(Error::InvalidInput("feature rows and targets differ in length".into()));
        }
        if x.iter().flatten().chain(y).any(|v| !v.is_finite()) {
            return Err(Error::InvalidInput("training data contains non-finite values".into()));
        }
        let n_features = x.first().map_or(0, Vec::len);
        if y.is_empty() || n_features == 0 {
            return Err(Error::InsufficientData("ensemble needs training rows".into()));
        }

        let scaler = StandardScaler::fit(x);
        let scaled: Vec<Vec<f64>> = x.iter().map(|row| scaler.transform(row)).collect();
        let matrix = to_matrix(&scaled)?;

        let ridge = Ridge::fit(&scaled, y, RIDGE_ALPHA)?;
        let forest = RandomForest::fit(&matrix, y, n_features, seed)?;
        let boosting = GradientBoosting::fit(&matrix, y, BOOSTING_ROUNDS, LEARNING_RATE, seed)?;

        Ok(Self {
            scaler,
            forest,
            boosting,
            ridge,
            training_rows: y.len(),
        })
    }

    pub fn training_rows(&self) -> usize {
        self.training_rows
    }

    /// Forest, boosting and ridge predictions for one unscaled feature row.
    pub fn predictions(&self, row: &[f64]) -> Result<[f64; 3]> {
        let scaled = vec![self.scaler.transform(row)];
        let first = |values: Vec<f64>| {
            values
                .first()
                .copied()
                .ok_or_else(|| Error::Computation("model returned no prediction".into()))
        };
        Ok([
            first(self.forest.predict(&scaled)?)?,
            first(self.boosting.predict(&scaled)?)?,
            first(self.ridge.predict(&scaled)?)?,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn training_set(n: usize) -> (Vec<Vec<f64>>, Vec<f64>) {
        let x: Vec<Vec<f64>> = (0..n)
            .map(|i| {
                let t = i as f64;
                vec![(t * 0.37).sin(), (t * 0.11).cos() * 3.0, (t * 0.73).sin() + 10.0]
            })
            .collect();
        let y = x.iter().map(|r| 0.01 * r[0] - 0.002 * r[1]).collect();
        (x, y)
    }

    #[test]
    fn test_scaler() {
        let scaler = StandardScaler::fit(&[vec![1.0, 5.0], vec![3.0, 5.0]]);
        assert_eq!(scaler.transform(&[3.0, 5.0]), vec![1.0, 0.0]);
        assert_eq!(scaler.transform(&[2.0, 7.0]), vec![0.0, 2.0]);
    }

    #[test]
    fn test_ridge_shrinks_slope() {
        let x: Vec<Vec<f64>> = (-2..=2).map(|v| vec![v as f64]).collect();
        let y: Vec<f64> = (-2..=2).map(|v| 3.0 * v as f64 + 4.0).collect();
        let ridge = Ridge::fit(&x, &y, 1.0).unwrap();
        let at = ridge.predict(&[vec![0.0], vec![1.0]]).unwrap();

        // Sxy / (Sxx + λ) = 30 / 11
        assert_relative_eq!(at[1] - at[0], 30.0 / 11.0, epsilon = 1e-9);
        assert_relative_eq!(at[0], 4.0, epsilon = 1e-9);
    }

    #[test]
    fn test_boosting_reduces_training_error() {
        let (x, y) = training_set(120);
        let matrix = to_matrix(&x).unwrap();
        let model = GradientBoosting::fit(&matrix, &y, BOOSTING_ROUNDS, LEARNING_RATE, ENSEMBLE_SEED).unwrap();

        let fitted = model.predict(&x).unwrap();
        let mse: f64 = fitted.iter().zip(&y).map(|(f, t)| (f - t).powi(2)).sum::<f64>() / y.len() as f64;
        assert!(mse < 0.1 * stats::variance(&y, 0));
    }

    #[test]
    fn test_forest_fits_the_training_signal() {
        let (x, y) = training_set(150);
        let matrix = to_matrix(&x).unwrap();
        let forest = RandomForest::fit(&matrix, &y, 3, ENSEMBLE_SEED).unwrap();

        let fitted = forest.predict(&x).unwrap();
        let mse: f64 = fitted.iter().zip(&y).map(|(f, t)| (f - t).powi(2)).sum::<f64>() / y.len() as f64;
        assert!(mse < stats::variance(&y, 0));
    }

    #[test]
    fn test_ensemble_is_deterministic() {
        let (x, y) = training_set(150);
        let first = EnsembleModel::train(&x, &y, ENSEMBLE_SEED).unwrap();
        let second = EnsembleModel::train(&x, &y, ENSEMBLE_SEED).unwrap();

        let row = [0.9, -2.0, 10.5];
        let a = first.predictions(&row).unwrap();
        let b = second.predictions(&row).unwrap();
        for (p, q) in a.iter().zip(&b) {
            assert_eq!(p.to_bits(), q.to_bits());
        }
        assert_eq!(first.training_rows(), 150);
    }

    #[test]
    fn test_ensemble_tracks_the_signal() {
        let (x, y) = training_set(200);
        let model = EnsembleModel::train(&x, &y, ENSEMBLE_SEED).unwrap();

        let up = model.predictions(&[1.0, -3.0, 10.0]).unwrap();
        let down = model.predictions(&[-1.0, 3.0, 10.0]).unwrap();
        for (u, d) in up.iter().zip(&down) {
            assert!(u > d);
        }
    }

    #[test]
    fn test_constant_feature_is_tolerated() {
        let (mut x, y) = training_set(120);
        for row in &mut x {
            row.push(1.0);
        }
        let model = EnsembleModel::train(&x, &y, ENSEMBLE_SEED).unwrap();
        assert!(model.predictions(&[0.5, 1.0, 10.0, 1.0]).unwrap().iter().all(|p| p.is_finite()));
    }

    #[test]
    fn test_rejects_non_finite_training_data() {
        let x = vec![vec![1.0], vec![f64::NAN]];
        assert!(EnsembleModel::train(&x, &[0.0, 1.0], ENSEMBLE_SEED).is_err());
    }
}
