//! Hierarchical risk parity.
//!
//! Assets are clustered with Ward linkage on the correlation distance
//! `√((1 − ρ)/2)`, ordered by the dendrogram leaves, and weighted by recursive
//! bisection with inverse-variance cluster allocations.

use super::returns::ReturnMatrix;
use super::Weights;
use crate::{Error, Result};
use nalgebra::{DMatrix, DVector};

/// One agglomeration step. `left` is always the smaller cluster id; the
/// merged cluster gets id `n + step`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub distance: f64,
    pub size: usize,
}

/// Weights in input order plus the dendrogram leaf order.
#[derive(Debug, Clone)]
pub struct HrpAllocation {
    pub weights: DVector<f64>,
    pub order: Vec<usize>,
}

/// Correlation implied by a covariance matrix.
pub fn cov_to_corr(cov: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let n = cov.nrows();
    let std: Vec<f64> = (0..n).map(|i| cov[(i, i)].sqrt()).collect();
    if let Some(i) = std.iter().position(|s| !s.is_finite() || *s <= 0.0) {
        return Err(Error::Computation(format!(
            "asset {} has non-positive variance",
            i
        )));
    }
    Ok(DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            1.0
        } else {
            cov[(i, j)] / (std[i] * std[j])
        }
    }))
}

/// `√((1 − ρ)/2)`, clamped to [0, 1].
pub fn correlation_distance(corr: &DMatrix<f64>) -> DMatrix<f64> {
    corr.map(|rho| ((1.0 - rho) / 2.0).clamp(0.0, 1.0).sqrt())
}

/// Ward agglomerative clustering with Lance-Williams distance updates.
///
/// Ties are broken by the lowest `(left, right)` pair of cluster ids.
pub fn ward_linkage(dist: &DMatrix<f64>) -> Vec<Merge> {
    let n = dist.nrows();
    if n < 2 {
        return Vec::new();
    }

    let total = 2 * n - 1;
    let mut d = vec![vec![0.0; total]; total];
    for i in 0..n {
        for j in 0..n {
            d[i][j] = dist[(i, j)];
        }
    }
    let mut size = vec![1usize; total];
    let mut active: Vec<usize> = (0..n).collect();
    let mut merges = Vec::with_capacity(n - 1);

    for step in 0..n - 1 {
        let mut best: Option<(usize, usize, f64)> = None;
        for (pos, &i) in active.iter().enumerate() {
            for &j in &active[pos + 1..] {
                if best.is_none_or(|(_, _, b)| d[i][j] < b) {
                    best = Some((i, j, d[i][j]));
                }
            }
        }
        let Some((i, j, d_ij)) = best else {
            break;
        };

        let new = n + step;
        let (n_i, n_j) = (size[i] as f64, size[j] as f64);
        for &k in active.iter().filter(|&&k| k != i && k != j) {
            let n_k = size[k] as f64;
            let squared = ((n_k + n_i) * d[k][i].powi(2) + (n_k + n_j) * d[k][j].powi(2)
                - n_k * d_ij.powi(2))
                / (n_i + n_j + n_k);
            let updated = squared.max(0.0).sqrt();
            d[k][new] = updated;
            d[new][k] = updated;
        }

        size[new] = size[i] + size[j];
        active.retain(|&k| k != i && k != j);
        active.push(new);
        merges.push(Merge {
            left: i,
            right: j,
            distance: d_ij,
            size: size[new],
        });
    }

    merges
}

/// Leaves of the dendrogram in depth-first order, left child first.
pub fn leaf_order(merges: &[Merge], n: usize) -> Vec<usize> {
    if n == 0 {
        return Vec::new();
    }
    let root = match merges.len() {
        0 => 0,
        m => n + m - 1,
    };
    let mut order = Vec::with_capacity(n);
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node < n {
            order.push(node);
        } else {
            let merge = merges[node - n];
            stack.push(merge.right);
            stack.push(merge.left);
        }
    }
    order
}

/// Variance of a cluster held with inverse-variance weights.
fn cluster_variance(cov: &DMatrix<f64>, items: &[usize]) -> f64 {
    let inv: Vec<f64> = items.iter().map(|&i| 1.0 / cov[(i, i)]).collect();
    let total: f64 = inv.iter().sum();
    let w: Vec<f64> = inv.iter().map(|v| v / total).collect();

    let mut var = 0.0;
    for (a, &i) in items.iter().enumerate() {
        for (b, &j) in items.iter().enumerate() {
            var += w[a] * w[b] * cov[(i, j)];
        }
    }
    var
}

/// HRP on an explicit covariance matrix, keeping its asset order.
pub fn hrp_weights_from_cov(cov: &DMatrix<f64>) -> Result<HrpAllocation> {
    let n = cov.nrows();
    if n == 0 || cov.ncols() != n {
        return Err(Error::InvalidInput(format!(
            "covariance must be square and non-empty, got {}x{}",
            cov.nrows(),
            cov.ncols()
        )));
    }

    let corr = cov_to_corr(cov)?;
    let merges = ward_linkage(&correlation_distance(&corr));
    let order = leaf_order(&merges, n);

    let mut weights = DVector::from_element(n, 1.0);
    let mut pending: Vec<Vec<usize>> = vec![order.clone()];
    while let Some(items) = pending.pop() {
        if items.len() < 2 {
            continue;
        }
        let (left, right) = items.split_at(items.len() / 2);
        let left_var = cluster_variance(cov, left);
        let right_var = cluster_variance(cov, right);
        let alpha = right_var / (left_var + right_var);
        if !alpha.is_finite() {
            return Err(Error::Computation("cluster variances are degenerate".into()));
        }

        for &i in left {
            weights[i] *= alpha;
        }
        for &i in right {
            weights[i] *= 1.0 - alpha;
        }
        pending.push(left.to_vec());
        pending.push(right.to_vec());
    }

    Ok(HrpAllocation { weights, order })
}

/// HRP weights for a return matrix together with the cluster order by symbol.
///
/// Symbols are put in sorted order first so the result does not depend on
/// the order the assets were supplied in.
pub fn hrp(returns: &ReturnMatrix) -> Result<(Weights, Vec<String>)> {
    let mut symbols = returns.symbols().to_vec();
    symbols.sort();
    let canonical = returns.select(&symbols)?;

    let allocation = hrp_weights_from_cov(&canonical.sample_covariance(1.0))?;
    let order = allocation
        .order
        .iter()
        .map(|&i| symbols[i].clone())
        .collect();
    Ok((canonical.to_weights(&allocation.weights), order))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn hand_cov() -> DMatrix<f64> {
        let sigma = [0.10, 0.20, 0.15];
        let corr = DMatrix::from_row_slice(3, 3, &[1.0, 0.8, 0.2, 0.8, 1.0, 0.3, 0.2, 0.3, 1.0]);
        DMatrix::from_fn(3, 3, |i, j| corr[(i, j)] * sigma[i] * sigma[j])
    }

    #[test]
    fn test_hand_computed_three_assets() {
        let allocation = hrp_weights_from_cov(&hand_cov()).unwrap();

        // 0 and 1 are closest, then 2 joins; 2 has the smaller id.
        assert_eq!(allocation.order, vec![2, 0, 1]);

        // Left {2}: var 0.0225. Right {0,1}: ivp weights (0.8, 0.2) give 0.01312.
        let alpha = 0.01312 / (0.0225 + 0.01312);
        let w = &allocation.weights;
        assert_relative_eq!(w[2], alpha, epsilon = 1e-12);
        assert_relative_eq!(w[0], (1.0 - alpha) * 0.8, epsilon = 1e-12);
        assert_relative_eq!(w[1], (1.0 - alpha) * 0.2, epsilon = 1e-12);
        assert_relative_eq!(w.sum(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_ward_linkage_distances() {
        let corr = cov_to_corr(&hand_cov()).unwrap();
        let merges = ward_linkage(&correlation_distance(&corr));
        assert_eq!(merges.len(), 2);
        assert_eq!((merges[0].left, merges[0].right), (0, 1));
        assert_relative_eq!(merges[0].distance, 0.1f64.sqrt(), epsilon = 1e-12);

        // Lance-Williams: (2·0.4 + 2·0.35 − 0.1)/3
        let expected = ((2.0 * 0.4 + 2.0 * 0.35 - 0.1) / 3.0f64).sqrt();
        assert_eq!((merges[1].left, merges[1].right), (2, 3));
        assert_relative_eq!(merges[1].distance, expected, epsilon = 1e-12);
        assert_eq!(merges[1].size, 3);
    }

    #[test]
    fn test_ties_break_on_lowest_pair() {
        // Every pair is equally distant.
        let dist = DMatrix::from_fn(4, 4, |i, j| if i == j { 0.0 } else { 0.5 });
        let merges = ward_linkage(&dist);
        assert_eq!((merges[0].left, merges[0].right), (0, 1));
        assert_eq!(leaf_order(&merges, 4).len(), 4);
    }

    #[test]
    fn test_single_asset() {
        let cov = DMatrix::from_element(1, 1, 0.04);
        let allocation = hrp_weights_from_cov(&cov).unwrap();
        assert_eq!(allocation.order, vec![0]);
        assert_eq!(allocation.weights[0], 1.0);
    }

    fn sample_returns(symbols: &[&str]) -> ReturnMatrix {
        let base: [Vec<f64>; 4] = [
            (0..60).map(|t| ((t as f64) * 0.7).sin() * 0.01).collect(),
            (0..60).map(|t| ((t as f64) * 0.7).sin() * 0.012 + ((t as f64) * 1.3).cos() * 0.003).collect(),
            (0..60).map(|t| ((t as f64) * 0.4).cos() * 0.02).collect(),
            (0..60).map(|t| ((t as f64) * 2.1).sin() * 0.015).collect(),
        ];
        let names = ["AAA", "BBB", "CCC", "DDD"];
        let columns = symbols
            .iter()
            .map(|s| base[names.iter().position(|n| n == s).unwrap()].clone())
            .collect();
        ReturnMatrix::from_columns(symbols.iter().map(|s| s.to_string()).collect(), columns)
            .unwrap()
    }

    #[test]
    fn test_hrp_is_permutation_invariant() {
        let (w1, order1) = hrp(&sample_returns(&["AAA", "BBB", "CCC", "DDD"])).unwrap();
        let (w2, order2) = hrp(&sample_returns(&["DDD", "BBB", "AAA", "CCC"])).unwrap();

        assert_eq!(order1, order2);
        for (symbol, w) in &w1 {
            assert_eq!(*w, w2[symbol]);
        }
        assert_relative_eq!(w1.values().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert!(w1.values().all(|&w| w > 0.0));
    }
}
