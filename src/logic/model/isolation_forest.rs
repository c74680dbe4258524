//! Isolation Forest
//!
//! Unsupervised anomaly estimator. Scores follow the usual convention:
//! `score = -2^(-E[h(x)] / c(psi))`, in `[-1, 0)`, lower = more anomalous.
//! The decision offset is the `contamination` quantile of training scores.

use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CONTAMINATION, DEFAULT_MAX_SAMPLES, DEFAULT_N_ESTIMATORS, DEFAULT_SEED};
use crate::error::{EngineError, EngineResult};

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Average path length of an unsuccessful BST search over `n` points
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated percentile of an unsorted sample, `q` in `[0, 1]`
pub fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

// ============================================================================
// PARAMS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForestParams {
    pub n_estimators: usize,
    /// Sub-sample cap per tree (`min(max_samples, n_rows)` is used)
    pub max_samples: usize,
    pub contamination: f64,
    pub seed: u64,
}

impl Default for IsolationForestParams {
    fn default() -> Self {
        Self {
            n_estimators: DEFAULT_N_ESTIMATORS,
            max_samples: DEFAULT_MAX_SAMPLES,
            contamination: DEFAULT_CONTAMINATION,
            seed: DEFAULT_SEED,
        }
    }
}

// ============================================================================
// TREE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf { size: usize },
    Split { feature: usize, threshold: f64, left: usize, right: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn build(x: &Array2<f64>, sample: Vec<usize>, max_depth: usize, rng: &mut StdRng) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(x, sample, 0, max_depth, rng);
        tree
    }

    fn grow(
        &mut self,
        x: &Array2<f64>,
        rows: Vec<usize>,
        depth: usize,
        max_depth: usize,
        rng: &mut StdRng,
    ) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf { size: rows.len() });

        if depth >= max_depth || rows.len() <= 1 {
            return id;
        }

        // Only features that still vary within this node can split it
        let splittable: Vec<(usize, f64, f64)> = (0..x.ncols())
            .filter_map(|j| {
                let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &i| {
                    (lo.min(x[[i, j]]), hi.max(x[[i, j]]))
                });
                (hi > lo).then_some((j, lo, hi))
            })
            .collect();

        if splittable.is_empty() {
            return id;
        }

        let (feature, lo, hi) = splittable[rng.gen_range(0..splittable.len())];
        let threshold = rng.gen_range(lo..hi);
        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) =
            rows.into_iter().partition(|&i| x[[i, feature]] < threshold);

        let left = self.grow(x, left_rows, depth + 1, max_depth, rng);
        let right = self.grow(x, right_rows, depth + 1, max_depth, rng);
        self.nodes[id] = Node::Split { feature, threshold, left, right };
        id
    }

    fn path_length(&self, row: ArrayView1<f64>) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[node] {
                Node::Leaf { size } => return depth + average_path_length(*size),
                Node::Split { feature, threshold, left, right } => {
                    node = if row[*feature] < *threshold { *left } else { *right };
                    depth += 1.0;
                }
            }
        }
    }
}

// ============================================================================
// FOREST
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    pub params: IsolationForestParams,
    pub n_features: usize,
    /// Sub-sample size actually used per tree
    pub sample_size: usize,
    /// Scores below this are anomalies
    pub offset: f64,
    trees: Vec<IsolationTree>,
}

impl IsolationForest {
    /// Fit on an already-scaled matrix
    pub fn fit(x: &Array2<f64>, params: IsolationForestParams) -> EngineResult<Self> {
        let n_rows = x.nrows();
        if n_rows < 2 {
            return Err(EngineError::InsufficientData { required: 2, actual: n_rows });
        }
        if !(params.contamination > 0.0 && params.contamination <= 0.5) {
            return Err(EngineError::InvalidConfig(format!(
                "contamination must be in (0, 0.5], got {}",
                params.contamination
            )));
        }

        let sample_size = params.max_samples.max(2).min(n_rows);
        let max_depth = (sample_size as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(params.seed);

        let trees = (0..params.n_estimators.max(1))
            .map(|_| {
                let sample = index::sample(&mut rng, n_rows, sample_size).into_vec();
                IsolationTree::build(x, sample, max_depth, &mut rng)
            })
            .collect();

        let mut forest = Self {
            n_features: x.ncols(),
            sample_size,
            offset: 0.0,
            trees,
            params,
        };

        let training_scores = forest.score_samples(x);
        forest.offset = quantile(&training_scores, forest.params.contamination);
        Ok(forest)
    }

    fn score_view(&self, row: ArrayView1<f64>) -> f64 {
        let mean_path = self.trees.iter().map(|t| t.path_length(row)).sum::<f64>()
            / self.trees.len() as f64;
        let c = average_path_length(self.sample_size);
        if c == 0.0 {
            return -1.0;
        }
        -(2f64.powf(-mean_path / c))
    }

    /// Anomaly score per row (lower = more anomalous)
    pub fn score_samples(&self, x: &Array2<f64>) -> Vec<f64> {
        x.rows().into_iter().map(|row| self.score_view(row)).collect()
    }

    /// Anomaly score for one scaled row
    pub fn score_row(&self, row: &[f64]) -> f64 {
        self.score_view(ArrayView1::from(row))
    }

    pub fn is_anomaly(&self, score: f64) -> bool {
        score < self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with_outlier() -> Array2<f64> {
        let mut data = Vec::new();
        for i in 0..200 {
            data.push(((i * 37) % 199) as f64 / 199.0 - 0.5);
            data.push(((i * 53) % 197) as f64 / 197.0 - 0.5);
        }
        data.push(25.0);
        data.push(-30.0);
        Array2::from_shape_vec((201, 2), data).unwrap()
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        assert!(average_path_length(256) > 9.0);
    }

    #[test]
    fn test_quantile() {
        assert_eq!(quantile(&[4.0, 1.0, 3.0, 2.0, 5.0], 0.5), 3.0);
        assert_eq!(quantile(&[1.0, 2.0], 0.5), 1.5);
        assert_eq!(quantile(&[], 0.5), 0.0);
    }

    #[test]
    fn test_outlier_scores_lowest() {
        let x = cluster_with_outlier();
        let forest = IsolationForest::fit(&x, IsolationForestParams::default()).unwrap();
        let scores = forest.score_samples(&x);

        let outlier = scores[200];
        let min_inlier = scores[..200].iter().copied().fold(f64::INFINITY, f64::min);
        assert!(outlier < min_inlier);
        assert!(forest.is_anomaly(outlier));
        assert!(scores.iter().all(|s| *s < 0.0 && *s >= -1.0));
    }

    #[test]
    fn test_contamination_sets_anomaly_rate() {
        let x = cluster_with_outlier();
        let forest = IsolationForest::fit(&x, IsolationForestParams::default()).unwrap();
        let flagged = forest.score_samples(&x).iter().filter(|s| forest.is_anomaly(**s)).count();
        // Roughly 10% of 201 rows, quantile ties allowed
        assert!(flagged >= 10 && flagged <= 25, "flagged {}", flagged);
    }

    #[test]
    fn test_seeded_fit_is_reproducible() {
        let x = cluster_with_outlier();
        let a = IsolationForest::fit(&x, IsolationForestParams::default()).unwrap();
        let b = IsolationForest::fit(&x, IsolationForestParams::default()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_bad_contamination() {
        let x = cluster_with_outlier();
        let params = IsolationForestParams { contamination: 0.0, ..Default::default() };
        assert!(matches!(
            IsolationForest::fit(&x, params),
            Err(EngineError::InvalidConfig(_))
        ));
    }
}
