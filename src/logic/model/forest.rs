//! Random Forest Classifier
//!
//! Supervised failure classifier: bagged CART trees with Gini impurity.
//! Fitting is fully seeded so a trial is reproducible from its params.

use ndarray::{Array2, ArrayView1};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_SEED;
use crate::error::{EngineError, EngineResult};

// ============================================================================
// PARAMS
// ============================================================================

/// Features considered per split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaxFeatures {
    Sqrt,
    Log2,
}

impl MaxFeatures {
    pub fn resolve(&self, n_features: usize) -> usize {
        let n = n_features as f64;
        let k = match self {
            MaxFeatures::Sqrt => n.sqrt(),
            MaxFeatures::Log2 => n.log2(),
        };
        (k.floor() as usize).clamp(1, n_features.max(1))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MaxFeatures::Sqrt => "sqrt",
            MaxFeatures::Log2 => "log2",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
    pub max_features: MaxFeatures,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_depth: 10,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: MaxFeatures::Sqrt,
            seed: DEFAULT_SEED,
        }
    }
}

impl ForestParams {
    /// Flat string view, as logged on a run
    pub fn to_params(&self) -> Vec<(String, String)> {
        vec![
            ("n_estimators".to_string(), self.n_estimators.to_string()),
            ("max_depth".to_string(), self.max_depth.to_string()),
            ("min_samples_split".to_string(), self.min_samples_split.to_string()),
            ("min_samples_leaf".to_string(), self.min_samples_leaf.to_string()),
            ("max_features".to_string(), self.max_features.as_str().to_string()),
        ]
    }
}

// ============================================================================
// TREE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    /// Fraction of positive samples reaching the leaf
    Leaf { proba: f64 },
    Split { feature: usize, threshold: f64, left: usize, right: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct DecisionTree {
    nodes: Vec<Node>,
}

fn gini(pos: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let p = pos as f64 / total as f64;
    2.0 * p * (1.0 - p)
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    decrease: f64,
}

struct TreeBuilder<'a> {
    x: &'a Array2<f64>,
    y: &'a [bool],
    params: &'a ForestParams,
    n_try: usize,
    n_total: f64,
    importances: Vec<f64>,
}

impl<'a> TreeBuilder<'a> {
    fn grow(&mut self, tree: &mut DecisionTree, rows: Vec<usize>, depth: usize, rng: &mut StdRng) -> usize {
        let pos = rows.iter().filter(|&&i| self.y[i]).count();
        let id = tree.nodes.len();
        tree.nodes.push(Node::Leaf { proba: pos as f64 / rows.len().max(1) as f64 });

        let pure = pos == 0 || pos == rows.len();
        if pure || depth >= self.params.max_depth || rows.len() < self.params.min_samples_split {
            return id;
        }

        let Some(split) = self.best_split(&rows, pos, rng) else {
            return id;
        };

        self.importances[split.feature] += split.decrease * rows.len() as f64 / self.n_total;

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&i| self.x[[i, split.feature]] <= split.threshold);
        let left = self.grow(tree, left_rows, depth + 1, rng);
        let right = self.grow(tree, right_rows, depth + 1, rng);
        tree.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    fn best_split(&self, rows: &[usize], pos: usize, rng: &mut StdRng) -> Option<BestSplit> {
        let n = rows.len();
        let parent = gini(pos, n);
        let min_leaf = self.params.min_samples_leaf.max(1);
        let candidates = index::sample(rng, self.x.ncols(), self.n_try);

        let mut best: Option<BestSplit> = None;
        for feature in candidates.iter() {
            let mut sorted: Vec<(f64, bool)> =
                rows.iter().map(|&i| (self.x[[i, feature]], self.y[i])).collect();
            sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_pos = 0;
            for k in 1..n {
                if sorted[k - 1].1 {
                    left_pos += 1;
                }
                if sorted[k - 1].0 == sorted[k].0 || k < min_leaf || n - k < min_leaf {
                    continue;
                }
                let weighted = (k as f64 * gini(left_pos, k)
                    + (n - k) as f64 * gini(pos - left_pos, n - k))
                    / n as f64;
                let decrease = parent - weighted;
                if decrease > best.as_ref().map_or(0.0, |b| b.decrease) {
                    best = Some(BestSplit {
                        feature,
                        threshold: (sorted[k - 1].0 + sorted[k].0) / 2.0,
                        decrease,
                    });
                }
            }
        }
        best
    }
}

impl DecisionTree {
    fn predict_proba(&self, row: ArrayView1<f64>) -> f64 {
        let mut node = 0;
        loop {
            match &self.nodes[node] {
                Node::Leaf { proba } => return *proba,
                Node::Split { feature, threshold, left, right } => {
                    node = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

// ============================================================================
// FOREST
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    pub params: ForestParams,
    pub n_features: usize,
    /// Normalised mean impurity decrease per feature
    pub feature_importances: Vec<f64>,
    trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Fit on an already-scaled matrix with boolean labels
    pub fn fit(x: &Array2<f64>, y: &[bool], params: ForestParams) -> EngineResult<Self> {
        let n_rows = x.nrows();
        if n_rows == 0 || x.ncols() == 0 {
            return Err(EngineError::InsufficientData { required: 1, actual: n_rows });
        }
        if y.len() != n_rows {
            return Err(EngineError::InvalidConfig(format!(
                "label count {} does not match row count {}",
                y.len(),
                n_rows
            )));
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut builder = TreeBuilder {
            x,
            y,
            params: &params,
            n_try: params.max_features.resolve(x.ncols()),
            n_total: n_rows as f64,
            importances: vec![0.0; x.ncols()],
        };

        let mut trees = Vec::with_capacity(params.n_estimators);
        for _ in 0..params.n_estimators.max(1) {
            let bootstrap: Vec<usize> = (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect();
            let mut tree = DecisionTree { nodes: Vec::new() };
            builder.grow(&mut tree, bootstrap, 0, &mut rng);
            trees.push(tree);
        }

        let mut importances = builder.importances;
        let total: f64 = importances.iter().sum();
        if total > 0.0 {
            importances.iter_mut().for_each(|v| *v /= total);
        }

        Ok(Self {
            n_features: x.ncols(),
            feature_importances: importances,
            trees,
            params,
        })
    }

    fn proba_view(&self, row: ArrayView1<f64>) -> f64 {
        self.trees.iter().map(|t| t.predict_proba(row)).sum::<f64>() / self.trees.len() as f64
    }

    /// Failure probability per row
    pub fn predict_proba(&self, x: &Array2<f64>) -> Vec<f64> {
        x.rows().into_iter().map(|row| self.proba_view(row)).collect()
    }

    pub fn predict(&self, x: &Array2<f64>) -> Vec<bool> {
        self.predict_proba(x).into_iter().map(|p| p > 0.5).collect()
    }

    pub fn predict_row(&self, row: &[f64]) -> bool {
        self.proba_view(ArrayView1::from(row)) > 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Label = first feature above 0.5; second feature is noise
    fn separable(n: usize) -> (Array2<f64>, Vec<bool>) {
        let mut data = Vec::new();
        let mut y = Vec::new();
        for i in 0..n {
            let a = i as f64 / n as f64;
            let b = ((i * 7919) % 101) as f64 / 101.0;
            data.push(a);
            data.push(b);
            y.push(a > 0.5);
        }
        (Array2::from_shape_vec((n, 2), data).unwrap(), y)
    }

    #[test]
    fn test_max_features_resolve() {
        assert_eq!(MaxFeatures::Sqrt.resolve(46), 6);
        assert_eq!(MaxFeatures::Log2.resolve(46), 5);
        assert_eq!(MaxFeatures::Sqrt.resolve(1), 1);
    }

    #[test]
    fn test_learns_separable_labels() {
        let (x, y) = separable(200);
        let params = ForestParams { n_estimators: 25, ..Default::default() };
        let forest = RandomForest::fit(&x, &y, params).unwrap();
        let predicted = forest.predict(&x);
        let correct = predicted.iter().zip(&y).filter(|(p, t)| p == t).count();
        assert!(correct >= 195, "correct {}", correct);
    }

    #[test]
    fn test_importance_favours_signal() {
        let (x, y) = separable(200);
        let params = ForestParams { n_estimators: 25, ..Default::default() };
        let forest = RandomForest::fit(&x, &y, params).unwrap();
        let imp = &forest.feature_importances;
        assert!(imp[0] > imp[1]);
        assert!((imp.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_seeded_fit_is_reproducible() {
        let (x, y) = separable(80);
        let params = ForestParams { n_estimators: 10, ..Default::default() };
        let a = RandomForest::fit(&x, &y, params.clone()).unwrap();
        let b = RandomForest::fit(&x, &y, params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_label_length_mismatch() {
        let (x, _) = separable(10);
        assert!(RandomForest::fit(&x, &[true], ForestParams::default()).is_err());
    }
}
