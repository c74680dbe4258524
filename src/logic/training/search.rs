//! Hyperparameter Search
//!
//! Seeded random search over random-forest parameters. Every trial's
//! parameters are drawn up front, trials are fitted in parallel, and the
//! winner is picked from the collected results, so the outcome does not
//! depend on completion order.

use ndarray::{Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_N_TRIALS, DEFAULT_SEED, DEFAULT_VALIDATION_FRACTION};
use crate::error::{EngineError, EngineResult};
use crate::logic::model::{ClassificationReport, ForestParams, MaxFeatures, RandomForest, StandardScaler};

// ============================================================================
// SEARCH SPACE
// ============================================================================

/// Inclusive integer range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntRange {
    pub low: usize,
    pub high: usize,
}

impl IntRange {
    pub const fn new(low: usize, high: usize) -> Self {
        Self { low, high }
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> usize {
        if self.high <= self.low {
            return self.low;
        }
        rng.gen_range(self.low..=self.high)
    }

    pub fn contains(&self, value: usize) -> bool {
        value >= self.low && value <= self.high
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub n_estimators: IntRange,
    pub max_depth: IntRange,
    pub min_samples_split: IntRange,
    pub min_samples_leaf: IntRange,
    pub max_features: Vec<MaxFeatures>,
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self {
            n_estimators: IntRange::new(50, 300),
            max_depth: IntRange::new(3, 20),
            min_samples_split: IntRange::new(2, 20),
            min_samples_leaf: IntRange::new(1, 10),
            max_features: vec![MaxFeatures::Sqrt, MaxFeatures::Log2],
        }
    }
}

impl SearchSpace {
    /// Draw one parameter set; `seed` is the forest's own seed
    pub fn sample<R: Rng>(&self, rng: &mut R, seed: u64) -> ForestParams {
        let max_features = self
            .max_features
            .choose(&mut *rng)
            .copied()
            .unwrap_or(MaxFeatures::Sqrt);
        ForestParams {
            n_estimators: self.n_estimators.sample(rng),
            max_depth: self.max_depth.sample(rng),
            min_samples_split: self.min_samples_split.sample(rng),
            min_samples_leaf: self.min_samples_leaf.sample(rng),
            max_features,
            seed,
        }
    }

    pub fn contains(&self, params: &ForestParams) -> bool {
        self.n_estimators.contains(params.n_estimators)
            && self.max_depth.contains(params.max_depth)
            && self.min_samples_split.contains(params.min_samples_split)
            && self.min_samples_leaf.contains(params.min_samples_leaf)
            && self.max_features.contains(&params.max_features)
    }
}

// ============================================================================
// CONFIG & RESULTS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub n_trials: usize,
    /// Fraction of rows held out to score each trial
    pub validation_fraction: f64,
    pub seed: u64,
    pub space: SearchSpace,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            n_trials: DEFAULT_N_TRIALS,
            validation_fraction: DEFAULT_VALIDATION_FRACTION,
            seed: DEFAULT_SEED,
            space: SearchSpace::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub number: usize,
    pub params: ForestParams,
    pub validation: ClassificationReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// In trial-number order
    pub trials: Vec<Trial>,
    pub best: Trial,
}

// ============================================================================
// SEARCH
// ============================================================================

/// Seeded shuffle split into `(train, validation)` row indices
pub fn train_validation_split(n_rows: usize, validation_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n_rows).collect();
    indices.shuffle(&mut StdRng::seed_from_u64(seed));

    let n_validation = ((n_rows as f64) * validation_fraction.clamp(0.0, 1.0)).ceil() as usize;
    let n_validation = n_validation.clamp(1, n_rows.saturating_sub(1).max(1));
    let validation = indices.split_off(n_rows - n_validation);
    (indices, validation)
}

fn subset(labels: &[bool], indices: &[usize]) -> Vec<bool> {
    indices.iter().map(|&i| labels[i]).collect()
}

/// Random search maximising validation F1. Ties go to the lowest trial number.
pub fn random_search(x: &Array2<f64>, y: &[bool], config: &SearchConfig) -> EngineResult<SearchResult> {
    if x.nrows() < 2 {
        return Err(EngineError::InsufficientData { required: 2, actual: x.nrows() });
    }

    let (train_idx, val_idx) = train_validation_split(x.nrows(), config.validation_fraction, config.seed);
    let x_train_raw = x.select(Axis(0), &train_idx);
    let scaler = StandardScaler::fit(&x_train_raw)?;
    let x_train = scaler.transform(&x_train_raw);
    let x_val = scaler.transform(&x.select(Axis(0), &val_idx));
    let y_train = subset(y, &train_idx);
    let y_val = subset(y, &val_idx);

    let mut rng = StdRng::seed_from_u64(config.seed);
    let candidates: Vec<ForestParams> = (0..config.n_trials.max(1))
        .map(|_| config.space.sample(&mut rng, config.seed))
        .collect();

    let trials = candidates
        .into_par_iter()
        .enumerate()
        .map(|(number, params)| {
            let forest = RandomForest::fit(&x_train, &y_train, params.clone())?;
            let predicted = forest.predict(&x_val);
            Ok(Trial {
                number,
                params,
                validation: ClassificationReport::compute(&y_val, &predicted),
            })
        })
        .collect::<EngineResult<Vec<Trial>>>()?;

    let best = trials
        .iter()
        .fold(None::<&Trial>, |best, trial| match best {
            Some(b) if b.validation.f1 >= trial.validation.f1 => Some(b),
            _ => Some(trial),
        })
        .cloned()
        .ok_or_else(|| EngineError::InvalidConfig("search ran no trials".to_string()))?;

    log::debug!(
        "Search finished: {} trials, best #{} with validation F1 {:.4}",
        trials.len(),
        best.number,
        best.validation.f1
    );

    Ok(SearchResult { trials, best })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dataset(n: usize) -> (Array2<f64>, Vec<bool>) {
        let x = Array2::from_shape_fn((n, 3), |(i, j)| match j {
            0 => (i % 20) as f64,
            1 => ((i * 31) % 7) as f64,
            _ => ((i * 17) % 13) as f64 * 0.5,
        });
        let y = (0..n).map(|i| i % 20 >= 15).collect();
        (x, y)
    }

    fn quick_config() -> SearchConfig {
        SearchConfig {
            n_trials: 4,
            space: SearchSpace {
                n_estimators: IntRange::new(5, 15),
                ..SearchSpace::default()
            },
            ..SearchConfig::default()
        }
    }

    #[test]
    fn test_split_sizes() {
        let (train, val) = train_validation_split(100, 0.2, 42);
        assert_eq!(train.len(), 80);
        assert_eq!(val.len(), 20);
        let mut all: Vec<usize> = train.iter().chain(&val).copied().collect();
        all.sort();
        assert_eq!(all, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_sampled_params_within_space() {
        let space = SearchSpace::default();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            assert!(space.contains(&space.sample(&mut rng, 42)));
        }
    }

    #[test]
    fn test_search_is_deterministic() {
        let (x, y) = dataset(200);
        let a = random_search(&x, &y, &quick_config()).unwrap();
        let b = random_search(&x, &y, &quick_config()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.trials.len(), 4);
        assert!(a.trials.iter().enumerate().all(|(i, t)| t.number == i));
    }

    #[test]
    fn test_best_is_max_f1_lowest_number() {
        let (x, y) = dataset(200);
        let result = random_search(&x, &y, &quick_config()).unwrap();
        let max = result.trials.iter().map(|t| t.validation.f1).fold(f64::MIN, f64::max);
        let first_max = result.trials.iter().find(|t| t.validation.f1 == max).unwrap();
        assert_eq!(result.best.number, first_max.number);
        assert!(result.best.validation.f1 > 0.8);
    }
}
