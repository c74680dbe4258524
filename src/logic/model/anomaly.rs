//! Anomaly Model
//!
//! Isolation forest plus the scaler it was fitted with. The scaler is fitted
//! once here and only ever applied afterwards; serving never refits it.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CONTAMINATION, DEFAULT_MAX_SAMPLES, DEFAULT_N_ESTIMATORS, DEFAULT_SEED, MIN_ROWS_BULK,
    MIN_ROWS_PER_ENTITY,
};
use crate::error::{EngineError, EngineResult};
use crate::logic::features::{FeatureRow, FeatureSchema, FeatureTable};

use super::isolation_forest::{IsolationForest, IsolationForestParams};
use super::scaler::StandardScaler;

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// Expected anomalous fraction of the training rows
    pub contamination: f64,
    pub n_estimators: usize,
    pub max_samples: usize,
    pub seed: u64,
    /// Fewer training rows than this is `InsufficientData`
    pub min_rows: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            contamination: DEFAULT_CONTAMINATION,
            n_estimators: DEFAULT_N_ESTIMATORS,
            max_samples: DEFAULT_MAX_SAMPLES,
            seed: DEFAULT_SEED,
            min_rows: MIN_ROWS_PER_ENTITY,
        }
    }
}

impl AnomalyConfig {
    /// Pooled training across all entities
    pub fn bulk() -> Self {
        Self {
            min_rows: MIN_ROWS_BULK,
            ..Self::default()
        }
    }

    pub fn with_contamination(mut self, contamination: f64) -> Self {
        self.contamination = contamination;
        self
    }

    pub fn params(&self) -> IsolationForestParams {
        IsolationForestParams {
            n_estimators: self.n_estimators,
            max_samples: self.max_samples,
            contamination: self.contamination,
            seed: self.seed,
        }
    }
}

// ============================================================================
// MODEL
// ============================================================================

/// Result of scoring one row
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnomalyScore {
    pub is_anomaly: bool,
    /// Lower = more anomalous
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyModel {
    pub forest: IsolationForest,
    pub scaler: StandardScaler,
    pub schema: FeatureSchema,
}

impl AnomalyModel {
    /// Fit on a dense matrix laid out in `schema` order
    pub fn fit_matrix(x: &Array2<f64>, schema: FeatureSchema, config: &AnomalyConfig) -> EngineResult<Self> {
        if x.nrows() < config.min_rows {
            return Err(EngineError::InsufficientData {
                required: config.min_rows,
                actual: x.nrows(),
            });
        }
        if x.ncols() != schema.len() {
            return Err(EngineError::InvalidConfig(format!(
                "matrix has {} columns, schema has {}",
                x.ncols(),
                schema.len()
            )));
        }

        let scaler = StandardScaler::fit(x)?;
        let scaled = scaler.transform(x);
        let forest = IsolationForest::fit(&scaled, config.params())?;

        Ok(Self { forest, scaler, schema })
    }

    /// Fit on one entity's feature table
    pub fn fit(table: &FeatureTable, config: &AnomalyConfig) -> EngineResult<Self> {
        Self::fit_matrix(&table.to_matrix(), table.schema.clone(), config)
    }

    /// Score one row produced under the same schema
    pub fn score(&self, row: &FeatureRow) -> EngineResult<AnomalyScore> {
        self.schema.validate(&row.schema_hash)?;
        let scaled = self.scaler.transform_row(&row.to_vector(&self.schema));
        let score = self.forest.score_row(&scaled);
        Ok(AnomalyScore {
            is_anomaly: self.forest.is_anomaly(score),
            score,
        })
    }

    /// Scores for every row of a scaled-on-the-fly matrix
    pub fn score_matrix(&self, x: &Array2<f64>) -> Vec<f64> {
        self.forest.score_samples(&self.scaler.transform(x))
    }
}
