//! Trained artifacts and their persisted shapes

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;

use super::anomaly::AnomalyModel;
use super::forest::RandomForest;
use super::isolation_forest::IsolationForest;
use super::scaler::StandardScaler;

/// Half-open time range `[start, end)` a model was trained on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TrainingWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Window ending now
    pub fn trailing(duration: Duration) -> Self {
        let end = Utc::now();
        Self { start: end - duration, end }
    }

    pub fn last_hours(hours: i64) -> Self {
        Self::trailing(Duration::hours(hours))
    }

    pub fn last_days(days: i64) -> Self {
        Self::trailing(Duration::days(days))
    }

    pub fn last_minutes(minutes: i64) -> Self {
        Self::trailing(Duration::minutes(minutes))
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

/// Per-entity serving artifact. Never mutated; retraining builds a new one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedArtifact {
    pub model: AnomalyModel,
    pub trained_at: DateTime<Utc>,
    pub training_window: TrainingWindow,
    pub feature_schema_hash: String,
    pub n_rows: usize,
}

impl TrainedArtifact {
    pub fn new(model: AnomalyModel, training_window: TrainingWindow, n_rows: usize) -> Self {
        Self {
            feature_schema_hash: model.schema.hash.clone(),
            model,
            trained_at: Utc::now(),
            training_window,
            n_rows,
        }
    }
}

/// Any fitted estimator, as stored in the `model` artifact of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "algorithm", rename_all = "snake_case")]
pub enum TrainedModel {
    IsolationForest(IsolationForest),
    RandomForest(RandomForest),
}

impl TrainedModel {
    pub fn algorithm(&self) -> &'static str {
        match self {
            TrainedModel::IsolationForest(_) => "isolation_forest",
            TrainedModel::RandomForest(_) => "random_forest",
        }
    }

    pub fn n_features(&self) -> usize {
        match self {
            TrainedModel::IsolationForest(m) => m.n_features,
            TrainedModel::RandomForest(m) => m.n_features,
        }
    }

    /// Failure prediction for one scaled row. For the isolation forest an
    /// anomaly counts as a predicted failure.
    pub fn predict_row(&self, scaled: &[f64]) -> bool {
        match self {
            TrainedModel::IsolationForest(m) => m.is_anomaly(m.score_row(scaled)),
            TrainedModel::RandomForest(m) => m.predict_row(scaled),
        }
    }

    pub fn to_blob(&self) -> EngineResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_blob(blob: &[u8]) -> EngineResult<Self> {
        Ok(serde_json::from_slice(blob)?)
    }
}

impl StandardScaler {
    pub fn to_blob(&self) -> EngineResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_blob(blob: &[u8]) -> EngineResult<Self> {
        Ok(serde_json::from_slice(blob)?)
    }
}
