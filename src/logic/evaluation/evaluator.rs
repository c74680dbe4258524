//! Model Evaluator / Promoter
//!
//! Ranks logged runs, reconstructs `(model, scaler)` pairs from a run id and
//! promotes the winner into the registry. Run records are only ever read.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};

use crate::constants::{get_experiment_name, get_model_name};
use crate::error::{EngineError, EngineResult};
use crate::logic::features::{FeatureSchema, FeatureTable};
use crate::logic::model::{ClassificationReport, StandardScaler, TrainedModel};
use crate::logic::store::{
    ExperimentTracker, ModelRegistry, ModelVersion, RunRecord, StoreError,
    ARTIFACT_FEATURE_SCHEMA, ARTIFACT_MODEL, ARTIFACT_SCALER,
};

// ============================================================================
// CONFIG & TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    pub experiment: String,
    /// Registry name promoted models are registered under
    pub model_name: String,
    /// Ranking metric; runs without it rank as 0.0
    pub metric: String,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            experiment: get_experiment_name(),
            model_name: get_model_name(),
            metric: "f1".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    pub run_id: String,
    pub algorithm: String,
    pub f1: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub started_at: DateTime<Utc>,
}

impl From<&RunRecord> for ComparisonRow {
    fn from(run: &RunRecord) -> Self {
        Self {
            run_id: run.run_id.clone(),
            algorithm: run.algorithm.clone(),
            f1: run.metric("f1"),
            precision: run.metric("precision"),
            recall: run.metric("recall"),
            started_at: run.started_at,
        }
    }
}

/// Side-by-side view of every run, best first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelComparison {
    pub rows: Vec<ComparisonRow>,
    pub best: Option<ComparisonRow>,
}

/// A model rebuilt from a run's artifacts
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub run: RunRecord,
    pub model: TrainedModel,
    pub scaler: StandardScaler,
    /// Absent for runs logged without a schema artifact
    pub schema: Option<FeatureSchema>,
}

// ============================================================================
// RANKING
// ============================================================================

/// Best-first by `metric` (missing = 0.0), ties broken by most recent start
pub fn rank_runs(mut runs: Vec<RunRecord>, metric: &str) -> Vec<RunRecord> {
    let value = |run: &RunRecord| run.metric(metric).filter(|v| v.is_finite()).unwrap_or(0.0);
    runs.sort_by(|a, b| {
        value(b)
            .partial_cmp(&value(a))
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.started_at.cmp(&a.started_at))
    });
    runs
}

// ============================================================================
// EVALUATOR
// ============================================================================

pub struct ModelEvaluator {
    config: EvaluatorConfig,
    tracker: Arc<dyn ExperimentTracker>,
    registry: Arc<dyn ModelRegistry>,
}

impl ModelEvaluator {
    pub fn new(
        config: EvaluatorConfig,
        tracker: Arc<dyn ExperimentTracker>,
        registry: Arc<dyn ModelRegistry>,
    ) -> Self {
        Self {
            config,
            tracker,
            registry,
        }
    }

    pub fn config(&self) -> &EvaluatorConfig {
        &self.config
    }

    /// Every run of `experiment`, best first
    pub fn rank(&self, experiment: &str) -> EngineResult<Vec<RunRecord>> {
        let runs = self.tracker.list_runs(experiment)?;
        Ok(rank_runs(runs, &self.config.metric))
    }

    pub fn compare(&self, experiment: &str) -> EngineResult<ModelComparison> {
        let rows: Vec<ComparisonRow> = self.rank(experiment)?.iter().map(ComparisonRow::from).collect();
        Ok(ModelComparison {
            best: rows.first().cloned(),
            rows,
        })
    }

    /// Register a run's model and scaler. Registering the same run again
    /// returns the existing version.
    pub fn promote(&self, run: &RunRecord, name: &str) -> EngineResult<ModelVersion> {
        let model_blob = self.tracker.load_artifact(&run.run_id, ARTIFACT_MODEL)?;
        let scaler_blob = self.tracker.load_artifact(&run.run_id, ARTIFACT_SCALER)?;
        let version = self
            .registry
            .register(name, &model_blob, &scaler_blob, Some(&run.run_id))?;
        info!(
            "Promoted run {} ({}) as {} v{}",
            run.run_id, run.algorithm, version.name, version.version
        );
        Ok(version)
    }

    /// rank → promote the winner; `None` when the experiment has no runs
    pub fn register_best(&self, experiment: &str, name: &str) -> EngineResult<Option<(RunRecord, ModelVersion)>> {
        let Some(best) = self.rank(experiment)?.into_iter().next() else {
            info!("No runs logged under '{}', nothing to promote", experiment);
            return Ok(None);
        };
        let version = self.promote(&best, name)?;
        Ok(Some((best, version)))
    }

    /// Rebuild the model, scaler and schema logged for `run_id`
    pub fn load(&self, run_id: &str) -> EngineResult<LoadedModel> {
        let run = self.tracker.get_run(run_id)?;
        let model = TrainedModel::from_blob(&self.tracker.load_artifact(run_id, ARTIFACT_MODEL)?)?;
        let scaler = StandardScaler::from_blob(&self.tracker.load_artifact(run_id, ARTIFACT_SCALER)?)?;
        let schema = match self.tracker.load_artifact(run_id, ARTIFACT_FEATURE_SCHEMA) {
            Ok(blob) => Some(serde_json::from_slice(&blob)?),
            Err(StoreError::ArtifactNotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };
        Ok(LoadedModel {
            run,
            model,
            scaler,
            schema,
        })
    }

    /// Classification report of a logged model against a labelled table
    pub fn evaluate(&self, run_id: &str, features: &FeatureTable, labels: &[bool]) -> EngineResult<ClassificationReport> {
        if labels.len() != features.len() {
            return Err(EngineError::InvalidConfig(format!(
                "{} labels for {} feature rows",
                labels.len(),
                features.len()
            )));
        }

        let loaded = self.load(run_id)?;
        if let Some(schema) = &loaded.schema {
            schema.validate(&features.schema.hash)?;
        }

        let x = loaded.scaler.transform(&features.to_matrix());
        let predicted: Vec<bool> = x
            .rows()
            .into_iter()
            .map(|row| loaded.model.predict_row(&row.to_vec()))
            .collect();
        Ok(ClassificationReport::compute(labels, &predicted))
    }
}
