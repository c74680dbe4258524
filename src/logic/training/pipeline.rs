//! Training Pipeline
//!
//! fetch → engineer (per entity) → label → fit candidates → log runs.
//!
//! The isolation forest is always attempted. The random forest is only
//! attempted when enough positive labels exist. A fitting failure is
//! recorded against its (entity, algorithm) pair and never aborts the other
//! candidates; an unreachable telemetry store or tracker is propagated.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{info, warn};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::constants::{
    get_experiment_name, DEFAULT_BULK_TRAINING_DAYS, DEFAULT_TRAINING_HOURS, MIN_POSITIVE_LABELS,
};
use crate::error::{EngineError, EngineResult};
use crate::logic::features::{stack_tables, FeatureEngine, FeatureSchema, FeatureTable};
use crate::logic::labels::LabelRules;
use crate::logic::model::{
    AnomalyConfig, AnomalyModel, RandomForest, StandardScaler, TrainedArtifact, TrainedModel,
    TrainingWindow,
};
use crate::logic::store::{
    ExperimentTracker, RunRecord, TelemetryStore, ARTIFACT_FEATURE_IMPORTANCE,
    ARTIFACT_FEATURE_SCHEMA, ARTIFACT_MODEL, ARTIFACT_SCALER,
};

use super::search::{random_search, SearchConfig};

pub const ALGORITHM_ISOLATION_FOREST: &str = "isolation_forest";
pub const ALGORITHM_RANDOM_FOREST: &str = "random_forest";

// ============================================================================
// CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Experiment every run is logged under
    pub experiment: String,
    /// History for `TrainingScope::All`
    pub bulk_training_days: i64,
    /// History for `TrainingScope::Entity`
    pub training_hours: i64,
    /// Pooled training (min 1000 rows)
    pub bulk_anomaly: AnomalyConfig,
    /// Single-entity training (min 100 rows)
    pub entity_anomaly: AnomalyConfig,
    /// Below this many failures the supervised candidate is skipped
    pub min_positive_labels: usize,
    pub labels: LabelRules,
    pub search: SearchConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            experiment: get_experiment_name(),
            bulk_training_days: DEFAULT_BULK_TRAINING_DAYS,
            training_hours: DEFAULT_TRAINING_HOURS,
            bulk_anomaly: AnomalyConfig::bulk(),
            entity_anomaly: AnomalyConfig::default(),
            min_positive_labels: MIN_POSITIVE_LABELS,
            labels: LabelRules::default(),
            search: SearchConfig::default(),
        }
    }
}

// ============================================================================
// REPORT TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingScope {
    /// Pool every entity's rows into one model
    All,
    Entity(String),
}

impl TrainingScope {
    pub fn entity_id(&self) -> Option<&str> {
        match self {
            TrainingScope::All => None,
            TrainingScope::Entity(id) => Some(id),
        }
    }

    pub fn label(&self) -> &str {
        self.entity_id().unwrap_or("all")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CandidateOutcome {
    Trained { run_id: String },
    Skipped { reason: String },
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateReport {
    pub scope: TrainingScope,
    pub algorithm: String,
    pub outcome: CandidateOutcome,
}

/// Fitted output of one trained candidate
#[derive(Debug, Clone)]
pub enum CandidateModel {
    /// Installable into the lifecycle manager
    Anomaly(TrainedArtifact),
    Classifier {
        model: RandomForest,
        scaler: StandardScaler,
        schema: FeatureSchema,
    },
}

#[derive(Debug, Clone)]
pub struct CandidateArtifact {
    pub scope: TrainingScope,
    pub run_id: String,
    pub model: CandidateModel,
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub started_at: DateTime<Utc>,
    pub n_rows: usize,
    pub n_positive: usize,
    pub candidates: Vec<CandidateReport>,
    pub artifacts: Vec<CandidateArtifact>,
}

impl PipelineReport {
    fn empty() -> Self {
        Self {
            started_at: Utc::now(),
            n_rows: 0,
            n_positive: 0,
            candidates: Vec::new(),
            artifacts: Vec::new(),
        }
    }

    fn merge(&mut self, other: PipelineReport) {
        self.n_rows += other.n_rows;
        self.n_positive += other.n_positive;
        self.candidates.extend(other.candidates);
        self.artifacts.extend(other.artifacts);
    }

    pub fn run_ids(&self) -> Vec<&str> {
        self.candidates
            .iter()
            .filter_map(|c| match &c.outcome {
                CandidateOutcome::Trained { run_id } => Some(run_id.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn failures(&self) -> Vec<&CandidateReport> {
        self.candidates
            .iter()
            .filter(|c| matches!(c.outcome, CandidateOutcome::Failed { .. }))
            .collect()
    }

    pub fn outcome(&self, scope: &TrainingScope, algorithm: &str) -> Option<&CandidateOutcome> {
        self.candidates
            .iter()
            .find(|c| &c.scope == scope && c.algorithm == algorithm)
            .map(|c| &c.outcome)
    }

    /// Isolation-forest artifacts per scope, ready for `LifecycleManager::install`
    pub fn anomaly_artifacts(&self) -> impl Iterator<Item = (&TrainingScope, &TrainedArtifact)> {
        self.artifacts.iter().filter_map(|a| match &a.model {
            CandidateModel::Anomaly(artifact) => Some((&a.scope, artifact)),
            CandidateModel::Classifier { .. } => None,
        })
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

pub struct TrainingPipeline {
    config: PipelineConfig,
    engine: FeatureEngine,
    telemetry: Arc<dyn TelemetryStore>,
    tracker: Arc<dyn ExperimentTracker>,
}

/// Rows of one scope after feature engineering and labelling
struct Prepared<'a> {
    scope: &'a TrainingScope,
    window: TrainingWindow,
    schema: FeatureSchema,
    x: Array2<f64>,
    y: Vec<bool>,
}

impl TrainingPipeline {
    pub fn new(
        config: PipelineConfig,
        engine: FeatureEngine,
        telemetry: Arc<dyn TelemetryStore>,
        tracker: Arc<dyn ExperimentTracker>,
    ) -> Self {
        Self {
            config,
            engine,
            telemetry,
            tracker,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// One orchestration run over `scope`
    pub fn run(&self, scope: TrainingScope) -> EngineResult<PipelineReport> {
        let (window, tables): (TrainingWindow, Vec<FeatureTable>) = match &scope {
            TrainingScope::All => {
                let window = TrainingWindow::last_days(self.config.bulk_training_days);
                let readings = self.telemetry.fetch_all(&window)?;
                (window, self.engine.engineer_batch(&readings).into_values().collect())
            }
            TrainingScope::Entity(id) => {
                let window = TrainingWindow::last_hours(self.config.training_hours);
                let readings = self.telemetry.fetch(id, &window)?;
                (window, vec![self.engine.engineer(id, &readings)])
            }
        };
        self.run_tables(&scope, window, &tables)
    }

    /// Train every entity separately
    pub fn run_per_entity(&self) -> EngineResult<PipelineReport> {
        let entities: Vec<String> = self.telemetry.list_entities()?.into_iter().collect();
        info!("Training {} entities separately", entities.len());

        let reports = entities
            .into_par_iter()
            .map(|id| self.run(TrainingScope::Entity(id)))
            .collect::<EngineResult<Vec<_>>>()?;

        let mut merged = PipelineReport::empty();
        for report in reports {
            merged.merge(report);
        }
        Ok(merged)
    }

    fn run_tables(
        &self,
        scope: &TrainingScope,
        window: TrainingWindow,
        tables: &[FeatureTable],
    ) -> EngineResult<PipelineReport> {
        let schema = self.engine.schema().clone();
        let (x, rows) = stack_tables(tables, &schema);
        let y: Vec<bool> = rows.iter().map(|row| self.config.labels.label(row)).collect();
        let n_positive = y.iter().filter(|l| **l).count();

        info!(
            "Training scope '{}': {} rows, {} features, {} failures labelled",
            scope.label(),
            x.nrows(),
            schema.len(),
            n_positive
        );

        let mut report = PipelineReport {
            n_rows: x.nrows(),
            n_positive,
            ..PipelineReport::empty()
        };
        let prepared = Prepared { scope, window, schema, x, y };

        // Unsupervised candidate, always attempted
        let outcome = self.train_isolation_forest(&prepared);
        self.record(&mut report, scope, ALGORITHM_ISOLATION_FOREST, outcome)?;

        // Supervised candidate, only with enough positives
        if n_positive < self.config.min_positive_labels {
            let reason = format!(
                "{} positive labels, need at least {}",
                n_positive, self.config.min_positive_labels
            );
            info!("Skipping {} for '{}': {}", ALGORITHM_RANDOM_FOREST, scope.label(), reason);
            report.candidates.push(CandidateReport {
                scope: scope.clone(),
                algorithm: ALGORITHM_RANDOM_FOREST.to_string(),
                outcome: CandidateOutcome::Skipped { reason },
            });
        } else {
            let outcome = self.train_random_forest(&prepared);
            self.record(&mut report, scope, ALGORITHM_RANDOM_FOREST, outcome)?;
        }

        Ok(report)
    }

    /// Fold one candidate result into the report. Upstream errors escape;
    /// everything else stays with its candidate.
    fn record(
        &self,
        report: &mut PipelineReport,
        scope: &TrainingScope,
        algorithm: &str,
        result: EngineResult<CandidateArtifact>,
    ) -> EngineResult<()> {
        let outcome = match result {
            Ok(artifact) => {
                let run_id = artifact.run_id.clone();
                report.artifacts.push(artifact);
                CandidateOutcome::Trained { run_id }
            }
            Err(e @ EngineError::UpstreamUnavailable { .. }) => return Err(e),
            Err(EngineError::InsufficientData { required, actual }) => {
                info!(
                    "Skipping {} for '{}': {} rows, need {}",
                    algorithm,
                    scope.label(),
                    actual,
                    required
                );
                CandidateOutcome::Skipped {
                    reason: format!("insufficient data: {} rows, need {}", actual, required),
                }
            }
            Err(e) => {
                warn!("{} failed for '{}': {}", algorithm, scope.label(), e);
                CandidateOutcome::Failed { error: e.to_string() }
            }
        };

        report.candidates.push(CandidateReport {
            scope: scope.clone(),
            algorithm: algorithm.to_string(),
            outcome,
        });
        Ok(())
    }

    fn new_run(&self, scope: &TrainingScope, algorithm: &str, p: &Prepared) -> RunRecord {
        RunRecord::new(&self.config.experiment, algorithm)
            .with_tag("scope", scope.label())
            .with_tag("feature_schema_hash", &p.schema.hash)
            .with_param("n_features", p.schema.len())
            .with_param("n_rows", p.x.nrows())
    }

    /// Upload artifacts, then append the run with their refs
    fn log_run(&self, mut run: RunRecord, artifacts: &[(&str, Vec<u8>)]) -> EngineResult<RunRecord> {
        for (kind, blob) in artifacts {
            let artifact_ref = self.tracker.log_artifact(&run.run_id, kind, blob)?;
            run.artifact_refs.push(artifact_ref);
        }
        self.tracker.log_run(&run)?;
        Ok(run)
    }

    fn train_isolation_forest(&self, p: &Prepared) -> EngineResult<CandidateArtifact> {
        let anomaly_config = match p.scope {
            TrainingScope::All => &self.config.bulk_anomaly,
            TrainingScope::Entity(_) => &self.config.entity_anomaly,
        };
        let model = AnomalyModel::fit_matrix(&p.x, p.schema.clone(), anomaly_config)?;

        let scores = model.score_matrix(&p.x);
        let n_anomalies = scores.iter().filter(|s| model.forest.is_anomaly(**s)).count();
        let mean_score = scores.iter().sum::<f64>() / scores.len().max(1) as f64;

        let run = self
            .new_run(p.scope, ALGORITHM_ISOLATION_FOREST, p)
            .with_param("contamination", anomaly_config.contamination)
            .with_param("n_estimators", anomaly_config.n_estimators)
            .with_param("max_samples", model.forest.sample_size)
            .with_metric("n_anomalies", n_anomalies as f64)
            .with_metric("anomaly_rate", n_anomalies as f64 / p.x.nrows() as f64)
            .with_metric("mean_anomaly_score", mean_score);

        let run = self.log_run(
            run,
            &[
                (ARTIFACT_MODEL, TrainedModel::IsolationForest(model.forest.clone()).to_blob()?),
                (ARTIFACT_SCALER, model.scaler.to_blob()?),
                (ARTIFACT_FEATURE_SCHEMA, serde_json::to_vec(&p.schema)?),
            ],
        )?;

        info!(
            "{} for '{}' logged as run {} ({} anomalies)",
            ALGORITHM_ISOLATION_FOREST,
            p.scope.label(),
            run.run_id,
            n_anomalies
        );

        Ok(CandidateArtifact {
            scope: p.scope.clone(),
            run_id: run.run_id,
            model: CandidateModel::Anomaly(TrainedArtifact::new(model, p.window, p.x.nrows())),
        })
    }

    fn train_random_forest(&self, p: &Prepared) -> EngineResult<CandidateArtifact> {
        let search = random_search(&p.x, &p.y, &self.config.search)?;
        let best = &search.best;

        let scaler = StandardScaler::fit(&p.x)?;
        let forest = RandomForest::fit(&scaler.transform(&p.x), &p.y, best.params.clone())?;

        let mut run = self
            .new_run(p.scope, ALGORITHM_RANDOM_FOREST, p)
            .with_metric("precision", best.validation.precision)
            .with_metric("recall", best.validation.recall)
            .with_metric("f1", best.validation.f1)
            .with_metric("best_validation_f1", best.validation.f1)
            .with_metric("n_trials", search.trials.len() as f64)
            .with_param("best_trial", best.number);
        for (key, value) in best.params.to_params() {
            run = run.with_param(&key, value);
        }

        let run = self.log_run(
            run,
            &[
                (ARTIFACT_MODEL, TrainedModel::RandomForest(forest.clone()).to_blob()?),
                (ARTIFACT_SCALER, scaler.to_blob()?),
                (ARTIFACT_FEATURE_SCHEMA, serde_json::to_vec(&p.schema)?),
                (
                    ARTIFACT_FEATURE_IMPORTANCE,
                    feature_importance_report(&p.schema, &forest.feature_importances).into_bytes(),
                ),
            ],
        )?;

        info!(
            "{} for '{}' logged as run {} (validation F1 {:.4} over {} trials)",
            ALGORITHM_RANDOM_FOREST,
            p.scope.label(),
            run.run_id,
            best.validation.f1,
            search.trials.len()
        );

        Ok(CandidateArtifact {
            scope: p.scope.clone(),
            run_id: run.run_id,
            model: CandidateModel::Classifier {
                model: forest,
                scaler,
                schema: p.schema.clone(),
            },
        })
    }
}

/// `name: importance` lines, most important first
pub fn feature_importance_report(schema: &FeatureSchema, importances: &[f64]) -> String {
    let mut ranked: Vec<(&String, f64)> = schema.names.iter().zip(importances.iter().copied()).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .map(|(name, value)| format!("{}: {:.6}\n", name, value))
        .collect()
}
