//! Evaluator tests: ranking, idempotent promotion and model reconstruction

use std::sync::Arc;

use chrono::{Duration, Utc};

use super::*;
use crate::error::EngineError;
use crate::logic::features::{FeatureConfig, FeatureEngine, Reading};
use crate::logic::labels::LabelRules;
use crate::logic::store::{
    ExperimentTracker, InMemoryRegistry, InMemoryTelemetryStore, InMemoryTracker, ModelRegistry,
    RunRecord, ARTIFACT_MODEL, ARTIFACT_SCALER,
};
use crate::logic::training::{
    IntRange, PipelineConfig, SearchConfig, SearchSpace, TrainingPipeline, TrainingScope,
    ALGORITHM_RANDOM_FOREST,
};

const EXPERIMENT: &str = "eval-experiment";

fn evaluator() -> (ModelEvaluator, Arc<InMemoryTracker>, Arc<InMemoryRegistry>) {
    let tracker = Arc::new(InMemoryTracker::new());
    let registry = Arc::new(InMemoryRegistry::new());
    let config = EvaluatorConfig {
        experiment: EXPERIMENT.to_string(),
        model_name: "pm-model".to_string(),
        metric: "f1".to_string(),
    };
    let evaluator = ModelEvaluator::new(config, tracker.clone(), registry.clone());
    (evaluator, tracker, registry)
}

/// Log a run with opaque blobs; `age` pushes the start time into the past
fn log_run(tracker: &InMemoryTracker, f1: Option<f64>, age: i64, tag: &str) -> RunRecord {
    let mut run = RunRecord::new(EXPERIMENT, ALGORITHM_RANDOM_FOREST).with_tag("name", tag);
    if let Some(f1) = f1 {
        run = run.with_metric("f1", f1);
    }
    run.started_at = Utc::now() - Duration::minutes(age);
    let model = tracker
        .log_artifact(&run.run_id, ARTIFACT_MODEL, format!("model-{}", tag).as_bytes())
        .unwrap();
    let scaler = tracker
        .log_artifact(&run.run_id, ARTIFACT_SCALER, format!("scaler-{}", tag).as_bytes())
        .unwrap();
    run.artifact_refs = vec![model, scaler];
    tracker.log_run(&run).unwrap();
    run
}

// ============================================================================
// RANKING
// ============================================================================

#[test]
fn test_rank_best_f1_first() {
    let (evaluator, tracker, _) = evaluator();
    let low = log_run(&tracker, Some(0.62), 10, "low");
    let high = log_run(&tracker, Some(0.81), 20, "high");

    let ranked = evaluator.rank(EXPERIMENT).unwrap();
    let ids: Vec<&str> = ranked.iter().map(|r| r.run_id.as_str()).collect();
    assert_eq!(ids, vec![high.run_id.as_str(), low.run_id.as_str()]);
}

#[test]
fn test_rank_ties_prefer_most_recent() {
    let (evaluator, tracker, _) = evaluator();
    let older = log_run(&tracker, Some(0.7), 60, "older");
    let newer = log_run(&tracker, Some(0.7), 5, "newer");
    let missing = log_run(&tracker, None, 1, "missing");

    let ranked = evaluator.rank(EXPERIMENT).unwrap();
    assert_eq!(ranked[0].run_id, newer.run_id);
    assert_eq!(ranked[1].run_id, older.run_id);
    assert_eq!(ranked[2].run_id, missing.run_id);
}

#[test]
fn test_rank_empty_experiment() {
    let (evaluator, _, _) = evaluator();
    assert!(evaluator.rank(EXPERIMENT).unwrap().is_empty());
    assert!(evaluator.register_best(EXPERIMENT, "pm-model").unwrap().is_none());
    assert!(evaluator.compare(EXPERIMENT).unwrap().best.is_none());
}

#[test]
fn test_compare_lists_every_run() {
    let (evaluator, tracker, _) = evaluator();
    log_run(&tracker, Some(0.62), 10, "low");
    let high = log_run(&tracker, Some(0.81), 20, "high");

    let comparison = evaluator.compare(EXPERIMENT).unwrap();
    assert_eq!(comparison.rows.len(), 2);
    let best = comparison.best.unwrap();
    assert_eq!(best.run_id, high.run_id);
    assert_eq!(best.f1, Some(0.81));
    assert_eq!(best.algorithm, ALGORITHM_RANDOM_FOREST);
}

// ============================================================================
// PROMOTION
// ============================================================================

#[test]
fn test_register_best_promotes_highest_f1() {
    let (evaluator, tracker, registry) = evaluator();
    log_run(&tracker, Some(0.62), 10, "low");
    let high = log_run(&tracker, Some(0.81), 20, "high");

    let (best, version) = evaluator.register_best(EXPERIMENT, "pm-model").unwrap().unwrap();
    assert_eq!(best.run_id, high.run_id);
    assert_eq!(version.version, 1);
    assert_eq!(version.source_run.as_deref(), Some(high.run_id.as_str()));

    let stored = registry.get("pm-model", 1).unwrap().unwrap();
    assert_eq!(stored.model_blob, b"model-high".to_vec());
    assert_eq!(stored.scaler_blob, b"scaler-high".to_vec());
}

#[test]
fn test_promote_twice_keeps_single_version() {
    let (evaluator, tracker, registry) = evaluator();
    let run = log_run(&tracker, Some(0.81), 0, "only");

    let first = evaluator.promote(&run, "pm-model").unwrap();
    let second = evaluator.promote(&run, "pm-model").unwrap();
    assert_eq!(first, second);
    assert_eq!(registry.list_versions("pm-model").unwrap().len(), 1);
}

#[test]
fn test_promotion_leaves_runs_untouched() {
    let (evaluator, tracker, _) = evaluator();
    let run = log_run(&tracker, Some(0.81), 0, "only");
    let before = tracker.list_runs(EXPERIMENT).unwrap();

    evaluator.register_best(EXPERIMENT, "pm-model").unwrap();
    assert_eq!(tracker.list_runs(EXPERIMENT).unwrap(), before);
    assert_eq!(tracker.get_run(&run.run_id).unwrap(), run);
}

#[test]
fn test_promote_without_artifacts_fails() {
    let (evaluator, tracker, registry) = evaluator();
    let run = RunRecord::new(EXPERIMENT, ALGORITHM_RANDOM_FOREST).with_metric("f1", 0.9);
    tracker.log_run(&run).unwrap();

    assert!(matches!(
        evaluator.promote(&run, "pm-model"),
        Err(EngineError::ArtifactNotFound { .. })
    ));
    assert!(registry.list_versions("pm-model").unwrap().is_empty());
}

// ============================================================================
// LOAD & EVALUATE
// ============================================================================

fn overheating_history(entity: &str, n: i64) -> Vec<Reading> {
    let latest = Utc::now() - Duration::minutes(1);
    let mut readings = Vec::new();
    for i in 0..n {
        let ts = latest - Duration::minutes(60 * (n - 1 - i));
        let temperature = if i % 8 == 0 { 220.0 } else { 180.0 + (i % 13) as f64 };
        readings.push(Reading::new(entity, ts, "temperature", temperature));
        readings.push(Reading::new(entity, ts, "vibration", 1.0 + (i % 6) as f64 * 0.1));
        readings.push(Reading::new(entity, ts, "spindle_speed", 1400.0 + (i % 4) as f64 * 25.0));
        readings.push(Reading::new(entity, ts, "power_consumption", 14.0 + (i % 5) as f64));
    }
    readings
}

#[test]
fn test_load_and_evaluate_logged_classifier() {
    let readings = overheating_history("M-01", 160);
    let engine = FeatureEngine::new(FeatureConfig::default()).unwrap();
    let table = engine.engineer("M-01", &readings);
    let labels = LabelRules::default().label_table(&table);

    let (evaluator, tracker, _) = evaluator();
    let config = PipelineConfig {
        experiment: EXPERIMENT.to_string(),
        search: SearchConfig {
            n_trials: 2,
            space: SearchSpace {
                n_estimators: IntRange::new(10, 20),
                ..SearchSpace::default()
            },
            ..SearchConfig::default()
        },
        ..PipelineConfig::default()
    };
    let store = Arc::new(InMemoryTelemetryStore::with_readings(readings));
    let pipeline = TrainingPipeline::new(config, engine, store, tracker.clone());
    pipeline.run(TrainingScope::Entity("M-01".to_string())).unwrap();

    let rf = evaluator
        .rank(EXPERIMENT)
        .unwrap()
        .into_iter()
        .find(|r| r.algorithm == ALGORITHM_RANDOM_FOREST)
        .unwrap();

    let loaded = evaluator.load(&rf.run_id).unwrap();
    assert_eq!(loaded.model.algorithm(), ALGORITHM_RANDOM_FOREST);
    assert_eq!(loaded.schema.as_ref(), Some(&table.schema));

    let report = evaluator.evaluate(&rf.run_id, &table, &labels).unwrap();
    assert_eq!(report.confusion.total(), table.len());
    assert!(report.f1 > 0.8);
}

#[test]
fn test_evaluate_rejects_label_count_mismatch() {
    let readings = overheating_history("M-01", 20);
    let engine = FeatureEngine::new(FeatureConfig::default()).unwrap();
    let table = engine.engineer("M-01", &readings);
    let labels = vec![false; table.len() - 1];

    let (evaluator, tracker, _) = evaluator();
    let run = log_run(&tracker, Some(0.5), 0, "any");
    assert!(matches!(
        evaluator.evaluate(&run.run_id, &table, &labels),
        Err(EngineError::InvalidConfig(_))
    ));
}

#[test]
fn test_load_unknown_run() {
    let (evaluator, _, _) = evaluator();
    assert!(matches!(evaluator.load("nope"), Err(EngineError::RunNotFound(_))));
}
