//! Collaborator implementation tests

use chrono::{Duration, Utc};
use tempfile::TempDir;

use super::*;
use crate::logic::features::Reading;
use crate::logic::model::TrainingWindow;

fn sample_readings() -> Vec<Reading> {
    let now = Utc::now();
    vec![
        Reading::new("M-02", now - Duration::minutes(5), "temperature", 190.0),
        Reading::new("M-01", now - Duration::minutes(1), "temperature", 185.0),
        Reading::new("M-01", now - Duration::minutes(3), "vibration", 1.1),
        Reading::new("M-01", now - Duration::days(10), "temperature", 170.0),
    ]
}

// ============================================================================
// TELEMETRY
// ============================================================================

#[test]
fn test_in_memory_fetch_filters_and_orders() {
    let store = InMemoryTelemetryStore::with_readings(sample_readings());
    let readings = store.fetch("M-01", &TrainingWindow::last_hours(1)).unwrap();
    assert_eq!(readings.len(), 2);
    assert!(readings[0].timestamp < readings[1].timestamp);
    assert!(readings.iter().all(|r| r.entity_id == "M-01"));

    let entities = store.list_entities().unwrap();
    assert_eq!(entities.into_iter().collect::<Vec<_>>(), vec!["M-01", "M-02"]);
    assert_eq!(store.fetch_all(&TrainingWindow::last_hours(1)).unwrap().len(), 3);
}

#[test]
fn test_jsonl_store_roundtrip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("telemetry.jsonl");
    let store = JsonlTelemetryStore::write(&path, &sample_readings()).unwrap();

    assert_eq!(store.fetch("M-01", &TrainingWindow::last_days(30)).unwrap().len(), 3);
    assert_eq!(store.fetch("M-03", &TrainingWindow::last_days(30)).unwrap().len(), 0);
    assert_eq!(store.list_entities().unwrap().len(), 2);
}

#[test]
fn test_jsonl_missing_file_is_unavailable() {
    let dir = TempDir::new().unwrap();
    let result = JsonlTelemetryStore::open(&dir.path().join("nope.jsonl"));
    assert!(matches!(result, Err(StoreError::Unavailable { .. })));
}

// ============================================================================
// TRACKER
// ============================================================================

fn exercise_tracker(tracker: &dyn ExperimentTracker) {
    let mut run = RunRecord::new("exp", "isolation_forest")
        .with_param("contamination", 0.1)
        .with_metric("anomaly_rate", 0.1);
    let model_ref = tracker.log_artifact(&run.run_id, ARTIFACT_MODEL, b"model-bytes").unwrap();
    run.artifact_refs.push(model_ref.clone());
    tracker.log_run(&run).unwrap();
    tracker.log_run(&RunRecord::new("other", "random_forest")).unwrap();

    let runs = tracker.list_runs("exp").unwrap();
    assert_eq!(runs, vec![run.clone()]);
    assert_eq!(tracker.get_run(&run.run_id).unwrap().hyperparameters["contamination"], "0.1");
    assert_eq!(model_ref.size, 11);
    assert_eq!(model_ref.digest, digest(&[b"model-bytes".as_slice()]));

    assert_eq!(tracker.load_artifact(&run.run_id, ARTIFACT_MODEL).unwrap(), b"model-bytes");
    assert!(matches!(
        tracker.load_artifact(&run.run_id, ARTIFACT_SCALER),
        Err(StoreError::ArtifactNotFound { .. })
    ));
    assert!(matches!(tracker.get_run("missing"), Err(StoreError::RunNotFound(_))));
}

#[test]
fn test_in_memory_tracker() {
    exercise_tracker(&InMemoryTracker::new());
}

#[test]
fn test_json_file_tracker() {
    let dir = TempDir::new().unwrap();
    let tracker = JsonFileTracker::open(dir.path()).unwrap();
    exercise_tracker(&tracker);

    // Survives reopening
    let reopened = JsonFileTracker::open(dir.path()).unwrap();
    assert_eq!(reopened.list_runs("exp").unwrap().len(), 1);
}

#[test]
fn test_json_file_tracker_rejects_path_escape() {
    let dir = TempDir::new().unwrap();
    let tracker = JsonFileTracker::open(dir.path()).unwrap();
    assert!(tracker.log_artifact("../evil", "model", b"x").is_err());
    assert!(matches!(
        tracker.load_artifact("..", "model"),
        Err(StoreError::ArtifactNotFound { .. })
    ));
}

// ============================================================================
// REGISTRY
// ============================================================================

#[test]
fn test_registry_versions_and_dedup() {
    let registry = InMemoryRegistry::new();
    let v1 = registry.register("pm", b"model-a", b"scaler-a", Some("run-a")).unwrap();
    let v2 = registry.register("pm", b"model-b", b"scaler-b", Some("run-b")).unwrap();
    let again = registry.register("pm", b"model-a", b"scaler-a", Some("run-a")).unwrap();

    assert_eq!(v1.version, 1);
    assert_eq!(v2.version, 2);
    assert_eq!(again, v1);
    assert_eq!(registry.list_versions("pm").unwrap().len(), 2);
    assert_eq!(registry.latest("pm").unwrap().unwrap().version, 2);

    // Versions are per name
    let other = registry.register("other", b"model-a", b"scaler-a", None).unwrap();
    assert_eq!(other.version, 1);

    let stored = registry.get("pm", 2).unwrap().unwrap();
    assert_eq!(stored.model_blob, b"model-b");
    assert!(registry.get("pm", 9).unwrap().is_none());
}
