//! Lifecycle manager tests: lazy training, state transitions, caching and
//! the end-to-end serving scenarios.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration as StdDuration;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use super::*;
use crate::error::EngineError;
use crate::logic::features::{FeatureConfig, FeatureEngine, Reading};
use crate::logic::model::TrainingWindow;
use crate::logic::risk::{RiskLevel, RECOMMENDATION_CRITICAL};
use crate::logic::store::{InMemoryTelemetryStore, StoreError, StoreResult, TelemetryStore};

/// `n` samples ending one minute ago, spaced so that 150 span a week.
/// Temperature stays below 210 and vibration below 2.5 unless `spike`
/// puts vibration at 2.8 on the most recent sample.
fn machine_history(entity: &str, n: i64, spike: bool) -> Vec<Reading> {
    let latest = Utc::now() - Duration::minutes(1);
    let spacing = Duration::minutes(67);
    let mut readings = Vec::new();
    for i in 0..n {
        let ts: DateTime<Utc> = latest - spacing * (n - 1 - i) as i32;
        let is_last = i == n - 1;
        let vibration = if spike && is_last { 2.8 } else { 1.0 + (i % 5) as f64 * 0.1 };
        readings.push(Reading::new(entity, ts, "temperature", 180.0 + (i % 11) as f64));
        readings.push(Reading::new(entity, ts, "vibration", vibration));
        readings.push(Reading::new(entity, ts, "spindle_speed", 1500.0 + (i % 3) as f64 * 10.0));
        readings.push(Reading::new(entity, ts, "power_consumption", 15.0 + (i % 4) as f64));
    }
    readings
}

fn manager_with(store: Arc<dyn TelemetryStore>, config: LifecycleConfig) -> LifecycleManager {
    let engine = FeatureEngine::new(FeatureConfig::default()).unwrap();
    LifecycleManager::new(config, engine, store)
}

fn manager(readings: Vec<Reading>) -> LifecycleManager {
    let store = Arc::new(InMemoryTelemetryStore::with_readings(readings));
    manager_with(store, LifecycleConfig::default())
}

fn week() -> TrainingWindow {
    TrainingWindow::last_hours(168)
}

/// Counts `fetch` calls and delegates
struct CountingStore {
    inner: InMemoryTelemetryStore,
    fetches: AtomicUsize,
}

impl TelemetryStore for CountingStore {
    fn fetch(&self, entity_id: &str, window: &TrainingWindow) -> StoreResult<Vec<Reading>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(entity_id, window)
    }

    fn list_entities(&self) -> StoreResult<BTreeSet<String>> {
        self.inner.list_entities()
    }
}

struct DownStore;

impl TelemetryStore for DownStore {
    fn fetch(&self, _: &str, _: &TrainingWindow) -> StoreResult<Vec<Reading>> {
        Err(StoreError::Unavailable {
            service: "telemetry store",
            reason: "connection refused".to_string(),
        })
    }

    fn list_entities(&self) -> StoreResult<BTreeSet<String>> {
        Err(StoreError::Unavailable {
            service: "telemetry store",
            reason: "connection refused".to_string(),
        })
    }
}

/// Lists its entities but every fetch fails
struct FetchDownStore;

impl TelemetryStore for FetchDownStore {
    fn fetch(&self, _: &str, _: &TrainingWindow) -> StoreResult<Vec<Reading>> {
        Err(StoreError::Unavailable {
            service: "telemetry store",
            reason: "read timeout".to_string(),
        })
    }

    fn list_entities(&self) -> StoreResult<BTreeSet<String>> {
        Ok(BTreeSet::from(["M-01".to_string(), "M-02".to_string()]))
    }
}

/// Slow fetches that record how many run at the same time
struct OverlapStore {
    inner: InMemoryTelemetryStore,
    active: AtomicUsize,
    max_active: AtomicUsize,
    fetches: AtomicUsize,
}

impl OverlapStore {
    fn new(readings: Vec<Reading>) -> Self {
        Self {
            inner: InMemoryTelemetryStore::with_readings(readings),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }
}

impl TelemetryStore for OverlapStore {
    fn fetch(&self, entity_id: &str, window: &TrainingWindow) -> StoreResult<Vec<Reading>> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        self.fetches.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(StdDuration::from_millis(20));
        let result = self.inner.fetch(entity_id, window);
        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn list_entities(&self) -> StoreResult<BTreeSet<String>> {
        self.inner.list_entities()
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[test]
fn test_threshold_breach_is_critical_after_training() {
    let mgr = manager(machine_history("M-01", 150, true));

    let artifact = mgr.train("M-01", week()).unwrap();
    assert_eq!(artifact.n_rows, 150);
    assert_eq!(mgr.status("M-01"), ModelStatus::Ready);

    let assessment = mgr.predict("M-01");
    assert_eq!(assessment.risk_level, RiskLevel::Critical);
    assert_eq!(assessment.recommendation, RECOMMENDATION_CRITICAL);
    assert_eq!(assessment.current_metrics.get("vibration"), Some(&2.8));
}

#[test]
fn test_unknown_entity_is_unknown_without_error() {
    let mgr = manager(machine_history("M-01", 150, false));

    let assessment = mgr.predict("M-99");
    assert_eq!(assessment.risk_level, "UNKNOWN");
    assert_eq!(assessment.entity_id, "M-99");
    assert!(mgr.try_predict("M-99").is_none());
    assert_eq!(mgr.status("M-99"), ModelStatus::NoModel);
    assert!(!mgr.cached_entities().contains(&"M-99".to_string()));
}

// ============================================================================
// TRAINING GUARD & STATE MACHINE
// ============================================================================

#[test]
fn test_insufficient_data_leaves_no_artifact() {
    let mgr = manager(machine_history("M-01", 99, false));
    let result = mgr.train("M-01", week());
    assert!(matches!(
        result,
        Err(EngineError::InsufficientData { required: 100, actual: 99 })
    ));
    assert!(mgr.artifact("M-01").is_none());
    assert_eq!(mgr.status("M-01"), ModelStatus::NoModel);
}

#[test]
fn test_exactly_minimum_rows_trains() {
    let mgr = manager(machine_history("M-01", 100, false));
    assert!(mgr.train("M-01", week()).is_ok());
    assert!(mgr.artifact("M-01").is_some());
}

#[test]
fn test_lazy_training_on_first_predict() {
    let mgr = manager(machine_history("M-01", 120, false));
    assert_eq!(mgr.status("M-01"), ModelStatus::NoModel);

    let assessment = mgr.try_predict("M-01").unwrap();
    assert_ne!(assessment.risk_level, RiskLevel::Unknown);
    assert_eq!(mgr.status("M-01"), ModelStatus::Ready);
}

#[test]
fn test_failed_retrain_discards_previous_artifact() {
    let mgr = manager(machine_history("M-01", 150, false));
    mgr.train("M-01", week()).unwrap();

    let empty = TrainingWindow::new(Utc::now() - Duration::days(400), Utc::now() - Duration::days(399));
    assert!(mgr.train("M-01", empty).is_err());
    assert_eq!(mgr.status("M-01"), ModelStatus::NoModel);
    assert!(mgr.artifact("M-01").is_none());
}

#[test]
fn test_retrain_replaces_artifact() {
    let mgr = manager(machine_history("M-01", 150, false));
    let first = mgr.train("M-01", week()).unwrap();
    let second = mgr.retrain("M-01").unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&mgr.artifact("M-01").unwrap(), &second));
    // The superseded artifact is untouched
    assert_eq!(first.n_rows, 150);
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_concurrent_requests_train_once() {
    let store = Arc::new(CountingStore {
        inner: InMemoryTelemetryStore::with_readings(machine_history("M-01", 150, false)),
        fetches: AtomicUsize::new(0),
    });
    let mgr = manager_with(store.clone(), LifecycleConfig::default());

    let artifacts: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..8).map(|_| s.spawn(|| mgr.get_or_train("M-01").unwrap())).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(store.fetches.load(Ordering::SeqCst), 1);
    assert!(artifacts.iter().all(|a| Arc::ptr_eq(a, &artifacts[0])));
}

#[test]
fn test_failed_lazy_training_reports_no_model() {
    let store = Arc::new(CountingStore {
        inner: InMemoryTelemetryStore::with_readings(machine_history("M-01", 10, false)),
        fetches: AtomicUsize::new(0),
    });
    let mgr = manager_with(store.clone(), LifecycleConfig::default());

    let failures = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4).map(|_| s.spawn(|| mgr.get_or_train("M-01").is_err())).collect();
        handles.into_iter().map(|h| h.join().unwrap()).filter(|failed| *failed).count()
    });

    assert_eq!(failures, 4);
    // Callers that arrive after the slot was dropped may train again, but
    // never more often than there were callers
    assert!(store.fetches.load(Ordering::SeqCst) <= 4);
    assert_eq!(mgr.status("M-01"), ModelStatus::NoModel);
}

#[test]
fn test_eviction_during_training_never_overlaps_fits() {
    let store = Arc::new(OverlapStore::new(machine_history("M-01", 120, false)));
    let mgr = manager_with(store.clone(), LifecycleConfig::default());

    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for _ in 0..3 {
                    let _ = mgr.get_or_train("M-01");
                    mgr.evict("M-01");
                }
            });
        }
    });

    assert!(store.fetches.load(Ordering::SeqCst) >= 1);
    assert_eq!(store.max_active.load(Ordering::SeqCst), 1);
}

#[test]
fn test_evict_waits_for_running_fit() {
    let store = Arc::new(OverlapStore::new(machine_history("M-01", 120, false)));
    let mgr = manager_with(store.clone(), LifecycleConfig::default());

    let evicted = std::thread::scope(|s| {
        let trainer = s.spawn(|| mgr.get_or_train("M-01").is_ok());
        while store.fetches.load(Ordering::SeqCst) == 0 {
            std::thread::yield_now();
        }
        let evicted = mgr.evict("M-01");
        assert!(trainer.join().unwrap());
        evicted
    });

    assert!(evicted);
    assert_eq!(mgr.status("M-01"), ModelStatus::NoModel);
    // The next request trains afresh in a registered slot
    mgr.get_or_train("M-01").unwrap();
    assert_eq!(mgr.status("M-01"), ModelStatus::Ready);
    assert_eq!(store.fetches.load(Ordering::SeqCst), 2);
}

// ============================================================================
// CACHE
// ============================================================================

#[test]
fn test_lru_eviction() {
    let mut readings = machine_history("A", 100, false);
    readings.extend(machine_history("B", 100, false));
    readings.extend(machine_history("C", 100, false));
    let store = Arc::new(InMemoryTelemetryStore::with_readings(readings));
    let config = LifecycleConfig {
        max_cached_entities: 2,
        ..Default::default()
    };
    let mgr = manager_with(store, config);

    mgr.train("A", week()).unwrap();
    mgr.train("B", week()).unwrap();
    mgr.get_or_train("A").unwrap(); // touch A
    mgr.train("C", week()).unwrap();

    assert_eq!(mgr.cached_entities(), vec!["A".to_string(), "C".to_string()]);
    assert_eq!(mgr.status("B"), ModelStatus::NoModel);
}

#[test]
fn test_unknown_entity_at_capacity_keeps_models() {
    let mut readings = machine_history("A", 100, false);
    readings.extend(machine_history("B", 100, false));
    let store = Arc::new(InMemoryTelemetryStore::with_readings(readings));
    let config = LifecycleConfig {
        max_cached_entities: 2,
        ..Default::default()
    };
    let mgr = manager_with(store, config);

    mgr.train("A", week()).unwrap();
    mgr.train("B", week()).unwrap();

    assert_eq!(mgr.predict("NOPE").risk_level, RiskLevel::Unknown);
    assert_eq!(mgr.status("A"), ModelStatus::Ready);
    assert_eq!(mgr.status("B"), ModelStatus::Ready);
    assert_eq!(mgr.cached_entities(), vec!["A".to_string(), "B".to_string()]);
}

#[test]
fn test_install_and_evict() {
    let mgr = manager(machine_history("M-01", 150, false));
    let artifact = mgr.train("M-01", week()).unwrap();

    assert!(mgr.evict("M-01"));
    assert!(!mgr.evict("M-01"));
    assert_eq!(mgr.status("M-01"), ModelStatus::NoModel);

    mgr.install("M-02", (*artifact).clone()).unwrap();
    assert_eq!(mgr.status("M-02"), ModelStatus::Ready);

    let mut foreign = (*artifact).clone();
    foreign.feature_schema_hash = "deadbeef".to_string();
    assert!(matches!(
        mgr.install("M-03", foreign),
        Err(EngineError::SchemaMismatch { .. })
    ));
}

// ============================================================================
// ANALYZE ALL
// ============================================================================

#[test]
fn test_analyze_all_omits_entities_without_model() {
    let mut readings = machine_history("M-01", 150, true);
    readings.extend(machine_history("M-02", 150, false));
    readings.extend(machine_history("M-03", 10, false));
    let mgr = manager(readings);

    let assessments = mgr.analyze_all().unwrap();
    let ids: Vec<&str> = assessments.iter().map(|a| a.entity_id.as_str()).collect();
    assert_eq!(ids, vec!["M-01", "M-02"]);
    assert_eq!(assessments[0].risk_level, RiskLevel::Critical);
}

#[test]
fn test_upstream_failure_propagates_from_analyze_all() {
    let mgr = manager_with(Arc::new(DownStore), LifecycleConfig::default());
    assert!(matches!(
        mgr.analyze_all(),
        Err(EngineError::UpstreamUnavailable { .. })
    ));
    // Single predictions degrade to UNKNOWN instead
    assert_eq!(mgr.predict("M-01").risk_level, RiskLevel::Unknown);
}

#[test]
fn test_fetch_failure_propagates_from_analyze_all() {
    let mgr = manager_with(Arc::new(FetchDownStore), LifecycleConfig::default());
    assert!(matches!(
        mgr.analyze_all(),
        Err(EngineError::UpstreamUnavailable { .. })
    ));
    assert!(mgr.try_predict("M-01").is_none());
    assert_eq!(mgr.status("M-01"), ModelStatus::NoModel);
}
