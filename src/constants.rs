//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! Component configs (`FeatureConfig`, `LifecycleConfig`, ...) take their
//! `Default` values from here; `config::EngineConfig::from_env` overrides them.

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// App name (also the data directory name)
pub const APP_NAME: &str = "maintenance-core";

// ============================================
// Feature engineering
// ============================================

/// Metrics tracked by default, in the order operators usually read them
pub const DEFAULT_METRICS: &[&str] = &[
    "temperature",
    "vibration",
    "spindle_speed",
    "power_consumption",
];

/// Short and long rolling windows (in samples)
pub const DEFAULT_WINDOWS: &[usize] = &[5, 30];

// ============================================
// Safety thresholds
// ============================================

/// Temperature ceiling (degrees) - above is a failure / critical reading
pub const CRITICAL_TEMPERATURE: f64 = 210.0;

/// Vibration ceiling (mm/s) - above is a failure / critical reading
pub const CRITICAL_VIBRATION: f64 = 2.5;

/// Power ceiling (kW) - above is labelled as a failure for training
pub const CRITICAL_POWER: f64 = 25.0;

/// Anomaly scores below this are treated as strong anomalies
pub const STRONG_ANOMALY_CUTOFF: f64 = -0.5;

// ============================================
// Model fitting
// ============================================

/// Expected anomalous fraction of training rows
pub const DEFAULT_CONTAMINATION: f64 = 0.1;

/// Trees in the isolation forest
pub const DEFAULT_N_ESTIMATORS: usize = 100;

/// Sub-sample size cap per isolation tree
pub const DEFAULT_MAX_SAMPLES: usize = 256;

/// Seed shared by every estimator and the search
pub const DEFAULT_SEED: u64 = 42;

/// Minimum rows to train one entity's model
pub const MIN_ROWS_PER_ENTITY: usize = 100;

/// Minimum rows for pooled (bulk) training
pub const MIN_ROWS_BULK: usize = 1000;

/// Minimum positive labels before the supervised candidate is fitted
pub const MIN_POSITIVE_LABELS: usize = 10;

// ============================================
// Windows & cache
// ============================================

/// History used for per-entity training (1 week)
pub const DEFAULT_TRAINING_HOURS: i64 = 168;

/// History used for bulk training (30 days)
pub const DEFAULT_BULK_TRAINING_DAYS: i64 = 30;

/// Recent window scored at serving time (30 minutes)
pub const DEFAULT_SERVING_MINUTES: i64 = 30;

/// Per-entity artifacts kept in memory before LRU eviction
pub const DEFAULT_MAX_CACHED_ENTITIES: usize = 1024;

// ============================================
// Hyperparameter search
// ============================================

/// Trials per supervised search
pub const DEFAULT_N_TRIALS: usize = 20;

/// Hold-out fraction used to score each trial
pub const DEFAULT_VALIDATION_FRACTION: f64 = 0.2;

// ============================================
// Tracking
// ============================================

/// Experiment every training run is logged under
pub const DEFAULT_EXPERIMENT: &str = "predictive_maintenance";

/// Registry name for promoted models
pub const DEFAULT_MODEL_NAME: &str = "predictive_maintenance_model";

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Get experiment name from environment or use default
pub fn get_experiment_name() -> String {
    std::env::var("MAINTENANCE_EXPERIMENT")
        .unwrap_or_else(|_| DEFAULT_EXPERIMENT.to_string())
}

/// Get registry model name from environment or use default
pub fn get_model_name() -> String {
    std::env::var("MAINTENANCE_MODEL_NAME")
        .unwrap_or_else(|_| DEFAULT_MODEL_NAME.to_string())
}

/// Get contamination prior from environment or use default
pub fn get_contamination() -> f64 {
    std::env::var("MAINTENANCE_CONTAMINATION")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|c: &f64| *c > 0.0 && *c < 0.5)
        .unwrap_or(DEFAULT_CONTAMINATION)
}

/// Get hyperparameter trial count from environment or use default
pub fn get_n_trials() -> usize {
    std::env::var("MAINTENANCE_N_TRIALS")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|n: &usize| *n > 0)
        .unwrap_or(DEFAULT_N_TRIALS)
}

/// Get cache capacity from environment or use default
pub fn get_max_cached_entities() -> usize {
    std::env::var("MAINTENANCE_MAX_CACHED_ENTITIES")
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|n: &usize| *n > 0)
        .unwrap_or(DEFAULT_MAX_CACHED_ENTITIES)
}

/// Get tracking directory override, if any
pub fn get_tracking_dir() -> Option<std::path::PathBuf> {
    std::env::var("MAINTENANCE_TRACKING_DIR")
        .ok()
        .filter(|s| !s.is_empty())
        .map(std::path::PathBuf::from)
}
