//! Configuration module

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::{
    get_contamination, get_experiment_name, get_max_cached_entities, get_model_name, get_n_trials,
    DEFAULT_BULK_TRAINING_DAYS, DEFAULT_SERVING_MINUTES, DEFAULT_TRAINING_HOURS,
};
use crate::error::{EngineError, EngineResult};
use crate::logic::evaluation::EvaluatorConfig;
use crate::logic::features::FeatureConfig;
use crate::logic::lifecycle::LifecycleConfig;
use crate::logic::store::tracking::get_default_tracking_dir;
use crate::logic::training::PipelineConfig;

/// Every component config, assembled in one place
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// JSONL telemetry file read by the batch binary
    pub telemetry_path: PathBuf,

    /// Root of the file-backed experiment tracker
    pub tracking_dir: PathBuf,

    pub features: FeatureConfig,
    pub lifecycle: LifecycleConfig,
    pub pipeline: PipelineConfig,
    pub evaluator: EvaluatorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            telemetry_path: PathBuf::from("telemetry.jsonl"),
            tracking_dir: get_default_tracking_dir(),
            features: FeatureConfig::default(),
            lifecycle: LifecycleConfig::default(),
            pipeline: PipelineConfig::default(),
            evaluator: EvaluatorConfig::default(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

impl EngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let contamination = get_contamination();
        let experiment = get_experiment_name();
        let training_hours = env_parse("MAINTENANCE_TRAINING_HOURS")
            .filter(|h: &i64| *h > 0)
            .unwrap_or(DEFAULT_TRAINING_HOURS);

        let mut config = Self::default();

        if let Ok(path) = env::var("MAINTENANCE_TELEMETRY_PATH") {
            config.telemetry_path = PathBuf::from(path);
        }

        config.lifecycle.training_hours = training_hours;
        config.lifecycle.serving_minutes = env_parse("MAINTENANCE_SERVING_MINUTES")
            .filter(|m: &i64| *m > 0)
            .unwrap_or(DEFAULT_SERVING_MINUTES);
        config.lifecycle.max_cached_entities = get_max_cached_entities();
        config.lifecycle.anomaly = config.lifecycle.anomaly.with_contamination(contamination);

        config.pipeline.experiment = experiment.clone();
        config.pipeline.training_hours = training_hours;
        config.pipeline.bulk_training_days = env_parse("MAINTENANCE_BULK_TRAINING_DAYS")
            .filter(|d: &i64| *d > 0)
            .unwrap_or(DEFAULT_BULK_TRAINING_DAYS);
        config.pipeline.bulk_anomaly = config.pipeline.bulk_anomaly.with_contamination(contamination);
        config.pipeline.entity_anomaly = config.pipeline.entity_anomaly.with_contamination(contamination);
        config.pipeline.search.n_trials = get_n_trials();

        config.evaluator.experiment = experiment;
        config.evaluator.model_name = get_model_name();

        config
    }

    /// Reject settings no component can run with
    pub fn validate(&self) -> EngineResult<()> {
        self.features.validate()?;

        let contaminations = [
            self.lifecycle.anomaly.contamination,
            self.pipeline.bulk_anomaly.contamination,
            self.pipeline.entity_anomaly.contamination,
        ];
        if contaminations.iter().any(|c| !(*c > 0.0 && *c <= 0.5)) {
            return Err(EngineError::InvalidConfig(
                "contamination must be in (0, 0.5]".to_string(),
            ));
        }

        let fraction = self.pipeline.search.validation_fraction;
        if !(fraction > 0.0 && fraction < 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "validation fraction {} must be in (0, 1)",
                fraction
            )));
        }

        if self.pipeline.experiment.is_empty() || self.evaluator.model_name.is_empty() {
            return Err(EngineError::InvalidConfig(
                "experiment and model name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
