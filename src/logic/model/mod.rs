//! Model Module - Estimators and trained artifacts
//!
//! Scaling, the unsupervised isolation forest used for serving, the
//! supervised random forest used as a training candidate, and the
//! artifact shapes that carry them between components.

pub mod scaler;
pub mod isolation_forest;
pub mod forest;
pub mod metrics;
pub mod anomaly;
pub mod artifact;

// Re-export common types
pub use scaler::StandardScaler;
pub use isolation_forest::{IsolationForest, IsolationForestParams};
pub use forest::{ForestParams, MaxFeatures, RandomForest};
pub use metrics::{f1_score, ClassificationReport, ConfusionMatrix};
pub use anomaly::{AnomalyConfig, AnomalyModel, AnomalyScore};
pub use artifact::{TrainedArtifact, TrainedModel, TrainingWindow};
