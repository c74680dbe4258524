//! Store Module - Collaborator contracts
//!
//! Read/write contracts for the telemetry store, experiment tracker and
//! model registry, with in-memory and file-backed implementations.
//! The engine only ever talks to the traits.

pub mod telemetry;
pub mod tracking;
pub mod registry;

#[cfg(test)]
mod tests;

use thiserror::Error;

// Re-export common types
pub use telemetry::{InMemoryTelemetryStore, JsonlTelemetryStore, TelemetryStore};
pub use tracking::{ArtifactRef, ExperimentTracker, InMemoryTracker, JsonFileTracker, RunRecord};
pub use registry::{InMemoryRegistry, ModelRegistry, ModelVersion, RegisteredModel};

/// Artifact kinds logged per run
pub const ARTIFACT_MODEL: &str = "model";
pub const ARTIFACT_SCALER: &str = "scaler";
pub const ARTIFACT_FEATURE_SCHEMA: &str = "feature_schema";
pub const ARTIFACT_FEATURE_IMPORTANCE: &str = "feature_importance";

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable or refusing requests
    #[error("{service} unavailable: {reason}")]
    Unavailable { service: &'static str, reason: String },

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("artifact '{kind}' not found for run {run_id}")]
    ArtifactNotFound { run_id: String, kind: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Hex sha256 of one or more blobs, in order
pub fn digest(parts: &[&[u8]]) -> String {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}
