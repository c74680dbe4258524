//! Error handling

use thiserror::Error;

use crate::logic::store::StoreError;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Too few rows to fit. Recoverable: training simply does not happen.
    #[error("insufficient data: need at least {required} rows, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    /// No model cached and on-demand training failed
    #[error("no model available for entity '{entity_id}'")]
    NoModelAvailable { entity_id: String },

    /// Telemetry store, tracker or registry unreachable
    #[error("{service} unavailable: {reason}")]
    UpstreamUnavailable { service: &'static str, reason: String },

    /// Features produced under a different layout than the model expects
    #[error("feature schema mismatch: expected {expected}, got {actual}")]
    SchemaMismatch { expected: String, actual: String },

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("artifact '{kind}' not found for run {run_id}")]
    ArtifactNotFound { run_id: String, kind: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking task panicked or was cancelled
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Recoverable conditions are reported, never escalated as faults
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::InsufficientData { .. } | EngineError::NoModelAvailable { .. }
        )
    }
}

impl From<tokio::task::JoinError> for EngineError {
    fn from(err: tokio::task::JoinError) -> Self {
        EngineError::Internal(err.to_string())
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable { service, reason } => {
                EngineError::UpstreamUnavailable { service, reason }
            }
            StoreError::RunNotFound(run_id) => EngineError::RunNotFound(run_id),
            StoreError::ArtifactNotFound { run_id, kind } => {
                EngineError::ArtifactNotFound { run_id, kind }
            }
            StoreError::Io(e) => EngineError::Io(e),
            StoreError::Serialization(e) => EngineError::Serialization(e),
        }
    }
}
