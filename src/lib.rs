//! Predictive Maintenance Core
//!
//! Anomaly detection and model lifecycle for machine telemetry: feature
//! engineering, per-machine isolation forests, risk classification, batch
//! training with hyperparameter search, and run promotion.

pub mod api;
pub mod config;
pub mod constants;
pub mod error;
pub mod logic;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
