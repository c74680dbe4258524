//! Logic Module - Business Logic & Engines
//!
//! - `features/` - Feature engineering (rolling stats, deltas, interactions)
//! - `labels` - Failure label rules
//! - `model/` - Scaler, isolation forest, random forest, artifacts
//! - `risk/` - Risk classification and recommendations
//! - `store/` - Telemetry, experiment tracking and registry contracts
//! - `lifecycle/` - Per-entity model cache and serving
//! - `training/` - Training orchestrator and hyperparameter search
//! - `evaluation/` - Run ranking and promotion

pub mod features;
pub mod labels;
pub mod model;
pub mod risk;
pub mod store;

pub mod lifecycle;
pub mod training;
pub mod evaluation;
