//! Features Module - Feature Engineering Engine
//!
//! Turns raw telemetry readings into fixed-schema feature rows.
//! The same engine runs at training and serving time, which is what keeps
//! the two feature sets identical.

pub mod layout;
pub mod row;
pub mod engineer;


// Re-export common types
pub use layout::{FeatureConfig, FeatureSchema, InteractionFeature, InteractionKind, FEATURE_VERSION};
pub use row::{stack_tables, FeatureRow, FeatureTable, Reading};
pub use engineer::FeatureEngine;
