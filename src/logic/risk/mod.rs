//! Risk Module
//!
//! Combines anomaly output with hard physical limits into an ordinal risk
//! level and a maintenance recommendation.
//!
//! ## Structure
//! - `types`: RiskLevel, RiskAssessment
//! - `rules`: hard limits, strong-anomaly cutoff, recommendation strings
//! - `classifier`: classification logic

pub mod types;
pub mod rules;
pub mod classifier;

// Re-export main types for convenience
pub use types::{RiskAssessment, RiskLevel};

pub use rules::{
    RiskThresholds,
    RECOMMENDATION_CRITICAL,
    RECOMMENDATION_HIGH,
    RECOMMENDATION_LOW,
    RECOMMENDATION_MEDIUM,
    RECOMMENDATION_UNKNOWN,
};

pub use classifier::{assess, breached_limits, classify, classify_with_thresholds};
