//! Risk Types
//!
//! Data structures only; no classification logic here.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::rules::{
    RECOMMENDATION_CRITICAL, RECOMMENDATION_HIGH, RECOMMENDATION_LOW, RECOMMENDATION_MEDIUM,
    RECOMMENDATION_UNKNOWN,
};

// ============================================================================
// RISK LEVEL
// ============================================================================

/// Ordinal maintenance risk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
    /// No data to assess
    Unknown,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
            RiskLevel::Unknown => "UNKNOWN",
        }
    }

    /// Fixed recommendation for this level
    pub fn recommendation(&self) -> &'static str {
        match self {
            RiskLevel::Low => RECOMMENDATION_LOW,
            RiskLevel::Medium => RECOMMENDATION_MEDIUM,
            RiskLevel::High => RECOMMENDATION_HIGH,
            RiskLevel::Critical => RECOMMENDATION_CRITICAL,
            RiskLevel::Unknown => RECOMMENDATION_UNKNOWN,
        }
    }

    /// Sort key for reports (Unknown sorts below Low)
    pub fn severity(&self) -> u8 {
        match self {
            RiskLevel::Unknown => 0,
            RiskLevel::Low => 1,
            RiskLevel::Medium => 2,
            RiskLevel::High => 3,
            RiskLevel::Critical => 4,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl PartialEq<&str> for RiskLevel {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

// ============================================================================
// ASSESSMENT
// ============================================================================

/// Ephemeral per-entity verdict; never persisted by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    pub is_anomaly: bool,
    pub anomaly_score: f64,
    pub risk_level: RiskLevel,
    pub recommendation: String,
    /// Latest observed raw values
    pub current_metrics: BTreeMap<String, f64>,
}

impl RiskAssessment {
    /// Nothing to score
    pub fn unknown(entity_id: &str) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            timestamp: Utc::now(),
            is_anomaly: false,
            anomaly_score: 0.0,
            risk_level: RiskLevel::Unknown,
            recommendation: RiskLevel::Unknown.recommendation().to_string(),
            current_metrics: BTreeMap::new(),
        }
    }
}
