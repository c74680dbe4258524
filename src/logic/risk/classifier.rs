//! Risk Classifier
//!
//! Logic only. Input: latest feature row + anomaly output.
//! Output: risk level and its recommendation.
//!
//! Precedence (first match wins):
//! 1. no row → UNKNOWN
//! 2. any hard limit breached on a raw value → CRITICAL
//! 3. anomaly with score below the strong cutoff → HIGH
//! 4. anomaly → MEDIUM
//! 5. otherwise → LOW

use crate::logic::features::FeatureRow;
use crate::logic::labels::ThresholdRule;
use crate::logic::model::AnomalyScore;

use super::rules::RiskThresholds;
use super::types::{RiskAssessment, RiskLevel};

// ============================================================================
// MAIN CLASSIFICATION FUNCTION
// ============================================================================

/// Classify with the default thresholds
pub fn classify(row: Option<&FeatureRow>, is_anomaly: bool, anomaly_score: f64) -> RiskLevel {
    classify_with_thresholds(row, is_anomaly, anomaly_score, &RiskThresholds::default())
}

/// Classification with custom thresholds
pub fn classify_with_thresholds(
    row: Option<&FeatureRow>,
    is_anomaly: bool,
    anomaly_score: f64,
    thresholds: &RiskThresholds,
) -> RiskLevel {
    let Some(row) = row else {
        return RiskLevel::Unknown;
    };

    // Raw physical limits dominate any model output
    if !breached_limits(row, thresholds).is_empty() {
        return RiskLevel::Critical;
    }

    match (is_anomaly, anomaly_score < thresholds.strong_anomaly_cutoff) {
        (true, true) => RiskLevel::High,
        (true, false) => RiskLevel::Medium,
        (false, _) => RiskLevel::Low,
    }
}

/// Hard limits breached by the row's observed raw values
pub fn breached_limits<'a>(row: &FeatureRow, thresholds: &'a RiskThresholds) -> Vec<&'a ThresholdRule> {
    thresholds
        .hard_limits
        .iter()
        .filter(|rule| rule.breached_by(row))
        .collect()
}

// ============================================================================
// ASSESSMENT
// ============================================================================

/// Full assessment for one entity. `score` is `None` when no model scored
/// the row; the hard limits still apply.
pub fn assess(
    entity_id: &str,
    row: Option<&FeatureRow>,
    score: Option<AnomalyScore>,
    metrics: &[String],
    thresholds: &RiskThresholds,
) -> RiskAssessment {
    let Some(latest) = row else {
        return RiskAssessment::unknown(entity_id);
    };

    let score = score.unwrap_or(AnomalyScore { is_anomaly: false, score: 0.0 });
    let risk_level = classify_with_thresholds(Some(latest), score.is_anomaly, score.score, thresholds);

    RiskAssessment {
        entity_id: entity_id.to_string(),
        timestamp: latest.timestamp,
        is_anomaly: score.is_anomaly,
        anomaly_score: score.score,
        risk_level,
        recommendation: risk_level.recommendation().to_string(),
        current_metrics: latest.current_metrics(metrics),
    }
}

// ============================================================================
// TESTS
// ============================================================================
