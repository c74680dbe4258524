//! Risk Rules & Thresholds
//!
//! Hard safety limits, the strong-anomaly cutoff and the fixed
//! recommendation strings. No classification logic here.

use serde::{Deserialize, Serialize};

use crate::constants::{CRITICAL_TEMPERATURE, CRITICAL_VIBRATION, STRONG_ANOMALY_CUTOFF};
use crate::logic::labels::ThresholdRule;

// ============================================================================
// RECOMMENDATIONS
// ============================================================================

pub const RECOMMENDATION_CRITICAL: &str =
    "IMMEDIATE SHUTDOWN REQUIRED - Schedule emergency maintenance";
pub const RECOMMENDATION_HIGH: &str = "URGENT - Schedule maintenance within 24 hours";
pub const RECOMMENDATION_MEDIUM: &str =
    "CAUTION - Monitor closely, schedule inspection within 1 week";
pub const RECOMMENDATION_LOW: &str = "NOMINAL - Continue normal operation";
pub const RECOMMENDATION_UNKNOWN: &str = "Insufficient data for prediction";

// ============================================================================
// CONFIGURABLE THRESHOLDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    /// Raw physical limits; any breach is CRITICAL
    pub hard_limits: Vec<ThresholdRule>,
    /// Anomalies scoring below this are HIGH rather than MEDIUM
    pub strong_anomaly_cutoff: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            hard_limits: vec![
                ThresholdRule::new("temperature", CRITICAL_TEMPERATURE),
                ThresholdRule::new("vibration", CRITICAL_VIBRATION),
            ],
            strong_anomaly_cutoff: STRONG_ANOMALY_CUTOFF,
        }
    }
}

impl RiskThresholds {
    pub fn with_limit(mut self, metric: &str, threshold: f64) -> Self {
        self.hard_limits.push(ThresholdRule::new(metric, threshold));
        self
    }
}
