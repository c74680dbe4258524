//! Label Rule Engine
//!
//! Derives binary failure labels from raw metric thresholds (supervised
//! training only). A row is a failure iff any rule fires; a metric that is
//! absent on the row never fires.

use serde::{Deserialize, Serialize};

use crate::constants::{CRITICAL_POWER, CRITICAL_TEMPERATURE, CRITICAL_VIBRATION};
use crate::logic::features::{FeatureRow, FeatureTable};

/// `metric > threshold`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub metric: String,
    pub threshold: f64,
}

impl ThresholdRule {
    pub fn new(metric: &str, threshold: f64) -> Self {
        Self {
            metric: metric.to_string(),
            threshold,
        }
    }

    /// Fires only on an observed value strictly above the threshold
    pub fn breached_by(&self, row: &FeatureRow) -> bool {
        match row.raw(&self.metric) {
            Some(value) => value > self.threshold,
            None => false,
        }
    }
}

/// Extensible OR-combined rule set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelRules {
    pub rules: Vec<ThresholdRule>,
}

impl Default for LabelRules {
    fn default() -> Self {
        Self {
            rules: vec![
                ThresholdRule::new("temperature", CRITICAL_TEMPERATURE),
                ThresholdRule::new("vibration", CRITICAL_VIBRATION),
                ThresholdRule::new("power_consumption", CRITICAL_POWER),
            ],
        }
    }
}

impl LabelRules {
    pub fn new(rules: Vec<ThresholdRule>) -> Self {
        Self { rules }
    }

    pub fn with_rule(mut self, metric: &str, threshold: f64) -> Self {
        self.rules.push(ThresholdRule::new(metric, threshold));
        self
    }

    /// Failure label for one row
    pub fn label(&self, row: &FeatureRow) -> bool {
        self.rules.iter().any(|rule| rule.breached_by(row))
    }

    /// Labels for every row of a table, in row order
    pub fn label_table(&self, table: &FeatureTable) -> Vec<bool> {
        table.rows.iter().map(|row| self.label(row)).collect()
    }
}
