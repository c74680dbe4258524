//! Feature Layout - Centralized Feature Definition
//!
//! **CRITICAL: This file controls the feature schema**
//!
//! The schema is derived from [`FeatureConfig`] alone, never from the data,
//! so a training batch and a single serving row built under the same config
//! always carry the same feature names in the same order.
//!
//! ## Rules (NEVER break these):
//! 1. Add a feature family → increment FEATURE_VERSION
//! 2. Change naming or order → increment FEATURE_VERSION
//! 3. Remove a feature family → increment FEATURE_VERSION

use std::collections::BTreeSet;

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_METRICS, DEFAULT_WINDOWS};
use crate::error::{EngineError, EngineResult};

// ============================================================================
// FEATURE VERSION
// ============================================================================

/// Current feature layout version
/// MUST be incremented when naming rules change
pub const FEATURE_VERSION: u8 = 1;

/// Rolling statistics emitted per metric and window, in layout order
pub const ROLLING_STATS: &[&str] = &["mean", "std", "max", "min"];

// ============================================================================
// CONFIGURATION
// ============================================================================

/// How two raw metrics are combined into an interaction feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    /// `left * right`
    Product,
    /// `left / (right + 1)`
    Ratio,
}

/// Named cross-metric feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InteractionFeature {
    pub name: String,
    pub kind: InteractionKind,
    pub left: String,
    pub right: String,
}

impl InteractionFeature {
    pub fn product(name: &str, left: &str, right: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: InteractionKind::Product,
            left: left.to_string(),
            right: right.to_string(),
        }
    }

    pub fn ratio(name: &str, numerator: &str, denominator: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: InteractionKind::Ratio,
            left: numerator.to_string(),
            right: denominator.to_string(),
        }
    }

    /// Combine the two raw values (non-finite results become 0.0)
    pub fn apply(&self, left: f64, right: f64) -> f64 {
        let value = match self.kind {
            InteractionKind::Product => left * right,
            InteractionKind::Ratio => left / (right + 1.0),
        };
        if value.is_finite() { value } else { 0.0 }
    }
}

/// Feature engineering configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Raw metrics tracked; readings for other metrics are ignored
    pub metrics: Vec<String>,
    /// Rolling window sizes, in samples
    pub windows: Vec<usize>,
    /// Cross-metric features; skipped when either side is not tracked
    pub interactions: Vec<InteractionFeature>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            metrics: DEFAULT_METRICS.iter().map(|m| m.to_string()).collect(),
            windows: DEFAULT_WINDOWS.to_vec(),
            interactions: vec![
                InteractionFeature::product("temp_vibration_interaction", "temperature", "vibration"),
                InteractionFeature::ratio("efficiency", "power_consumption", "spindle_speed"),
            ],
        }
    }
}

impl FeatureConfig {
    pub fn new(metrics: &[&str], windows: &[usize]) -> Self {
        Self {
            metrics: metrics.iter().map(|m| m.to_string()).collect(),
            windows: windows.to_vec(),
            interactions: Vec::new(),
        }
    }

    pub fn with_interaction(mut self, interaction: InteractionFeature) -> Self {
        self.interactions.push(interaction);
        self
    }

    /// Sorted, de-duplicated metric names
    pub fn tracked_metrics(&self) -> Vec<String> {
        self.metrics.iter().cloned().collect::<BTreeSet<_>>().into_iter().collect()
    }

    /// Ascending, de-duplicated window sizes
    pub fn tracked_windows(&self) -> Vec<usize> {
        self.windows.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
    }

    /// Interactions whose operands are both tracked, sorted by name
    pub fn active_interactions(&self) -> Vec<InteractionFeature> {
        let mut active: Vec<_> = self
            .interactions
            .iter()
            .filter(|i| self.is_tracked(&i.left) && self.is_tracked(&i.right))
            .cloned()
            .collect();
        active.sort_by(|a, b| a.name.cmp(&b.name));
        active
    }

    pub fn is_tracked(&self, metric: &str) -> bool {
        self.metrics.iter().any(|m| m == metric)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.metrics.is_empty() {
            return Err(EngineError::InvalidConfig("no metrics tracked".to_string()));
        }
        if self.windows.is_empty() || self.windows.contains(&0) {
            return Err(EngineError::InvalidConfig(
                "rolling windows must be non-empty and > 0".to_string(),
            ));
        }

        let names = layout_names(self);
        let unique: BTreeSet<_> = names.iter().collect();
        if unique.len() != names.len() {
            return Err(EngineError::InvalidConfig(
                "feature names collide (check interaction names)".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// NAMING
// ============================================================================

pub fn rolling_name(metric: &str, stat: &str, window: usize) -> String {
    format!("{}_{}_{}", metric, stat, window)
}

pub fn diff_name(metric: &str) -> String {
    format!("{}_diff", metric)
}

pub fn pct_change_name(metric: &str) -> String {
    format!("{}_pct_change", metric)
}

/// Feature names in exact layout order
///
/// raw metrics → rolling stats per metric/window → diff → pct_change → interactions
fn layout_names(config: &FeatureConfig) -> Vec<String> {
    let metrics = config.tracked_metrics();
    let windows = config.tracked_windows();
    let mut names = metrics.clone();

    for metric in &metrics {
        for &window in &windows {
            for stat in ROLLING_STATS {
                names.push(rolling_name(metric, stat, window));
            }
        }
    }
    names.extend(metrics.iter().map(|m| diff_name(m)));
    names.extend(metrics.iter().map(|m| pct_change_name(m)));
    names.extend(config.active_interactions().into_iter().map(|i| i.name));
    names
}

// ============================================================================
// SCHEMA
// ============================================================================

/// Compute CRC32 hash of a feature layout
/// Used to detect layout mismatches between artifacts and serving rows
pub fn compute_layout_hash(names: &[String]) -> String {
    let mut hasher = Hasher::new();

    // Include version in hash
    hasher.update(&[FEATURE_VERSION]);

    for name in names {
        hasher.update(name.as_bytes());
        hasher.update(&[0]); // Separator
    }

    format!("{:08x}", hasher.finalize())
}

/// Complete layout description stored with every artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub version: u8,
    pub hash: String,
    pub names: Vec<String>,
}

impl FeatureSchema {
    pub fn from_config(config: &FeatureConfig) -> Self {
        let names = layout_names(config);
        Self {
            version: FEATURE_VERSION,
            hash: compute_layout_hash(&names),
            names,
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Get feature index by name
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Validate that incoming data was produced under this layout
    pub fn validate(&self, incoming_hash: &str) -> EngineResult<()> {
        if incoming_hash != self.hash {
            return Err(EngineError::SchemaMismatch {
                expected: self.hash.clone(),
                actual: incoming_hash.to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
