//! Feature Rows - Core data structures for model input
//!
//! A `FeatureRow` is always produced by the engine under a `FeatureSchema`;
//! it carries the schema hash so a row can be checked against the artifact
//! that is about to score it.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::layout::FeatureSchema;

// ============================================================================
// RAW READING
// ============================================================================

/// One raw telemetry sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    pub metric_name: String,
    pub value: f64,
}

impl Reading {
    pub fn new(entity_id: &str, timestamp: DateTime<Utc>, metric_name: &str, value: f64) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            timestamp,
            metric_name: metric_name.to_string(),
            value,
        }
    }
}

// ============================================================================
// FEATURE ROW
// ============================================================================

/// Engineered features for one entity at one timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRow {
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
    /// Schema hash this row was produced under
    pub schema_hash: String,
    pub values: BTreeMap<String, f64>,
    /// Tracked metrics with no reading at or before this timestamp.
    /// Their cells are zero-filled, but `raw()` reports them as missing.
    pub absent: BTreeSet<String>,
}

impl FeatureRow {
    /// Get any feature by name
    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Get a raw metric value, `None` if it was never observed
    pub fn raw(&self, metric: &str) -> Option<f64> {
        if self.absent.contains(metric) {
            return None;
        }
        self.get(metric)
    }

    /// Feature names present on this row (sorted)
    pub fn feature_names(&self) -> Vec<&str> {
        self.values.keys().map(|k| k.as_str()).collect()
    }

    /// Values in schema order; features missing from the row become 0.0
    pub fn to_vector(&self, schema: &FeatureSchema) -> Vec<f64> {
        schema
            .names
            .iter()
            .map(|name| self.values.get(name).copied().unwrap_or(0.0))
            .collect()
    }

    /// Raw values of every observed tracked metric
    pub fn current_metrics(&self, metrics: &[String]) -> BTreeMap<String, f64> {
        metrics
            .iter()
            .filter_map(|m| self.raw(m).map(|v| (m.clone(), v)))
            .collect()
    }
}

// ============================================================================
// FEATURE TABLE
// ============================================================================

/// Time-ordered feature rows for one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub entity_id: String,
    pub schema: FeatureSchema,
    pub rows: Vec<FeatureRow>,
    /// Readings dropped (untracked metric, non-finite value, other entity)
    pub ignored_readings: usize,
}

impl FeatureTable {
    pub fn empty(entity_id: &str, schema: FeatureSchema) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            schema,
            rows: Vec::new(),
            ignored_readings: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Most recent row
    pub fn latest(&self) -> Option<&FeatureRow> {
        self.rows.last()
    }

    /// Dense `rows x features` matrix in schema order
    pub fn to_matrix(&self) -> Array2<f64> {
        let n_features = self.schema.len();
        let mut data = Vec::with_capacity(self.rows.len() * n_features);
        for row in &self.rows {
            data.extend(row.to_vector(&self.schema));
        }
        // Shape always matches since every row contributes n_features values
        Array2::from_shape_vec((self.rows.len(), n_features), data)
            .unwrap_or_else(|_| Array2::zeros((0, n_features)))
    }
}

/// Stack several entities' tables into one matrix (same schema required)
pub fn stack_tables<'a, I>(tables: I, schema: &FeatureSchema) -> (Array2<f64>, Vec<&'a FeatureRow>)
where
    I: IntoIterator<Item = &'a FeatureTable>,
{
    let rows: Vec<&FeatureRow> = tables.into_iter().flat_map(|t| t.rows.iter()).collect();
    let n_features = schema.len();
    let mut data = Vec::with_capacity(rows.len() * n_features);
    for row in &rows {
        data.extend(row.to_vector(schema));
    }
    let matrix = Array2::from_shape_vec((rows.len(), n_features), data)
        .unwrap_or_else(|_| Array2::zeros((0, n_features)));
    (matrix, rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::features::layout::FeatureConfig;

    fn row(values: &[(&str, f64)], absent: &[&str]) -> FeatureRow {
        FeatureRow {
            entity_id: "M-01".to_string(),
            timestamp: Utc::now(),
            schema_hash: String::new(),
            values: values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            absent: absent.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_raw_respects_absent() {
        let r = row(&[("temperature", 0.0), ("vibration", 1.2)], &["temperature"]);
        assert_eq!(r.raw("temperature"), None);
        assert_eq!(r.get("temperature"), Some(0.0));
        assert_eq!(r.raw("vibration"), Some(1.2));
    }

    #[test]
    fn test_to_vector_follows_schema() {
        let schema = FeatureSchema::from_config(&FeatureConfig::new(&["temperature"], &[5]));
        let r = row(&[("temperature", 3.0), ("temperature_diff", 1.0)], &[]);
        let v = r.to_vector(&schema);
        assert_eq!(v.len(), schema.len());
        assert_eq!(v[0], 3.0);
        assert_eq!(v[schema.index_of("temperature_diff").unwrap()], 1.0);
    }
}
