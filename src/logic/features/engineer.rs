//! Feature Engineering Engine
//!
//! Pivots raw readings into a dense time-indexed table and derives rolling,
//! rate-of-change and interaction features. Pure: same readings and config
//! give the same rows, every time.
//!
//! Missing-value policy (staleness is assumed benign):
//! 1. forward-fill each metric from its last reading
//! 2. zero-fill leading cells and mark the metric absent on those rows

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::error::EngineResult;
use super::layout::{
    diff_name, pct_change_name, rolling_name, FeatureConfig, FeatureSchema, InteractionFeature,
};
use super::row::{FeatureRow, FeatureTable, Reading};

// ============================================================================
// ROLLING STATISTICS
// ============================================================================

/// Mean/std/max/min over the trailing `window` samples (min_periods = 1)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub mean: f64,
    pub std: f64,
    pub max: f64,
    pub min: f64,
}

/// Trailing-window statistics for every position of `series`
///
/// Std is the sample (n-1) deviation and is 0.0 below two samples.
pub fn rolling_stats(series: &[f64], window: usize) -> Vec<WindowStats> {
    let window = window.max(1);
    (0..series.len())
        .map(|t| {
            let start = (t + 1).saturating_sub(window);
            let slice = &series[start..=t];
            let n = slice.len() as f64;
            let mean = slice.iter().sum::<f64>() / n;
            let std = if slice.len() < 2 {
                0.0
            } else {
                let var = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
                var.sqrt()
            };
            let max = slice.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let min = slice.iter().copied().fold(f64::INFINITY, f64::min);
            WindowStats { mean, std, max, min }
        })
        .collect()
}

/// First difference, 0.0 at series start
pub fn first_difference(series: &[f64]) -> Vec<f64> {
    (0..series.len())
        .map(|t| if t == 0 { 0.0 } else { series[t] - series[t - 1] })
        .collect()
}

/// Percent change, 0.0 at series start and after a zero value
pub fn percent_change(series: &[f64]) -> Vec<f64> {
    (0..series.len())
        .map(|t| {
            if t == 0 || series[t - 1] == 0.0 {
                0.0
            } else {
                (series[t] - series[t - 1]) / series[t - 1]
            }
        })
        .collect()
}

// ============================================================================
// PIVOT
// ============================================================================

/// Dense per-metric columns over the entity's sorted timestamps
struct PivotTable {
    timestamps: Vec<DateTime<Utc>>,
    /// metric -> filled values
    columns: BTreeMap<String, Vec<f64>>,
    /// metric -> index of first observation (None = never observed)
    first_seen: BTreeMap<String, Option<usize>>,
    ignored: usize,
}

fn pivot(entity_id: &str, readings: &[Reading], metrics: &[String]) -> PivotTable {
    let tracked: BTreeSet<&str> = metrics.iter().map(|m| m.as_str()).collect();
    let mut cells: BTreeMap<DateTime<Utc>, BTreeMap<&str, (f64, usize)>> = BTreeMap::new();
    let mut ignored = 0usize;

    for reading in readings {
        let metric = reading.metric_name.as_str();
        if reading.entity_id != entity_id || !tracked.contains(metric) || !reading.value.is_finite() {
            ignored += 1;
            continue;
        }
        // Duplicate (timestamp, metric) readings are averaged
        let cell = cells
            .entry(reading.timestamp)
            .or_default()
            .entry(metric)
            .or_insert((0.0, 0));
        cell.0 += reading.value;
        cell.1 += 1;
    }

    if ignored > 0 {
        log::debug!("{}: ignored {} readings (untracked/non-finite/foreign)", entity_id, ignored);
    }

    let timestamps: Vec<DateTime<Utc>> = cells.keys().copied().collect();
    let mut columns = BTreeMap::new();
    let mut first_seen = BTreeMap::new();

    for metric in metrics {
        let mut column = Vec::with_capacity(timestamps.len());
        let mut last: Option<f64> = None;
        let mut first: Option<usize> = None;

        for (t, ts) in timestamps.iter().enumerate() {
            if let Some(&(sum, count)) = cells.get(ts).and_then(|row| row.get(metric.as_str())) {
                last = Some(sum / count as f64);
                first.get_or_insert(t);
            }
            column.push(last.unwrap_or(0.0));
        }

        columns.insert(metric.clone(), column);
        first_seen.insert(metric.clone(), first);
    }

    PivotTable { timestamps, columns, first_seen, ignored }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Stateless feature engine bound to one configuration
#[derive(Debug, Clone)]
pub struct FeatureEngine {
    config: FeatureConfig,
    schema: FeatureSchema,
    metrics: Vec<String>,
    windows: Vec<usize>,
    interactions: Vec<InteractionFeature>,
}

impl FeatureEngine {
    pub fn new(config: FeatureConfig) -> EngineResult<Self> {
        config.validate()?;
        let schema = FeatureSchema::from_config(&config);
        Ok(Self {
            metrics: config.tracked_metrics(),
            windows: config.tracked_windows(),
            interactions: config.active_interactions(),
            config,
            schema,
        })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    /// Tracked raw metrics (sorted)
    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    /// Engineer one entity's readings. Readings of other entities are ignored.
    ///
    /// Empty input yields an empty table, never an error.
    pub fn engineer(&self, entity_id: &str, readings: &[Reading]) -> FeatureTable {
        let pivot = pivot(entity_id, readings, &self.metrics);
        let n_rows = pivot.timestamps.len();

        let mut table = FeatureTable::empty(entity_id, self.schema.clone());
        table.ignored_readings = pivot.ignored;
        if n_rows == 0 {
            return table;
        }

        let mut values: Vec<BTreeMap<String, f64>> = vec![BTreeMap::new(); n_rows];

        for metric in &self.metrics {
            let column = match pivot.columns.get(metric) {
                Some(c) => c,
                None => continue,
            };

            for (t, v) in column.iter().enumerate() {
                values[t].insert(metric.clone(), *v);
            }

            for &window in &self.windows {
                for (t, stats) in rolling_stats(column, window).into_iter().enumerate() {
                    let row = &mut values[t];
                    row.insert(rolling_name(metric, "mean", window), stats.mean);
                    row.insert(rolling_name(metric, "std", window), stats.std);
                    row.insert(rolling_name(metric, "max", window), stats.max);
                    row.insert(rolling_name(metric, "min", window), stats.min);
                }
            }

            let diff_key = diff_name(metric);
            for (t, d) in first_difference(column).into_iter().enumerate() {
                values[t].insert(diff_key.clone(), d);
            }
            let pct_key = pct_change_name(metric);
            for (t, p) in percent_change(column).into_iter().enumerate() {
                values[t].insert(pct_key.clone(), p);
            }
        }

        for interaction in &self.interactions {
            let (left, right) = match (
                pivot.columns.get(&interaction.left),
                pivot.columns.get(&interaction.right),
            ) {
                (Some(l), Some(r)) => (l, r),
                _ => continue,
            };
            for t in 0..n_rows {
                values[t].insert(interaction.name.clone(), interaction.apply(left[t], right[t]));
            }
        }

        table.rows = pivot
            .timestamps
            .iter()
            .zip(values)
            .enumerate()
            .map(|(t, (timestamp, values))| FeatureRow {
                entity_id: entity_id.to_string(),
                timestamp: *timestamp,
                schema_hash: self.schema.hash.clone(),
                values,
                absent: self
                    .metrics
                    .iter()
                    .filter(|m| match pivot.first_seen.get(*m) {
                        Some(Some(first)) => t < *first,
                        _ => true,
                    })
                    .cloned()
                    .collect(),
            })
            .collect();

        table
    }

    /// Engineer a mixed multi-entity batch.
    ///
    /// Readings are split per entity first, so windows never cross entity
    /// boundaries.
    pub fn engineer_batch(&self, readings: &[Reading]) -> BTreeMap<String, FeatureTable> {
        let mut grouped: BTreeMap<&str, Vec<Reading>> = BTreeMap::new();
        for reading in readings {
            grouped.entry(reading.entity_id.as_str()).or_default().push(reading.clone());
        }

        grouped
            .into_iter()
            .map(|(entity_id, entity_readings)| {
                (entity_id.to_string(), self.engineer(entity_id, &entity_readings))
            })
            .collect()
    }
}
