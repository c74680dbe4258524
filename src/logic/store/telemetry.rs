//! Telemetry store contract
//!
//! Read-only from the engine's point of view: range queries per entity and
//! the set of known entities.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::logic::features::Reading;
use crate::logic::model::TrainingWindow;

use super::{StoreError, StoreResult};

pub trait TelemetryStore: Send + Sync {
    /// Readings for one entity inside `window`, in timestamp order
    fn fetch(&self, entity_id: &str, window: &TrainingWindow) -> StoreResult<Vec<Reading>>;

    fn list_entities(&self) -> StoreResult<BTreeSet<String>>;

    /// Readings for every entity inside `window`
    fn fetch_all(&self, window: &TrainingWindow) -> StoreResult<Vec<Reading>> {
        let mut all = Vec::new();
        for entity in self.list_entities()? {
            all.extend(self.fetch(&entity, window)?);
        }
        Ok(all)
    }
}

fn select(readings: &[Reading], entity_id: Option<&str>, window: &TrainingWindow) -> Vec<Reading> {
    let mut out: Vec<Reading> = readings
        .iter()
        .filter(|r| entity_id.map_or(true, |id| r.entity_id == id) && window.contains(r.timestamp))
        .cloned()
        .collect();
    out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    out
}

// ============================================================================
// IN-MEMORY
// ============================================================================

#[derive(Debug, Default)]
pub struct InMemoryTelemetryStore {
    readings: RwLock<Vec<Reading>>,
}

impl InMemoryTelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_readings(readings: Vec<Reading>) -> Self {
        Self {
            readings: RwLock::new(readings),
        }
    }

    pub fn insert(&self, reading: Reading) {
        self.readings.write().push(reading);
    }

    pub fn extend(&self, readings: impl IntoIterator<Item = Reading>) {
        self.readings.write().extend(readings);
    }

    pub fn len(&self) -> usize {
        self.readings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.read().is_empty()
    }
}

impl TelemetryStore for InMemoryTelemetryStore {
    fn fetch(&self, entity_id: &str, window: &TrainingWindow) -> StoreResult<Vec<Reading>> {
        Ok(select(&self.readings.read(), Some(entity_id), window))
    }

    fn list_entities(&self) -> StoreResult<BTreeSet<String>> {
        Ok(self.readings.read().iter().map(|r| r.entity_id.clone()).collect())
    }

    fn fetch_all(&self, window: &TrainingWindow) -> StoreResult<Vec<Reading>> {
        Ok(select(&self.readings.read(), None, window))
    }
}

// ============================================================================
// JSONL FILE
// ============================================================================

/// One `Reading` JSON object per line. The file is re-read on every query.
#[derive(Debug, Clone)]
pub struct JsonlTelemetryStore {
    path: PathBuf,
}

impl JsonlTelemetryStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        if !path.exists() {
            return Err(StoreError::Unavailable {
                service: "telemetry store",
                reason: format!("{} does not exist", path.display()),
            });
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write readings as a fresh JSONL file
    pub fn write(path: &Path, readings: &[Reading]) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        for reading in readings {
            serde_json::to_writer(&mut writer, reading)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Self::open(path)
    }

    fn load(&self) -> StoreResult<Vec<Reading>> {
        let file = File::open(&self.path).map_err(|e| StoreError::Unavailable {
            service: "telemetry store",
            reason: e.to_string(),
        })?;

        let mut readings = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            readings.push(serde_json::from_str(&line)?);
        }
        Ok(readings)
    }
}

impl TelemetryStore for JsonlTelemetryStore {
    fn fetch(&self, entity_id: &str, window: &TrainingWindow) -> StoreResult<Vec<Reading>> {
        Ok(select(&self.load()?, Some(entity_id), window))
    }

    fn list_entities(&self) -> StoreResult<BTreeSet<String>> {
        Ok(self.load()?.into_iter().map(|r| r.entity_id).collect())
    }

    fn fetch_all(&self, window: &TrainingWindow) -> StoreResult<Vec<Reading>> {
        Ok(select(&self.load()?, None, window))
    }
}
