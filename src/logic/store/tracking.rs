//! Experiment tracker contract
//!
//! Run records are append-only. Artifacts are opaque blobs addressed by
//! `(run_id, kind)`; the ref returned on upload carries a sha256 digest.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{get_tracking_dir, APP_NAME};

use super::{digest, StoreError, StoreResult};

// ============================================================================
// RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub run_id: String,
    pub kind: String,
    /// Hex sha256 of the blob
    pub digest: String,
    pub size: usize,
}

/// One training attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub experiment: String,
    pub algorithm: String,
    pub hyperparameters: BTreeMap<String, String>,
    pub metrics: BTreeMap<String, f64>,
    pub artifact_refs: Vec<ArtifactRef>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl RunRecord {
    pub fn new(experiment: &str, algorithm: &str) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            experiment: experiment.to_string(),
            algorithm: algorithm.to_string(),
            hyperparameters: BTreeMap::new(),
            metrics: BTreeMap::new(),
            artifact_refs: Vec::new(),
            started_at: Utc::now(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl ToString) -> Self {
        self.hyperparameters.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_metric(mut self, key: &str, value: f64) -> Self {
        self.metrics.insert(key.to_string(), value);
        self
    }

    pub fn with_tag(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).copied()
    }

    pub fn artifact(&self, kind: &str) -> Option<&ArtifactRef> {
        self.artifact_refs.iter().find(|a| a.kind == kind)
    }
}

// ============================================================================
// CONTRACT
// ============================================================================

pub trait ExperimentTracker: Send + Sync {
    /// Append a finished run
    fn log_run(&self, run: &RunRecord) -> StoreResult<()>;

    /// Every run logged under `experiment`, in logging order
    fn list_runs(&self, experiment: &str) -> StoreResult<Vec<RunRecord>>;

    fn get_run(&self, run_id: &str) -> StoreResult<RunRecord>;

    fn log_artifact(&self, run_id: &str, kind: &str, blob: &[u8]) -> StoreResult<ArtifactRef>;

    fn load_artifact(&self, run_id: &str, kind: &str) -> StoreResult<Vec<u8>>;
}

fn artifact_ref(run_id: &str, kind: &str, blob: &[u8]) -> ArtifactRef {
    ArtifactRef {
        run_id: run_id.to_string(),
        kind: kind.to_string(),
        digest: digest(&[blob]),
        size: blob.len(),
    }
}

// ============================================================================
// IN-MEMORY
// ============================================================================

#[derive(Debug, Default)]
pub struct InMemoryTracker {
    runs: RwLock<Vec<RunRecord>>,
    artifacts: RwLock<BTreeMap<(String, String), Vec<u8>>>,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExperimentTracker for InMemoryTracker {
    fn log_run(&self, run: &RunRecord) -> StoreResult<()> {
        self.runs.write().push(run.clone());
        Ok(())
    }

    fn list_runs(&self, experiment: &str) -> StoreResult<Vec<RunRecord>> {
        Ok(self
            .runs
            .read()
            .iter()
            .filter(|r| r.experiment == experiment)
            .cloned()
            .collect())
    }

    fn get_run(&self, run_id: &str) -> StoreResult<RunRecord> {
        self.runs
            .read()
            .iter()
            .find(|r| r.run_id == run_id)
            .cloned()
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))
    }

    fn log_artifact(&self, run_id: &str, kind: &str, blob: &[u8]) -> StoreResult<ArtifactRef> {
        self.artifacts
            .write()
            .insert((run_id.to_string(), kind.to_string()), blob.to_vec());
        Ok(artifact_ref(run_id, kind, blob))
    }

    fn load_artifact(&self, run_id: &str, kind: &str) -> StoreResult<Vec<u8>> {
        self.artifacts
            .read()
            .get(&(run_id.to_string(), kind.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::ArtifactNotFound {
                run_id: run_id.to_string(),
                kind: kind.to_string(),
            })
    }
}

// ============================================================================
// JSON FILES
// ============================================================================

/// Default tracking root
pub fn get_default_tracking_dir() -> PathBuf {
    get_tracking_dir().unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_NAME)
            .join("tracking")
    })
}

/// `runs.jsonl` plus `artifacts/<run_id>/<kind>` under one root directory
#[derive(Debug)]
pub struct JsonFileTracker {
    root: PathBuf,
    append_lock: Mutex<()>,
}

impl JsonFileTracker {
    pub fn open(root: &Path) -> StoreResult<Self> {
        fs::create_dir_all(root.join("artifacts"))?;
        Ok(Self {
            root: root.to_path_buf(),
            append_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn runs_path(&self) -> PathBuf {
        self.root.join("runs.jsonl")
    }

    /// Ids and kinds become path segments; anything that could escape the
    /// artifact directory is treated as missing
    fn artifact_path(&self, run_id: &str, kind: &str) -> Option<PathBuf> {
        let safe = |s: &str| {
            !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        };
        (safe(run_id) && safe(kind)).then(|| self.root.join("artifacts").join(run_id).join(kind))
    }

    fn load_runs(&self) -> StoreResult<Vec<RunRecord>> {
        let path = self.runs_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut runs = Vec::new();
        for line in BufReader::new(fs::File::open(path)?).lines() {
            let line = line?;
            if !line.trim().is_empty() {
                runs.push(serde_json::from_str(&line)?);
            }
        }
        Ok(runs)
    }
}

impl ExperimentTracker for JsonFileTracker {
    fn log_run(&self, run: &RunRecord) -> StoreResult<()> {
        let line = serde_json::to_string(run)?;
        let _guard = self.append_lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.runs_path())?;
        writeln!(file, "{}", line)?;
        Ok(())
    }

    fn list_runs(&self, experiment: &str) -> StoreResult<Vec<RunRecord>> {
        Ok(self
            .load_runs()?
            .into_iter()
            .filter(|r| r.experiment == experiment)
            .collect())
    }

    fn get_run(&self, run_id: &str) -> StoreResult<RunRecord> {
        self.load_runs()?
            .into_iter()
            .find(|r| r.run_id == run_id)
            .ok_or_else(|| StoreError::RunNotFound(run_id.to_string()))
    }

    fn log_artifact(&self, run_id: &str, kind: &str, blob: &[u8]) -> StoreResult<ArtifactRef> {
        let path = self
            .artifact_path(run_id, kind)
            .ok_or_else(|| StoreError::ArtifactNotFound {
                run_id: run_id.to_string(),
                kind: kind.to_string(),
            })?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, blob)?;
        Ok(artifact_ref(run_id, kind, blob))
    }

    fn load_artifact(&self, run_id: &str, kind: &str) -> StoreResult<Vec<u8>> {
        let not_found = || StoreError::ArtifactNotFound {
            run_id: run_id.to_string(),
            kind: kind.to_string(),
        };
        let path = self.artifact_path(run_id, kind).ok_or_else(not_found)?;
        if !path.exists() {
            return Err(not_found());
        }
        Ok(fs::read(path)?)
    }
}
