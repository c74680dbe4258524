//! Model registry contract
//!
//! Versions are per name and start at 1. Registering a blob pair whose
//! digest is already present under that name returns the existing version,
//! so promoting the same run twice is a no-op.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::{digest, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub name: String,
    pub version: u32,
    /// sha256 over model blob then scaler blob
    pub digest: String,
    /// Run the blobs came from, if known
    pub source_run: Option<String>,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredModel {
    pub version: ModelVersion,
    pub model_blob: Vec<u8>,
    pub scaler_blob: Vec<u8>,
}

pub trait ModelRegistry: Send + Sync {
    fn register(
        &self,
        name: &str,
        model_blob: &[u8],
        scaler_blob: &[u8],
        source_run: Option<&str>,
    ) -> StoreResult<ModelVersion>;

    fn list_versions(&self, name: &str) -> StoreResult<Vec<ModelVersion>>;

    fn get(&self, name: &str, version: u32) -> StoreResult<Option<RegisteredModel>>;

    fn latest(&self, name: &str) -> StoreResult<Option<ModelVersion>> {
        Ok(self.list_versions(name)?.into_iter().max_by_key(|v| v.version))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    models: RwLock<BTreeMap<String, Vec<RegisteredModel>>>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModelRegistry for InMemoryRegistry {
    fn register(
        &self,
        name: &str,
        model_blob: &[u8],
        scaler_blob: &[u8],
        source_run: Option<&str>,
    ) -> StoreResult<ModelVersion> {
        let digest = digest(&[model_blob, scaler_blob]);
        let mut models = self.models.write();
        let versions = models.entry(name.to_string()).or_default();

        if let Some(existing) = versions.iter().find(|m| m.version.digest == digest) {
            return Ok(existing.version.clone());
        }

        let version = ModelVersion {
            name: name.to_string(),
            version: versions.len() as u32 + 1,
            digest,
            source_run: source_run.map(str::to_string),
            registered_at: Utc::now(),
        };
        versions.push(RegisteredModel {
            version: version.clone(),
            model_blob: model_blob.to_vec(),
            scaler_blob: scaler_blob.to_vec(),
        });
        Ok(version)
    }

    fn list_versions(&self, name: &str) -> StoreResult<Vec<ModelVersion>> {
        Ok(self
            .models
            .read()
            .get(name)
            .map(|versions| versions.iter().map(|m| m.version.clone()).collect())
            .unwrap_or_default())
    }

    fn get(&self, name: &str, version: u32) -> StoreResult<Option<RegisteredModel>> {
        Ok(self
            .models
            .read()
            .get(name)
            .and_then(|versions| versions.iter().find(|m| m.version.version == version).cloned()))
    }
}
