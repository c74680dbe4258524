//! Maintenance Service - async entry points
//!
//! Training and scoring are CPU bound, so every call runs on the blocking
//! pool and the async caller only awaits the result.

use std::sync::Arc;

use log::info;
use tokio::task;

use crate::error::{EngineError, EngineResult};
use crate::logic::lifecycle::{LifecycleManager, ModelStatus};
use crate::logic::model::TrainingWindow;
use crate::logic::risk::RiskAssessment;
use crate::logic::training::{PipelineReport, TrainingPipeline, TrainingScope};

#[derive(Clone)]
pub struct MaintenanceService {
    lifecycle: Arc<LifecycleManager>,
    pipeline: Option<Arc<TrainingPipeline>>,
}

impl MaintenanceService {
    pub fn new(lifecycle: Arc<LifecycleManager>) -> Self {
        Self {
            lifecycle,
            pipeline: None,
        }
    }

    pub fn with_pipeline(mut self, pipeline: Arc<TrainingPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    /// Risk assessment for one entity; UNKNOWN when no model can be had
    pub async fn predict(&self, entity_id: &str) -> EngineResult<RiskAssessment> {
        let lifecycle = self.lifecycle.clone();
        let entity_id = entity_id.to_string();
        Ok(task::spawn_blocking(move || lifecycle.predict(&entity_id)).await?)
    }

    /// Retrain one entity over the configured history
    pub async fn train(&self, entity_id: &str) -> EngineResult<ModelStatus> {
        let lifecycle = self.lifecycle.clone();
        let entity_id = entity_id.to_string();
        task::spawn_blocking(move || {
            lifecycle.retrain(&entity_id)?;
            Ok(lifecycle.status(&entity_id))
        })
        .await?
    }

    /// Train one entity over an explicit window
    pub async fn train_window(&self, entity_id: &str, window: TrainingWindow) -> EngineResult<ModelStatus> {
        let lifecycle = self.lifecycle.clone();
        let entity_id = entity_id.to_string();
        task::spawn_blocking(move || {
            lifecycle.train(&entity_id, window)?;
            Ok(lifecycle.status(&entity_id))
        })
        .await?
    }

    pub async fn status(&self, entity_id: &str) -> ModelStatus {
        self.lifecycle.status(entity_id)
    }

    pub async fn analyze_all(&self) -> EngineResult<Vec<RiskAssessment>> {
        let lifecycle = self.lifecycle.clone();
        task::spawn_blocking(move || lifecycle.analyze_all()).await?
    }

    /// Run the training pipeline; per-entity anomaly models it produces are
    /// installed for serving
    pub async fn run_pipeline(&self, scope: TrainingScope) -> EngineResult<PipelineReport> {
        let pipeline = self
            .pipeline
            .clone()
            .ok_or_else(|| EngineError::InvalidConfig("no training pipeline configured".to_string()))?;
        let lifecycle = self.lifecycle.clone();

        task::spawn_blocking(move || {
            let report = pipeline.run(scope)?;
            for (scope, artifact) in report.anomaly_artifacts() {
                if let Some(entity_id) = scope.entity_id() {
                    lifecycle.install(entity_id, artifact.clone())?;
                    info!("Serving pipeline model for {}", entity_id);
                }
            }
            Ok(report)
        })
        .await?
    }
}
