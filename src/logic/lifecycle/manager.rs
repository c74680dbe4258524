//! Model Lifecycle Manager
//!
//! Owns entity id → trained artifact. Each entity has its own slot with its
//! own training lock, so at most one training run is in flight per entity
//! while other entities keep training and scoring independently. The map
//! lock is only held to find, insert or drop a slot. A slot is only ever
//! removed by a thread holding its training lock, so a fit in progress
//! always belongs to the registered slot.
//!
//! Per-entity state: `NoModel → Training → Ready`, `Ready → Training` on
//! retrain, `Training → NoModel` when a fit fails (the old artifact is
//! discarded).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MAX_CACHED_ENTITIES, DEFAULT_SERVING_MINUTES, DEFAULT_TRAINING_HOURS};
use crate::error::{EngineError, EngineResult};
use crate::logic::features::FeatureEngine;
use crate::logic::model::{AnomalyConfig, AnomalyModel, TrainedArtifact, TrainingWindow};
use crate::logic::risk::{assess, RiskAssessment, RiskThresholds};
use crate::logic::store::TelemetryStore;

// ============================================================================
// CONFIG & STATUS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// History fetched for lazy / explicit training
    pub training_hours: i64,
    /// Recent history scored by `predict`
    pub serving_minutes: i64,
    /// Slots kept before the least recently used one is dropped
    pub max_cached_entities: usize,
    pub anomaly: AnomalyConfig,
    pub risk: RiskThresholds,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            training_hours: DEFAULT_TRAINING_HOURS,
            serving_minutes: DEFAULT_SERVING_MINUTES,
            max_cached_entities: DEFAULT_MAX_CACHED_ENTITIES,
            anomaly: AnomalyConfig::default(),
            risk: RiskThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelStatus {
    NoModel,
    Training,
    Ready,
}

// ============================================================================
// SLOTS
// ============================================================================

#[derive(Default)]
struct EntitySlot {
    artifact: RwLock<Option<Arc<TrainedArtifact>>>,
    /// Held for the whole fit
    training: Mutex<()>,
    in_flight: AtomicBool,
    /// Completed fit attempts, successful or not
    attempts: AtomicU64,
}

impl EntitySlot {
    fn current(&self) -> Option<Arc<TrainedArtifact>> {
        self.artifact.read().clone()
    }
}

#[derive(Default)]
struct SlotMap {
    slots: HashMap<String, (Arc<EntitySlot>, u64)>,
    clock: u64,
}

// ============================================================================
// MANAGER
// ============================================================================

pub struct LifecycleManager {
    config: LifecycleConfig,
    engine: FeatureEngine,
    telemetry: Arc<dyn TelemetryStore>,
    slots: Mutex<SlotMap>,
}

impl LifecycleManager {
    pub fn new(config: LifecycleConfig, engine: FeatureEngine, telemetry: Arc<dyn TelemetryStore>) -> Self {
        Self {
            config,
            engine,
            telemetry,
            slots: Mutex::new(SlotMap::default()),
        }
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn engine(&self) -> &FeatureEngine {
        &self.engine
    }

    // ------------------------------------------------------------------------
    // Slot map
    // ------------------------------------------------------------------------

    /// Find or create the slot, marking it most recently used
    fn slot(&self, entity_id: &str) -> Arc<EntitySlot> {
        let mut map = self.slots.lock();
        map.clock += 1;
        let now = map.clock;

        let (slot, last_used) = map
            .slots
            .entry(entity_id.to_string())
            .or_insert_with(|| (Arc::new(EntitySlot::default()), now));
        *last_used = now;
        slot.clone()
    }

    fn existing_slot(&self, entity_id: &str) -> Option<Arc<EntitySlot>> {
        self.slots.lock().slots.get(entity_id).map(|(slot, _)| slot.clone())
    }

    fn is_registered(&self, entity_id: &str, slot: &Arc<EntitySlot>) -> bool {
        self.slots
            .lock()
            .slots
            .get(entity_id)
            .map_or(false, |(current, _)| Arc::ptr_eq(current, slot))
    }

    /// Drop a slot that ended up without an artifact. Caller holds `slot.training`.
    fn forget_if_empty(&self, entity_id: &str, slot: &Arc<EntitySlot>) {
        let mut map = self.slots.lock();
        let same = map
            .slots
            .get(entity_id)
            .map_or(false, |(current, _)| Arc::ptr_eq(current, slot));
        if same && slot.current().is_none() {
            map.slots.remove(entity_id);
        }
    }

    /// Drop least recently used models until at most `max_cached_entities`
    /// hold an artifact. Caller holds the training lock of `keep`; slots
    /// whose training lock is taken elsewhere are skipped.
    fn enforce_capacity(&self, keep: &str) {
        let capacity = self.config.max_cached_entities.max(1);
        let mut map = self.slots.lock();

        let mut ready: Vec<(String, Arc<EntitySlot>, u64)> = map
            .slots
            .iter()
            .filter(|(id, (slot, _))| id.as_str() != keep && slot.current().is_some())
            .map(|(id, (slot, last_used))| (id.clone(), slot.clone(), *last_used))
            .collect();
        let mut excess = (ready.len() + 1).saturating_sub(capacity);
        if excess == 0 {
            return;
        }

        ready.sort_by_key(|(_, _, last_used)| *last_used);
        for (id, slot, _) in ready {
            if excess == 0 {
                break;
            }
            let Some(_guard) = slot.training.try_lock() else {
                continue;
            };
            map.slots.remove(&id);
            excess -= 1;
            debug!("Evicted least recently used model for {}", id);
        }
    }

    // ------------------------------------------------------------------------
    // Training
    // ------------------------------------------------------------------------

    fn fit(&self, entity_id: &str, window: TrainingWindow) -> EngineResult<TrainedArtifact> {
        let readings = self.telemetry.fetch(entity_id, &window)?;
        let table = self.engine.engineer(entity_id, &readings);
        let model = AnomalyModel::fit(&table, &self.config.anomaly)?;
        info!(
            "Trained model for {} on {} rows ({} features)",
            entity_id,
            table.len(),
            table.schema.len()
        );
        Ok(TrainedArtifact::new(model, window, table.len()))
    }

    /// Caller holds `slot.training`
    fn train_locked(
        &self,
        entity_id: &str,
        slot: &Arc<EntitySlot>,
        window: TrainingWindow,
    ) -> EngineResult<Arc<TrainedArtifact>> {
        slot.in_flight.store(true, Ordering::Release);
        let result = self.fit(entity_id, window);

        let outcome = match result {
            Ok(artifact) => {
                let artifact = Arc::new(artifact);
                *slot.artifact.write() = Some(artifact.clone());
                self.enforce_capacity(entity_id);
                Ok(artifact)
            }
            Err(e) => {
                match &e {
                    EngineError::InsufficientData { required, actual } => info!(
                        "Not training {}: {} rows, need {}",
                        entity_id, actual, required
                    ),
                    other => warn!("Training failed for {}: {}", entity_id, other),
                }
                *slot.artifact.write() = None;
                Err(e)
            }
        };

        slot.attempts.fetch_add(1, Ordering::AcqRel);
        slot.in_flight.store(false, Ordering::Release);
        if outcome.is_err() {
            self.forget_if_empty(entity_id, slot);
        }
        outcome
    }

    /// Train (or retrain) one entity over `window`. A failure leaves the
    /// entity with no model.
    pub fn train(&self, entity_id: &str, window: TrainingWindow) -> EngineResult<Arc<TrainedArtifact>> {
        loop {
            let slot = self.slot(entity_id);
            let _guard = slot.training.lock();
            if !self.is_registered(entity_id, &slot) {
                continue;
            }
            return self.train_locked(entity_id, &slot, window);
        }
    }

    /// Train over the configured trailing history
    pub fn retrain(&self, entity_id: &str) -> EngineResult<Arc<TrainedArtifact>> {
        self.train(entity_id, TrainingWindow::last_hours(self.config.training_hours))
    }

    /// Cached artifact, training it first if there is none
    pub fn get_or_train(&self, entity_id: &str) -> EngineResult<Arc<TrainedArtifact>> {
        loop {
            let slot = self.slot(entity_id);
            if let Some(artifact) = slot.current() {
                return Ok(artifact);
            }

            let seen = slot.attempts.load(Ordering::Acquire);
            let _guard = slot.training.lock();

            if let Some(artifact) = slot.current() {
                return Ok(artifact);
            }
            // Someone else attempted while we waited and failed; do not retry
            if slot.attempts.load(Ordering::Acquire) != seen {
                return Err(EngineError::NoModelAvailable {
                    entity_id: entity_id.to_string(),
                });
            }
            // Evicted while we waited
            if !self.is_registered(entity_id, &slot) {
                continue;
            }

            info!("No model cached for {}, training on demand", entity_id);
            let window = TrainingWindow::last_hours(self.config.training_hours);
            return self.train_locked(entity_id, &slot, window);
        }
    }

    // ------------------------------------------------------------------------
    // Cache management
    // ------------------------------------------------------------------------

    /// Install an externally trained artifact (e.g. from the batch pipeline)
    pub fn install(&self, entity_id: &str, artifact: TrainedArtifact) -> EngineResult<()> {
        self.engine.schema().validate(&artifact.feature_schema_hash)?;
        let artifact = Arc::new(artifact);
        loop {
            let slot = self.slot(entity_id);
            let _guard = slot.training.lock();
            if !self.is_registered(entity_id, &slot) {
                continue;
            }
            *slot.artifact.write() = Some(artifact.clone());
            self.enforce_capacity(entity_id);
            debug!("Installed model for {}", entity_id);
            return Ok(());
        }
    }

    /// Drop the cached model; returns whether one was cached. Waits for a
    /// fit in progress on that entity to finish first.
    pub fn evict(&self, entity_id: &str) -> bool {
        let Some(slot) = self.existing_slot(entity_id) else {
            return false;
        };
        let _guard = slot.training.lock();
        let mut map = self.slots.lock();
        let same = map
            .slots
            .get(entity_id)
            .map_or(false, |(current, _)| Arc::ptr_eq(current, &slot));
        if same {
            map.slots.remove(entity_id);
        }
        same
    }

    pub fn artifact(&self, entity_id: &str) -> Option<Arc<TrainedArtifact>> {
        self.existing_slot(entity_id).and_then(|slot| slot.current())
    }

    pub fn status(&self, entity_id: &str) -> ModelStatus {
        match self.existing_slot(entity_id) {
            Some(slot) if slot.in_flight.load(Ordering::Acquire) => ModelStatus::Training,
            Some(slot) if slot.current().is_some() => ModelStatus::Ready,
            _ => ModelStatus::NoModel,
        }
    }

    /// Entities that currently have a slot, sorted
    pub fn cached_entities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.slots.lock().slots.keys().cloned().collect();
        ids.sort();
        ids
    }

    // ------------------------------------------------------------------------
    // Serving
    // ------------------------------------------------------------------------

    fn score(&self, entity_id: &str) -> EngineResult<RiskAssessment> {
        let artifact = self.get_or_train(entity_id)?;

        let window = TrainingWindow::last_minutes(self.config.serving_minutes);
        let readings = self.telemetry.fetch(entity_id, &window)?;
        let table = self.engine.engineer(entity_id, &readings);

        let Some(latest) = table.latest() else {
            return Ok(RiskAssessment::unknown(entity_id));
        };

        let score = artifact.model.score(latest)?;
        Ok(assess(
            entity_id,
            Some(latest),
            Some(score),
            self.engine.metrics(),
            &self.config.risk,
        ))
    }

    /// Assessment for one entity, or `None` when no model can be obtained
    /// or its inputs are unavailable
    pub fn try_predict(&self, entity_id: &str) -> Option<RiskAssessment> {
        match self.score(entity_id) {
            Ok(assessment) => Some(assessment),
            Err(e) if e.is_recoverable() => {
                debug!("No assessment for {}: {}", entity_id, e);
                None
            }
            Err(e) => {
                warn!("Prediction failed for {}: {}", entity_id, e);
                None
            }
        }
    }

    /// Assessment for one entity; UNKNOWN when none can be produced
    pub fn predict(&self, entity_id: &str) -> RiskAssessment {
        self.try_predict(entity_id)
            .unwrap_or_else(|| RiskAssessment::unknown(entity_id))
    }

    /// Score every known entity, omitting those with no model. An
    /// unreachable collaborator fails the whole call.
    pub fn analyze_all(&self) -> EngineResult<Vec<RiskAssessment>> {
        let entities: Vec<String> = self.telemetry.list_entities()?.into_iter().collect();
        let results: Vec<Option<RiskAssessment>> = entities
            .par_iter()
            .map(|entity_id| match self.score(entity_id) {
                Ok(assessment) => Ok(Some(assessment)),
                Err(e @ EngineError::UpstreamUnavailable { .. }) => Err(e),
                Err(e) if e.is_recoverable() => {
                    debug!("No assessment for {}: {}", entity_id, e);
                    Ok(None)
                }
                Err(e) => {
                    warn!("Analysis failed for {}: {}", entity_id, e);
                    Ok(None)
                }
            })
            .collect::<EngineResult<_>>()?;

        let assessments: Vec<RiskAssessment> = results.into_iter().flatten().collect();
        info!("Analyzed {} of {} entities", assessments.len(), entities.len());
        Ok(assessments)
    }
}
