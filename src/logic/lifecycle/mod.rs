//! Lifecycle Module - Per-entity model state
//!
//! Lazy training on first use, explicit retraining, bounded LRU caching
//! and the serving path (features → anomaly score → risk level).

pub mod manager;

#[cfg(test)]
mod tests;

pub use manager::{LifecycleConfig, LifecycleManager, ModelStatus};
