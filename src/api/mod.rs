//! API Module
//!
//! Async facade over the blocking engines, for embedding behind an HTTP
//! layer or a scheduler.

pub mod service;

pub use service::MaintenanceService;
