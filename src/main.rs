//! Predictive Maintenance - Batch Entry Point
//!
//! Trains on the telemetry file, promotes the best run, then scores every
//! machine and prints the maintenance report. Pass `--per-entity` to train
//! one model per machine instead of a pooled one.

use std::sync::Arc;

use log::{error, info, warn};

use maintenance_core::api::MaintenanceService;
use maintenance_core::constants::{APP_NAME, APP_VERSION};
use maintenance_core::logic::evaluation::ModelEvaluator;
use maintenance_core::logic::features::FeatureEngine;
use maintenance_core::logic::lifecycle::LifecycleManager;
use maintenance_core::logic::risk::{RiskAssessment, RiskLevel};
use maintenance_core::logic::store::{
    InMemoryRegistry, JsonFileTracker, JsonlTelemetryStore, TelemetryStore,
};
use maintenance_core::logic::training::{
    CandidateOutcome, PipelineReport, TrainingPipeline, TrainingScope,
};
use maintenance_core::{EngineConfig, EngineResult};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Starting {} v{}", APP_NAME, APP_VERSION);

    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> EngineResult<()> {
    let config = EngineConfig::from_env();
    config.validate()?;
    let per_entity = std::env::args().any(|a| a == "--per-entity");

    info!("Telemetry: {}", config.telemetry_path.display());
    info!("Tracking: {}", config.tracking_dir.display());

    let telemetry: Arc<dyn TelemetryStore> = Arc::new(JsonlTelemetryStore::open(&config.telemetry_path)?);
    let tracker = Arc::new(JsonFileTracker::open(&config.tracking_dir)?);
    let registry = Arc::new(InMemoryRegistry::new());
    let engine = FeatureEngine::new(config.features.clone())?;

    let pipeline = Arc::new(TrainingPipeline::new(
        config.pipeline.clone(),
        engine.clone(),
        telemetry.clone(),
        tracker.clone(),
    ));
    let lifecycle = Arc::new(LifecycleManager::new(config.lifecycle.clone(), engine, telemetry));
    let service = MaintenanceService::new(lifecycle).with_pipeline(pipeline.clone());

    // Training
    let report = if per_entity {
        let pipeline = pipeline.clone();
        let report = tokio::task::spawn_blocking(move || pipeline.run_per_entity()).await??;
        for (scope, artifact) in report.anomaly_artifacts() {
            if let Some(entity_id) = scope.entity_id() {
                service.lifecycle().install(entity_id, artifact.clone())?;
            }
        }
        report
    } else {
        service.run_pipeline(TrainingScope::All).await?
    };
    print_training(&report);

    // Promotion
    let evaluator = ModelEvaluator::new(config.evaluator.clone(), tracker, registry);
    match evaluator.register_best(&config.evaluator.experiment, &config.evaluator.model_name)? {
        Some((run, version)) => println!(
            "Promoted {} run {} (f1 {:.4}) as {} v{}",
            run.algorithm,
            run.run_id,
            run.metric("f1").unwrap_or(0.0),
            version.name,
            version.version
        ),
        None => warn!("No runs to promote"),
    }

    // Serving
    let mut assessments = service.analyze_all().await?;
    assessments.sort_by(|a, b| {
        b.risk_level
            .severity()
            .cmp(&a.risk_level.severity())
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    print_assessments(&assessments);
    Ok(())
}

fn print_training(report: &PipelineReport) {
    println!();
    println!("=== TRAINING ({} rows, {} failures labelled) ===", report.n_rows, report.n_positive);
    for candidate in &report.candidates {
        let outcome = match &candidate.outcome {
            CandidateOutcome::Trained { run_id } => format!("trained  {}", run_id),
            CandidateOutcome::Skipped { reason } => format!("skipped  {}", reason),
            CandidateOutcome::Failed { error } => format!("FAILED   {}", error),
        };
        println!("{:<12} {:<18} {}", candidate.scope.label(), candidate.algorithm, outcome);
    }
}

fn print_assessments(assessments: &[RiskAssessment]) {
    println!();
    println!("=== MAINTENANCE REPORT ({} machines) ===", assessments.len());
    for a in assessments {
        println!(
            "{:<12} {:<9} score {:>8.4}  {}",
            a.entity_id,
            a.risk_level.as_str(),
            a.anomaly_score,
            a.recommendation
        );
    }

    let urgent = assessments
        .iter()
        .filter(|a| matches!(a.risk_level, RiskLevel::Critical | RiskLevel::High))
        .count();
    println!();
    println!("{} machine(s) need maintenance within 24 hours", urgent);
}
