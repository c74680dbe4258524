//! Training Module - Orchestrator
//!
//! End-to-end training runs: features, labels, candidate fits with
//! hyperparameter search, and the run records the evaluator ranks later.

pub mod search;
pub mod pipeline;


pub use search::{random_search, train_validation_split, IntRange, SearchConfig, SearchResult, SearchSpace, Trial};
pub use pipeline::{
    feature_importance_report, CandidateArtifact, CandidateModel, CandidateOutcome, CandidateReport,
    PipelineConfig, PipelineReport, TrainingPipeline, TrainingScope, ALGORITHM_ISOLATION_FOREST,
    ALGORITHM_RANDOM_FOREST,
};
