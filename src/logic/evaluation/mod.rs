//! Evaluation Module - Ranking and promotion of logged runs

pub mod evaluator;

#[cfg(test)]
mod tests;

pub use evaluator::{
    rank_runs, ComparisonRow, EvaluatorConfig, LoadedModel, ModelComparison, ModelEvaluator,
};
