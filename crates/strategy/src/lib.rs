pub mod evaluator;
pub mod indicators;

pub use evaluator::{EvaluatorConfig, SignalEvaluator};
