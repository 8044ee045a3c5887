//! Scores pandas code generated by language models across correctness, quality,
//! performance, question understanding, requirement coverage and error recovery.

pub mod aggregate;
pub mod collaborators;
pub mod complexity;
pub mod config;
pub mod correctness;
pub mod coverage;
pub mod engine;
pub mod error;
pub mod intent;
pub mod models;
pub mod output;
pub mod patterns;
pub mod performance;
pub mod quality;
pub mod recovery;
pub mod runner;
pub mod session;
pub mod syntax;

pub use engine::{EngineSettings, Evaluator};
pub use error::EngineError;
pub use models::{EvaluationInput, EvaluationRecord, ExecutionOutcome};
