use crate::complexity::{self, SpaceComplexity, TimeComplexity};
use crate::models::ExecutionOutcome;
use crate::patterns::{self, CONTROL_KEYWORDS};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Performance dimension: observed runtime plus inferred complexity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceBlock {
    pub code_length: usize,
    pub line_count: usize,
    /// Number of distinct control-structure keywords used
    pub control_structure_count: usize,
    pub execution_time_seconds: Option<f64>,
    pub execution_time_ms: Option<f64>,
    pub time_complexity: TimeComplexity,
    pub space_complexity: SpaceComplexity,
    pub performance_score: f64,
}

static CONTROL: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    CONTROL_KEYWORDS
        .iter()
        .map(|kw| patterns::compile(&format!(r"\b{kw}\b")))
        .collect()
});

const TIME_WEIGHT: f64 = 0.30;
const TIME_COMPLEXITY_WEIGHT: f64 = 0.30;
const SPACE_COMPLEXITY_WEIGHT: f64 = 0.20;
const SUCCESS_WEIGHT: f64 = 0.10;

/// Score elapsed time, falling back to code length when no timing is known
fn runtime_points(elapsed: Option<f64>, code_length: usize) -> f64 {
    match elapsed {
        Some(t) if t < 0.1 => TIME_WEIGHT,
        Some(t) if t < 1.0 => 0.25,
        Some(t) if t < 5.0 => 0.15,
        Some(_) => 0.05,
        None if code_length < 500 => 0.20,
        None if code_length < 1000 => 0.15,
        None => 0.10,
    }
}

fn length_points(code_length: usize) -> f64 {
    if code_length < 500 {
        0.10
    } else if code_length < 1000 {
        0.05
    } else {
        0.0
    }
}

/// Score the performance dimension for `code` and the outcome it produced
pub fn score(code: &str, outcome: &ExecutionOutcome, dataset_size_mb: Option<f64>) -> PerformanceBlock {
    let time_complexity = complexity::analyze_time(code);
    let space_complexity = complexity::analyze_space(code, dataset_size_mb);
    let code_length = code.chars().count();
    let line_count = code.lines().filter(|l| !l.trim().is_empty()).count();
    let control_structure_count = CONTROL.iter().filter(|re| re.is_match(code)).count();

    let elapsed = outcome.elapsed_seconds.filter(|t| t.is_finite() && *t >= 0.0);
    let mut performance_score = runtime_points(elapsed, code_length);
    performance_score += time_complexity.score * TIME_COMPLEXITY_WEIGHT;
    performance_score += space_complexity.score * SPACE_COMPLEXITY_WEIGHT;
    performance_score += length_points(code_length);
    if outcome.success {
        performance_score += SUCCESS_WEIGHT;
    }

    PerformanceBlock {
        code_length,
        line_count,
        control_structure_count,
        execution_time_seconds: elapsed,
        execution_time_ms: elapsed.map(|t| t * 1000.0),
        time_complexity,
        space_complexity,
        performance_score: performance_score.clamp(0.0, 1.0),
    }
}
