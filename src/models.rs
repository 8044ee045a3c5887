use crate::correctness::CorrectnessBlock;
use crate::coverage::CoverageBlock;
use crate::error::EngineError;
use crate::intent::UnderstandingBlock;
use crate::patterns::ERROR_CATEGORY_RULES;
use crate::performance::PerformanceBlock;
use crate::quality::QualityBlock;
use crate::recovery::RecoveryBlock;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Coarse asymptotic bucket, ordered from cheapest to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ComplexityClass {
    #[serde(rename = "O(1)")]
    Constant,
    #[serde(rename = "O(log n)")]
    Logarithmic,
    #[serde(rename = "O(n)")]
    Linear,
    #[serde(rename = "O(n log n)")]
    Linearithmic,
    #[serde(rename = "O(n²)")]
    Quadratic,
    #[serde(rename = "O(n³)")]
    Cubic,
}

impl ComplexityClass {
    pub const ALL: [ComplexityClass; 6] = [
        ComplexityClass::Constant,
        ComplexityClass::Logarithmic,
        ComplexityClass::Linear,
        ComplexityClass::Linearithmic,
        ComplexityClass::Quadratic,
        ComplexityClass::Cubic,
    ];

    /// Fixed score in [0.1, 1.0], decreasing with severity
    pub fn score(self) -> f64 {
        match self {
            ComplexityClass::Constant => 1.0,
            ComplexityClass::Logarithmic => 0.9,
            ComplexityClass::Linear => 0.7,
            ComplexityClass::Linearithmic => 0.5,
            ComplexityClass::Quadratic => 0.3,
            ComplexityClass::Cubic => 0.1,
        }
    }

    /// Floor implied by explicit loop nesting
    pub fn from_loop_depth(depth: usize) -> Self {
        match depth {
            0 => ComplexityClass::Constant,
            1 => ComplexityClass::Linear,
            2 => ComplexityClass::Quadratic,
            _ => ComplexityClass::Cubic,
        }
    }

    pub fn notation(self) -> &'static str {
        match self {
            ComplexityClass::Constant => "O(1)",
            ComplexityClass::Logarithmic => "O(log n)",
            ComplexityClass::Linear => "O(n)",
            ComplexityClass::Linearithmic => "O(n log n)",
            ComplexityClass::Quadratic => "O(n²)",
            ComplexityClass::Cubic => "O(n³)",
        }
    }
}

impl fmt::Display for ComplexityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.notation())
    }
}

/// Error taxonomy used to track recovery progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Column,
    Syntax,
    Type,
    Index,
    Attribute,
    Value,
    Other,
}

impl ErrorCategory {
    /// Ordered substring match over the lowercased message, first rule wins
    pub fn classify(message: &str) -> Self {
        let lowered = message.to_lowercase();
        ERROR_CATEGORY_RULES
            .iter()
            .find(|(_, needles)| needles.iter().any(|needle| lowered.contains(needle)))
            .map(|(category, _)| *category)
            .unwrap_or(ErrorCategory::Other)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Column => "column",
            ErrorCategory::Syntax => "syntax",
            ErrorCategory::Type => "type",
            ErrorCategory::Index => "index",
            ErrorCategory::Attribute => "attribute",
            ErrorCategory::Value => "value",
            ErrorCategory::Other => "other",
        };
        f.write_str(name)
    }
}

/// A dataset column as reported by the upload collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    /// Inferred type, e.g. "int64" or "object"
    #[serde(default)]
    pub dtype: String,
}

/// Ordered dataset schema
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetSchema {
    pub columns: Vec<Column>,
}

impl DatasetSchema {
    /// Build a schema from `(name, dtype)` pairs
    pub fn new<'a>(columns: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            columns: columns
                .into_iter()
                .map(|(name, dtype)| Column {
                    name: name.to_string(),
                    dtype: dtype.to_string(),
                })
                .collect(),
        }
    }

    /// Column names in schema order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Reject blank and duplicate (case-insensitive) column names
    pub fn validate(&self) -> Result<(), EngineError> {
        let mut seen = HashSet::new();
        for (position, column) in self.columns.iter().enumerate() {
            let name = column.name.trim();
            if name.is_empty() {
                return Err(EngineError::MalformedSchema(format!(
                    "column {} has a blank name",
                    position + 1
                )));
            }
            if !seen.insert(name.to_lowercase()) {
                return Err(EngineError::MalformedSchema(format!(
                    "duplicate column name '{name}'"
                )));
            }
        }
        Ok(())
    }
}

/// Value produced by executed code
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ExecutionValue {
    Number(f64),
    Table {
        columns: Vec<String>,
        rows: Vec<Vec<serde_json::Value>>,
    },
    Text(String),
    Chart,
}

/// What the executor adapter reports for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub elapsed_seconds: Option<f64>,
    #[serde(default)]
    pub result: Option<ExecutionValue>,
}

impl ExecutionOutcome {
    pub fn succeeded(elapsed_seconds: f64, result: Option<ExecutionValue>) -> Self {
        Self {
            success: true,
            error_message: None,
            elapsed_seconds: Some(elapsed_seconds),
            result,
        }
    }

    pub fn failed(error_message: impl Into<String>, elapsed_seconds: Option<f64>) -> Self {
        Self {
            success: false,
            error_message: Some(error_message.into()),
            elapsed_seconds,
            result: None,
        }
    }

    /// Error text, empty when the run succeeded without one
    pub fn error_text(&self) -> &str {
        self.error_message.as_deref().unwrap_or("")
    }
}

/// Immutable input shared by every scorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationInput {
    pub model: String,
    pub question: String,
    pub code: String,
    #[serde(default)]
    pub schema: DatasetSchema,
    /// Dataset size hint for memory estimation
    #[serde(default)]
    pub dataset_size_mb: Option<f64>,
    #[serde(default)]
    pub expected: Option<ExecutionValue>,
}

/// The six scored dimensions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Correctness,
    Quality,
    Performance,
    Understanding,
    Coverage,
    Recovery,
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Dimension::Correctness => "correctness",
            Dimension::Quality => "quality",
            Dimension::Performance => "performance",
            Dimension::Understanding => "understanding",
            Dimension::Coverage => "coverage",
            Dimension::Recovery => "recovery",
        };
        f.write_str(name)
    }
}

/// Flag attached to a record when an input problem forced a degraded sub-score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub dimension: Dimension,
    pub message: String,
}

impl Diagnostic {
    pub fn new(dimension: Dimension, message: impl Into<String>) -> Self {
        Self {
            dimension,
            message: message.into(),
        }
    }
}

/// One scored question. Appended to a session log and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub question: String,
    /// Code that was finally scored (the repaired code when recovery succeeded)
    pub code: String,
    pub execution: ExecutionOutcome,
    pub correctness: CorrectnessBlock,
    pub quality: QualityBlock,
    pub performance: PerformanceBlock,
    /// Absent when the aligner could not run (malformed schema)
    pub understanding: Option<UnderstandingBlock>,
    pub coverage: CoverageBlock,
    /// Absent when the first execution succeeded
    pub recovery: Option<RecoveryBlock>,
    pub overall_score: f64,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
    pub tables_version: u32,
}
