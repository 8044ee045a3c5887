//! Evaluation engine: runs recovery when the first execution failed, scores every
//! dimension on the final code and combines them into one record.

use crate::aggregate::DimensionScores;
use crate::collaborators::{CodeExecutor, CodeRepairer};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::{Diagnostic, Dimension, EvaluationInput, EvaluationRecord, ExecutionOutcome};
use crate::patterns::TABLES_VERSION;
use crate::recovery::{DEFAULT_MAX_ATTEMPTS, RecoveryController, RecoveryRun};
use crate::{correctness, coverage, intent, performance, quality};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub max_attempts: u32,
    /// Bound on one whole evaluation, recovery included
    pub timeout: Option<Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timeout: None,
        }
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            timeout: config.timeout(),
        }
    }
}

/// Scores generated code. Cheap to share; holds only collaborator handles.
#[derive(Clone)]
pub struct Evaluator {
    executor: Arc<dyn CodeExecutor>,
    repairer: Arc<dyn CodeRepairer>,
    settings: EngineSettings,
}

impl Evaluator {
    pub fn new(
        executor: Arc<dyn CodeExecutor>,
        repairer: Arc<dyn CodeRepairer>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            executor,
            repairer,
            settings,
        }
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    fn deadline(&self) -> Option<Instant> {
        self.settings.timeout.map(|timeout| Instant::now() + timeout)
    }

    /// Execute the input code once, then evaluate it
    pub async fn evaluate_fresh(&self, input: &EvaluationInput) -> EvaluationRecord {
        let deadline = self.deadline();
        let submitted = self.executor.submit(&input.code);
        let result = match deadline {
            Some(deadline) => timeout_at(deadline, submitted)
                .await
                .unwrap_or(Err(EngineError::DeadlineExceeded)),
            None => submitted.await,
        };
        let first = result.unwrap_or_else(|err| {
            warn!(error = %err, "First execution did not run");
            ExecutionOutcome::failed(err.to_string(), None)
        });
        self.evaluate_until(input, first, deadline).await
    }

    /// Evaluate code whose first execution outcome is already known
    pub async fn evaluate(
        &self,
        input: &EvaluationInput,
        first: ExecutionOutcome,
    ) -> EvaluationRecord {
        self.evaluate_until(input, first, self.deadline()).await
    }

    async fn evaluate_until(
        &self,
        input: &EvaluationInput,
        first: ExecutionOutcome,
        deadline: Option<Instant>,
    ) -> EvaluationRecord {
        info!(model = %input.model, success = first.success, "Evaluating generated code");
        let mut diagnostics = Vec::new();
        if input.code.trim().is_empty() {
            diagnostics.push(Diagnostic::new(Dimension::Correctness, "empty code"));
        }
        if input.question.trim().is_empty() {
            diagnostics.push(Diagnostic::new(Dimension::Understanding, "empty question"));
        }

        let recovery = if first.success {
            None
        } else {
            let controller = RecoveryController::new(
                self.executor.as_ref(),
                self.repairer.as_ref(),
                self.settings.max_attempts,
            );
            Some(
                controller
                    .run(&input.question, &input.code, &input.schema, &first, deadline)
                    .await,
            )
        };

        let (recovery, repaired) = match recovery {
            Some(RecoveryRun { block, repaired }) => (Some(block), repaired),
            None => (None, None),
        };
        let (code, execution) = repaired.unwrap_or_else(|| (input.code.clone(), first));

        let correctness = correctness::score(&code, &execution, input.expected.as_ref());
        let quality = quality::score(&code);
        let performance = performance::score(&code, &execution, input.dataset_size_mb);
        let understanding = match intent::score(&input.question, &code, &input.schema) {
            Ok(block) => Some(block),
            Err(err) => {
                warn!(error = %err, "Understanding dimension unavailable");
                diagnostics.push(Diagnostic::new(Dimension::Understanding, err.to_string()));
                None
            }
        };
        let coverage = coverage::score(&input.question, &code, &input.schema);

        let overall_score = DimensionScores {
            correctness: correctness.correctness_score,
            quality: quality.quality_score,
            performance: performance.performance_score,
            understanding: understanding.as_ref().map(|u| u.understanding_score),
            coverage: coverage.coverage_score,
            recovery: recovery.as_ref().map(|r| r.recovery_score),
        }
        .overall_score();
        debug!(overall_score, "Evaluation scored");

        EvaluationRecord {
            timestamp: Utc::now(),
            model: input.model.clone(),
            question: input.question.clone(),
            code,
            execution,
            correctness,
            quality,
            performance,
            understanding,
            coverage,
            recovery,
            overall_score,
            diagnostics,
            tables_version: TABLES_VERSION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{RepairRequest, UnconfiguredExecutor, UnconfiguredRepairer};
    use crate::models::DatasetSchema;
    use crate::recovery::RecoveryState;
    use async_trait::async_trait;

    struct FixedRepairer(&'static str);

    #[async_trait]
    impl CodeRepairer for FixedRepairer {
        async fn repair(&self, _request: &RepairRequest<'_>) -> Result<String, EngineError> {
            Ok(self.0.to_string())
        }
    }

    struct AlwaysSucceeds;

    #[async_trait]
    impl CodeExecutor for AlwaysSucceeds {
        async fn submit(&self, _code: &str) -> Result<ExecutionOutcome, EngineError> {
            Ok(ExecutionOutcome::succeeded(0.05, None))
        }
    }

    struct NeverReturns;

    #[async_trait]
    impl CodeExecutor for NeverReturns {
        async fn submit(&self, _code: &str) -> Result<ExecutionOutcome, EngineError> {
            std::future::pending().await
        }
    }

    fn input(code: &str) -> EvaluationInput {
        EvaluationInput {
            model: "gpt-4".to_string(),
            question: "What is the average sales per region?".to_string(),
            code: code.to_string(),
            schema: DatasetSchema::new([("region", "object"), ("sales", "int64")]),
            dataset_size_mb: None,
            expected: None,
        }
    }

    fn evaluator(
        executor: impl CodeExecutor + 'static,
        repairer: impl CodeRepairer + 'static,
    ) -> Evaluator {
        Evaluator::new(Arc::new(executor), Arc::new(repairer), EngineSettings::default())
    }

    #[tokio::test]
    async fn test_first_attempt_success_has_no_recovery() {
        let engine = evaluator(UnconfiguredExecutor, UnconfiguredRepairer);
        let record = engine
            .evaluate(
                &input("# average per region\nresult = df.groupby('region')['sales'].mean()"),
                ExecutionOutcome::succeeded(0.05, None),
            )
            .await;

        assert!(record.recovery.is_none());
        assert_eq!(record.correctness.correctness_score, 1.0);
        assert!(record.understanding.is_some());
        assert!(record.diagnostics.is_empty());
        assert_eq!(record.tables_version, TABLES_VERSION);
        let expected = DimensionScores {
            correctness: record.correctness.correctness_score,
            quality: record.quality.quality_score,
            performance: record.performance.performance_score,
            understanding: record.understanding.as_ref().map(|u| u.understanding_score),
            coverage: record.coverage.coverage_score,
            recovery: None,
        }
        .overall_score();
        assert_eq!(record.overall_score, expected);
    }

    #[tokio::test]
    async fn test_recovered_record_scores_repaired_code() {
        let fixed = "result = df.groupby('region')['sales'].mean()";
        let engine = evaluator(AlwaysSucceeds, FixedRepairer(fixed));
        let record = engine
            .evaluate(
                &input("result = df.groupby('Region')['Sales'].mean()"),
                ExecutionOutcome::failed("KeyError: 'Sales'", Some(0.01)),
            )
            .await;

        let recovery = record.recovery.as_ref().unwrap();
        assert_eq!(recovery.state, RecoveryState::Recovered);
        assert_eq!(record.code, fixed);
        assert!(record.execution.success);
        assert_eq!(record.correctness.correctness_score, 1.0);
    }

    #[tokio::test]
    async fn test_unconfigured_collaborators_still_emit_record() {
        let engine = evaluator(UnconfiguredExecutor, UnconfiguredRepairer);
        let record = engine
            .evaluate(
                &input("result = df['Sales'].mean()"),
                ExecutionOutcome::failed("KeyError: 'Sales'", Some(0.01)),
            )
            .await;

        let recovery = record.recovery.as_ref().unwrap();
        assert_eq!(recovery.state, RecoveryState::Exhausted);
        assert_eq!(recovery.attempts.len(), 2);
        assert!(!record.execution.success);
        assert_eq!(record.correctness.correctness_score, 0.5);
        assert!((0.0..=1.0).contains(&record.overall_score));
    }

    #[tokio::test]
    async fn test_malformed_schema_drops_understanding() {
        let engine = evaluator(UnconfiguredExecutor, UnconfiguredRepairer);
        let mut bad = input("result = df['sales'].sum()");
        bad.schema = DatasetSchema::new([("sales", "int64"), ("Sales", "int64")]);

        let record = engine
            .evaluate(&bad, ExecutionOutcome::succeeded(0.05, None))
            .await;

        assert!(record.understanding.is_none());
        assert_eq!(record.diagnostics.len(), 1);
        assert_eq!(record.diagnostics[0].dimension, Dimension::Understanding);
        let expected = DimensionScores {
            correctness: record.correctness.correctness_score,
            quality: record.quality.quality_score,
            performance: record.performance.performance_score,
            understanding: None,
            coverage: record.coverage.coverage_score,
            recovery: None,
        }
        .overall_score();
        assert_eq!(record.overall_score, expected);
    }

    #[tokio::test]
    async fn test_empty_code_is_flagged() {
        let engine = evaluator(UnconfiguredExecutor, UnconfiguredRepairer);
        let record = engine
            .evaluate(&input("  "), ExecutionOutcome::succeeded(0.0, None))
            .await;
        assert!(!record.correctness.syntax_valid);
        assert!(
            record
                .diagnostics
                .iter()
                .any(|d| d.dimension == Dimension::Correctness)
        );
    }

    #[tokio::test]
    async fn test_timeout_still_emits_record() {
        let engine = Evaluator::new(
            Arc::new(NeverReturns),
            Arc::new(FixedRepairer("result = 1")),
            EngineSettings {
                max_attempts: 2,
                timeout: Some(Duration::from_millis(50)),
            },
        );
        let record = engine
            .evaluate(
                &input("result = df['Sales'].mean()"),
                ExecutionOutcome::failed("KeyError: 'Sales'", None),
            )
            .await;

        let recovery = record.recovery.as_ref().unwrap();
        assert_eq!(recovery.state, RecoveryState::Exhausted);
        assert_eq!(recovery.attempts.len(), 1);
        assert!(recovery.attempts[0].timed_out);
    }

    #[tokio::test]
    async fn test_fresh_evaluation_runs_executor() {
        let engine = evaluator(AlwaysSucceeds, UnconfiguredRepairer);
        let record = engine
            .evaluate_fresh(&input("result = df['sales'].mean()"))
            .await;
        assert!(record.execution.success);
        assert!(record.recovery.is_none());
    }

    #[tokio::test]
    async fn test_fresh_evaluation_with_unreachable_executor() {
        let engine = evaluator(UnconfiguredExecutor, UnconfiguredRepairer);
        let record = engine
            .evaluate_fresh(&input("result = df['sales'].mean()"))
            .await;
        assert!(!record.execution.success);
        assert!(record.execution.error_text().contains("executor unavailable"));
        assert_eq!(
            record.recovery.as_ref().unwrap().initial_category,
            crate::models::ErrorCategory::Other
        );
    }
}
