//! Bounded error-recovery loop.
//!
//! A failed first execution enters the loop. Each attempt asks the repair collaborator
//! for new code, runs it once and classifies the result. The loop ends `Recovered` on
//! the first success or `Exhausted` after `max_attempts` failures. Fix quality compares
//! each attempt's error category with the one before it (the initial failure counts
//! as attempt 0).

use crate::collaborators::{CodeExecutor, CodeRepairer, RepairRequest};
use crate::error::EngineError;
use crate::models::{DatasetSchema, ErrorCategory, ExecutionOutcome};
use serde::{Deserialize, Serialize};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

const SUCCESS_RATE_WEIGHT: f64 = 0.5;
const FIX_QUALITY_WEIGHT: f64 = 0.3;
const ATTEMPTS_MADE_WEIGHT: f64 = 0.2;
/// Attempts at which the attempts-made component saturates
const ATTEMPTS_SATURATION: f64 = 3.0;

const FIX_SUCCEEDED: f64 = 1.0;
const FIX_CHANGED_CATEGORY: f64 = 0.5;
const FIX_NO_PROGRESS: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    Idle,
    Attempting(u32),
    Recovered,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    /// 1-based
    pub attempt: u32,
    pub success: bool,
    /// Category of the failure; `None` on success
    pub category: Option<ErrorCategory>,
    pub fix_quality: f64,
    /// Code produced by the repair collaborator, when it produced any
    pub code: Option<String>,
    pub error_message: Option<String>,
    pub elapsed_seconds: Option<f64>,
    #[serde(default)]
    pub timed_out: bool,
}

/// Recovery dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryBlock {
    pub initial_error: String,
    pub initial_category: ErrorCategory,
    pub state: RecoveryState,
    pub attempts: Vec<RecoveryAttempt>,
    pub recovery_success: bool,
    pub recovery_success_rate: f64,
    pub error_fix_quality: f64,
    pub attempts_made_score: f64,
    pub recovery_score: f64,
}

impl RecoveryBlock {
    pub fn successful_attempts(&self) -> usize {
        self.attempts.iter().filter(|a| a.success).count()
    }
}

/// Explicit state machine; the controller drives it, tests can drive it directly
#[derive(Debug)]
pub struct RecoveryMachine {
    max_attempts: u32,
    state: RecoveryState,
    initial_error: String,
    initial_category: ErrorCategory,
    previous_category: ErrorCategory,
    attempts: Vec<RecoveryAttempt>,
}

impl RecoveryMachine {
    pub fn new(initial_error: &str, max_attempts: u32) -> Self {
        let initial_category = ErrorCategory::classify(initial_error);
        Self {
            max_attempts,
            state: RecoveryState::Idle,
            initial_error: initial_error.to_string(),
            initial_category,
            previous_category: initial_category,
            attempts: Vec::new(),
        }
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    /// Advance to the next attempt, or `None` once the loop has ended
    pub fn next_attempt(&mut self) -> Option<u32> {
        let next = match self.state {
            RecoveryState::Idle => 1,
            RecoveryState::Attempting(current) => current + 1,
            RecoveryState::Recovered | RecoveryState::Exhausted => return None,
        };
        if next > self.max_attempts {
            self.state = RecoveryState::Exhausted;
            return None;
        }
        self.state = RecoveryState::Attempting(next);
        Some(next)
    }

    fn current_attempt(&self) -> u32 {
        match self.state {
            RecoveryState::Attempting(current) => current,
            _ => self.attempts.len() as u32 + 1,
        }
    }

    fn finish_failure(&mut self, attempt: RecoveryAttempt) {
        if let Some(category) = attempt.category {
            self.previous_category = category;
        }
        let number = attempt.attempt;
        let timed_out = attempt.timed_out;
        self.attempts.push(attempt);
        if timed_out || number >= self.max_attempts {
            self.state = RecoveryState::Exhausted;
        }
    }

    pub fn record_success(&mut self, code: String, outcome: &ExecutionOutcome) {
        self.attempts.push(RecoveryAttempt {
            attempt: self.current_attempt(),
            success: true,
            category: None,
            fix_quality: FIX_SUCCEEDED,
            code: Some(code),
            error_message: None,
            elapsed_seconds: outcome.elapsed_seconds,
            timed_out: false,
        });
        self.state = RecoveryState::Recovered;
    }

    /// Repaired code ran and failed
    pub fn record_failure(&mut self, code: String, outcome: &ExecutionOutcome) {
        let category = ErrorCategory::classify(outcome.error_text());
        let fix_quality = if category != self.previous_category {
            FIX_CHANGED_CATEGORY
        } else {
            FIX_NO_PROGRESS
        };
        self.finish_failure(RecoveryAttempt {
            attempt: self.current_attempt(),
            success: false,
            category: Some(category),
            fix_quality,
            code: Some(code),
            error_message: Some(outcome.error_text().to_string()),
            elapsed_seconds: outcome.elapsed_seconds,
            timed_out: false,
        });
    }

    /// A collaborator could not be reached; counts as an attempt that made no progress
    pub fn record_unavailable(&mut self, code: Option<String>, error: &EngineError) {
        self.finish_failure(RecoveryAttempt {
            attempt: self.current_attempt(),
            success: false,
            category: Some(ErrorCategory::Other),
            fix_quality: FIX_NO_PROGRESS,
            code,
            error_message: Some(error.to_string()),
            elapsed_seconds: None,
            timed_out: false,
        });
    }

    /// The deadline hit mid-attempt; the loop ends here
    pub fn record_timeout(&mut self) {
        self.finish_failure(RecoveryAttempt {
            attempt: self.current_attempt(),
            success: false,
            category: Some(ErrorCategory::Other),
            fix_quality: FIX_NO_PROGRESS,
            code: None,
            error_message: Some(EngineError::DeadlineExceeded.to_string()),
            elapsed_seconds: None,
            timed_out: true,
        });
    }

    pub fn finish(mut self) -> RecoveryBlock {
        if !matches!(self.state, RecoveryState::Recovered) {
            self.state = RecoveryState::Exhausted;
        }

        let attempts = self.attempts.len();
        let (recovery_success_rate, error_fix_quality, attempts_made_score, recovery_score) =
            if attempts == 0 {
                (0.0, 0.0, 0.0, 0.0)
            } else {
                let n = attempts as f64;
                let rate = self.attempts.iter().filter(|a| a.success).count() as f64 / n;
                let fix = self.attempts.iter().map(|a| a.fix_quality).sum::<f64>() / n;
                let made = (n / ATTEMPTS_SATURATION).min(1.0);
                let score = SUCCESS_RATE_WEIGHT * rate
                    + FIX_QUALITY_WEIGHT * fix
                    + ATTEMPTS_MADE_WEIGHT * made;
                (rate, fix, made, score)
            };

        RecoveryBlock {
            initial_error: self.initial_error,
            initial_category: self.initial_category,
            state: self.state,
            recovery_success: matches!(self.state, RecoveryState::Recovered),
            attempts: self.attempts,
            recovery_success_rate,
            error_fix_quality,
            attempts_made_score,
            recovery_score,
        }
    }
}

/// Result of the recovery loop: the block plus the working code when one was found
#[derive(Debug, Clone)]
pub struct RecoveryRun {
    pub block: RecoveryBlock,
    pub repaired: Option<(String, ExecutionOutcome)>,
}

enum StepResult {
    Ran(String, ExecutionOutcome),
    Unavailable(Option<String>, EngineError),
}

/// Drives a [`RecoveryMachine`] against the repair and execution collaborators
pub struct RecoveryController<'a> {
    executor: &'a dyn CodeExecutor,
    repairer: &'a dyn CodeRepairer,
    max_attempts: u32,
}

impl<'a> RecoveryController<'a> {
    pub fn new(
        executor: &'a dyn CodeExecutor,
        repairer: &'a dyn CodeRepairer,
        max_attempts: u32,
    ) -> Self {
        Self {
            executor,
            repairer,
            max_attempts,
        }
    }

    async fn step(&self, request: RepairRequest<'_>) -> StepResult {
        let code = match self.repairer.repair(&request).await {
            Ok(code) => code,
            Err(err) => return StepResult::Unavailable(None, err),
        };
        match self.executor.submit(&code).await {
            Ok(outcome) => StepResult::Ran(code, outcome),
            Err(err) => StepResult::Unavailable(Some(code), err),
        }
    }

    /// Run the loop for a failed first execution of `code`
    pub async fn run(
        &self,
        question: &str,
        code: &str,
        schema: &DatasetSchema,
        initial: &ExecutionOutcome,
        deadline: Option<Instant>,
    ) -> RecoveryRun {
        let mut machine = RecoveryMachine::new(initial.error_text(), self.max_attempts);
        let mut prior_code = code.to_string();
        let mut prior_error = initial.error_text().to_string();
        let mut repaired = None;

        while let Some(attempt) = machine.next_attempt() {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                warn!(attempt, "Evaluation deadline passed before recovery attempt");
                machine.record_timeout();
                break;
            }
            debug!(attempt, max_attempts = self.max_attempts, "Requesting repair");
            let request = RepairRequest {
                question,
                prior_code: &prior_code,
                error_message: &prior_error,
                schema,
            };

            let result = match deadline {
                Some(deadline) => match timeout_at(deadline, self.step(request)).await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(attempt, "Evaluation deadline passed during recovery");
                        machine.record_timeout();
                        break;
                    }
                },
                None => self.step(request).await,
            };

            match result {
                StepResult::Ran(new_code, outcome) if outcome.success => {
                    info!(attempt, "Recovered from execution error");
                    machine.record_success(new_code.clone(), &outcome);
                    repaired = Some((new_code, outcome));
                }
                StepResult::Ran(new_code, outcome) => {
                    debug!(attempt, error = outcome.error_text(), "Repaired code still fails");
                    prior_error = outcome.error_text().to_string();
                    prior_code = new_code.clone();
                    machine.record_failure(new_code, &outcome);
                }
                StepResult::Unavailable(new_code, err) => {
                    warn!(attempt, error = %err, "Collaborator unavailable during recovery");
                    if let Some(new_code) = &new_code {
                        prior_code = new_code.clone();
                    }
                    machine.record_unavailable(new_code, &err);
                }
            }
        }

        let block = machine.finish();
        debug!(state = ?block.state, score = block.recovery_score, "Recovery finished");
        RecoveryRun { block, repaired }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Hands out scripted repairs in order
    struct ScriptedRepairer {
        replies: Mutex<VecDeque<Result<String, EngineError>>>,
        seen: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedRepairer {
        fn new(replies: Vec<Result<String, EngineError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl CodeRepairer for ScriptedRepairer {
        async fn repair(&self, request: &RepairRequest<'_>) -> Result<String, EngineError> {
            self.seen
                .lock()
                .unwrap()
                .push((request.prior_code.to_string(), request.error_message.to_string()));
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(EngineError::RepairUnavailable("script ended".into())))
        }
    }

    /// Succeeds for code containing "ok", otherwise fails with the code as the message
    struct EchoExecutor;

    #[async_trait]
    impl CodeExecutor for EchoExecutor {
        async fn submit(&self, code: &str) -> Result<ExecutionOutcome, EngineError> {
            if code.contains("ok") {
                Ok(ExecutionOutcome::succeeded(0.01, None))
            } else {
                Ok(ExecutionOutcome::failed(code, Some(0.01)))
            }
        }
    }

    struct SlowRepairer;

    #[async_trait]
    impl CodeRepairer for SlowRepairer {
        async fn repair(&self, _request: &RepairRequest<'_>) -> Result<String, EngineError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok("ok".to_string())
        }
    }

    fn initial() -> ExecutionOutcome {
        ExecutionOutcome::failed("KeyError: 'Sales'", Some(0.01))
    }

    async fn run(repairer: &dyn CodeRepairer, max_attempts: u32) -> RecoveryRun {
        RecoveryController::new(&EchoExecutor, repairer, max_attempts)
            .run(
                "total sales",
                "result = df['Sales'].sum()",
                &DatasetSchema::default(),
                &initial(),
                None,
            )
            .await
    }

    #[test]
    fn test_machine_bounds_attempts() {
        let mut machine = RecoveryMachine::new("KeyError: 'x'", 2);
        assert_eq!(machine.state(), RecoveryState::Idle);
        assert_eq!(machine.next_attempt(), Some(1));
        machine.record_unavailable(None, &EngineError::RepairUnavailable("down".into()));
        assert_eq!(machine.state(), RecoveryState::Attempting(1));
        assert_eq!(machine.next_attempt(), Some(2));
        machine.record_unavailable(None, &EngineError::RepairUnavailable("down".into()));
        assert_eq!(machine.state(), RecoveryState::Exhausted);
        assert_eq!(machine.next_attempt(), None);
    }

    #[test]
    fn test_zero_attempts_scores_zero() {
        let mut machine = RecoveryMachine::new("TypeError", 0);
        assert_eq!(machine.next_attempt(), None);
        let block = machine.finish();
        assert_eq!(block.state, RecoveryState::Exhausted);
        assert!(block.attempts.is_empty());
        assert_eq!(block.recovery_score, 0.0);
    }

    #[tokio::test]
    async fn test_same_category_twice_exhausts_with_low_fix_quality() {
        let repairer = ScriptedRepairer::new(vec![
            Ok("KeyError: 'sales_total'".to_string()),
            Ok("KeyError: 'total'".to_string()),
        ]);
        let run = run(&repairer, 2).await;
        let block = run.block;

        assert_eq!(block.initial_category, ErrorCategory::Column);
        assert_eq!(block.state, RecoveryState::Exhausted);
        assert_eq!(block.attempts.len(), 2);
        assert!(block.attempts.iter().all(|a| a.fix_quality == 0.1));
        assert!(!block.recovery_success);
        assert_eq!(block.recovery_success_rate, 0.0);
        assert!((block.error_fix_quality - 0.1).abs() < 1e-9);
        // 0.3 * 0.1 + 0.2 * 2/3
        assert!((block.recovery_score - (0.03 + 0.2 * 2.0 / 3.0)).abs() < 1e-9);
        assert!(run.repaired.is_none());
    }

    #[tokio::test]
    async fn test_fail_then_recover() {
        let repairer = ScriptedRepairer::new(vec![
            Ok("TypeError: unsupported operand".to_string()),
            Ok("result = 'ok'".to_string()),
        ]);
        let run = run(&repairer, 2).await;
        let block = &run.block;

        assert_eq!(block.state, RecoveryState::Recovered);
        assert!(block.recovery_success);
        assert_eq!(block.attempts[0].fix_quality, 0.5);
        assert_eq!(block.attempts[0].category, Some(ErrorCategory::Type));
        assert_eq!(block.attempts[1].fix_quality, 1.0);
        assert_eq!(block.recovery_success_rate, 0.5);
        assert!((block.attempts_made_score - 2.0 / 3.0).abs() < 1e-9);
        assert!((block.error_fix_quality - 0.75).abs() < 1e-9);

        let (code, outcome) = run.repaired.as_ref().unwrap();
        assert_eq!(code, "result = 'ok'");
        assert!(outcome.success);
    }

    #[tokio::test]
    async fn test_each_request_carries_latest_code_and_error() {
        let repairer = ScriptedRepairer::new(vec![
            Ok("TypeError: bad".to_string()),
            Ok("result = 'ok'".to_string()),
        ]);
        run(&repairer, 2).await;

        let seen = repairer.seen.lock().unwrap();
        assert_eq!(seen[0].0, "result = df['Sales'].sum()");
        assert_eq!(seen[0].1, "KeyError: 'Sales'");
        assert_eq!(seen[1].0, "TypeError: bad");
        assert_eq!(seen[1].1, "TypeError: bad");
    }

    #[tokio::test]
    async fn test_first_attempt_success_stops_loop() {
        let repairer = ScriptedRepairer::new(vec![Ok("ok".to_string())]);
        let run = run(&repairer, 5).await;
        assert_eq!(run.block.attempts.len(), 1);
        assert_eq!(run.block.recovery_success_rate, 1.0);
        // 0.5 + 0.3 + 0.2 * 1/3
        assert!((run.block.recovery_score - (0.8 + 0.2 / 3.0)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unreachable_repairer_is_non_progress() {
        let repairer = ScriptedRepairer::new(vec![
            Err(EngineError::RepairUnavailable("connection refused".into())),
            Err(EngineError::RepairUnavailable("connection refused".into())),
        ]);
        let run = run(&repairer, 2).await;
        let block = run.block;

        assert_eq!(block.state, RecoveryState::Exhausted);
        assert_eq!(block.attempts.len(), 2);
        for attempt in &block.attempts {
            assert_eq!(attempt.category, Some(ErrorCategory::Other));
            assert_eq!(attempt.fix_quality, 0.1);
            assert!(attempt.code.is_none());
        }
    }

    #[tokio::test]
    async fn test_deadline_marks_attempt_timed_out() {
        let controller = RecoveryController::new(&EchoExecutor, &SlowRepairer, 2);
        let deadline = Instant::now() + Duration::from_millis(50);
        let run = controller
            .run("q", "code", &DatasetSchema::default(), &initial(), Some(deadline))
            .await;

        assert_eq!(run.block.state, RecoveryState::Exhausted);
        assert_eq!(run.block.attempts.len(), 1);
        let attempt = &run.block.attempts[0];
        assert!(attempt.timed_out);
        assert_eq!(attempt.category, Some(ErrorCategory::Other));
        assert_eq!(attempt.fix_quality, 0.1);
        assert!(run.repaired.is_none());
    }

    #[tokio::test]
    async fn test_attempts_never_exceed_max() {
        for max_attempts in 0..4 {
            let repairer = ScriptedRepairer::new(
                (0..10).map(|i| Ok(format!("ValueError {i}"))).collect(),
            );
            let run = run(&repairer, max_attempts).await;
            assert!(run.block.attempts.len() <= max_attempts as usize);
            assert_eq!(run.block.attempts.len(), max_attempts as usize);
        }
    }
}
