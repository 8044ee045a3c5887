use crate::collaborators::{
    CodeExecutor, CodeRepairer, CommandExecutor, OpenAiRepairer, UnconfiguredExecutor,
    UnconfiguredRepairer,
};
use crate::config::{CaseConfig, Config};
use crate::engine::{EngineSettings, Evaluator};
use crate::models::EvaluationRecord;
use crate::session::{SessionRegistry, SessionStore, SummaryStatistics};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Records produced for one session during a run, with the session's summary afterwards
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub records: Vec<EvaluationRecord>,
    pub summary: SummaryStatistics,
}

/// Evaluates every case of a run file and appends the records to their sessions
pub struct Runner {
    config: Config,
    evaluator: Evaluator,
    registry: SessionRegistry,
}

impl Runner {
    /// Build collaborators and the session registry from `config`
    pub fn new(config: Config) -> Self {
        let executor: Arc<dyn CodeExecutor> = match &config.executor {
            Some(executor) => Arc::new(CommandExecutor::new(executor.clone())),
            None => Arc::new(UnconfiguredExecutor),
        };
        let repairer: Arc<dyn CodeRepairer> = match &config.repair {
            Some(repair) => Arc::new(OpenAiRepairer::new(repair.clone())),
            None => Arc::new(UnconfiguredRepairer),
        };
        Self::with_collaborators(config, executor, repairer)
    }

    pub fn with_collaborators(
        config: Config,
        executor: Arc<dyn CodeExecutor>,
        repairer: Arc<dyn CodeRepairer>,
    ) -> Self {
        let settings = EngineSettings::from(&config.engine);
        let store = config.engine.sessions_dir.as_ref().map(SessionStore::new);
        Self {
            evaluator: Evaluator::new(executor, repairer, settings),
            registry: SessionRegistry::new(store),
            config,
        }
    }

    /// Evaluate all cases, in file order, grouped by session in order of first appearance
    pub async fn run(&self) -> Vec<SessionReport> {
        let total = self.config.cases.len();
        let mut reports: Vec<SessionReport> = Vec::new();

        for (index, case) in self.config.cases.iter().enumerate() {
            info!(
                case = index + 1,
                total,
                session_id = %case.session_id,
                model = %case.model,
                "Evaluating case"
            );
            let record = self.evaluate_case(case).await;
            let stored = match self.registry.append(&case.session_id, record.clone()).await {
                Ok(summary) => {
                    debug!(
                        session_id = %case.session_id,
                        overall = record.overall_score,
                        entries = summary.total_entries,
                        "Case recorded"
                    );
                    Some(summary)
                }
                Err(err) => {
                    warn!(
                        session_id = %case.session_id,
                        error = %format!("{err:#}"),
                        "Failed to record case, keeping it in the report only"
                    );
                    None
                }
            };

            let slot = match reports.iter().position(|r| r.session_id == case.session_id) {
                Some(slot) => slot,
                None => {
                    reports.push(SessionReport {
                        session_id: case.session_id.clone(),
                        records: Vec::new(),
                        summary: SummaryStatistics::default(),
                    });
                    reports.len() - 1
                }
            };
            let report = &mut reports[slot];
            report.records.push(record);
            report.summary =
                stored.unwrap_or_else(|| SummaryStatistics::from_records(&report.records));
        }

        if let Some(dir) = &self.config.engine.sessions_dir {
            info!(sessions = reports.len(), dir = %dir, "Sessions stored");
        }
        reports
    }

    async fn evaluate_case(&self, case: &CaseConfig) -> EvaluationRecord {
        let input = case.to_input();
        match &case.outcome {
            Some(outcome) => self.evaluator.evaluate(&input, outcome.clone()).await,
            None => self.evaluator.evaluate_fresh(&input).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::models::{DatasetSchema, ExecutionOutcome};
    use crate::session::{METRICS_FILE, SUMMARY_FILE};
    use tempfile::tempdir;

    fn create_test_case(session_id: &str, code: &str, outcome: Option<ExecutionOutcome>) -> CaseConfig {
        CaseConfig {
            session_id: session_id.to_string(),
            model: "gpt-4".to_string(),
            question: "Show total sales by region".to_string(),
            code: code.to_string(),
            schema: DatasetSchema::new([("region", "object"), ("sales", "int64")]),
            dataset_size_mb: Some(1.0),
            expected: None,
            outcome,
        }
    }

    fn create_test_config(sessions_dir: Option<String>, cases: Vec<CaseConfig>) -> Config {
        Config {
            engine: EngineConfig {
                sessions_dir,
                ..EngineConfig::default()
            },
            repair: None,
            executor: None,
            cases,
        }
    }

    #[tokio::test]
    async fn test_run_groups_cases_by_session() {
        let ok = Some(ExecutionOutcome::succeeded(0.1, None));
        let config = create_test_config(
            None,
            vec![
                create_test_case("a", "result = df.groupby('region')['sales'].sum()", ok.clone()),
                create_test_case("b", "result = df['sales'].sum()", ok.clone()),
                create_test_case("a", "result = df.groupby('region').sales.sum()", ok),
            ],
        );

        let reports = Runner::new(config).run().await;

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].session_id, "a");
        assert_eq!(reports[0].records.len(), 2);
        assert_eq!(reports[0].summary.total_entries, 2);
        assert_eq!(reports[1].session_id, "b");
        assert_eq!(reports[1].summary.successful_executions, 1);
    }

    #[tokio::test]
    async fn test_case_without_outcome_uses_executor() {
        // no executor configured, so the fresh run fails and recovery cannot help
        let config = create_test_config(
            None,
            vec![create_test_case("s", "result = df['sales'].sum()", None)],
        );

        let reports = Runner::new(config).run().await;
        let record = &reports[0].records[0];

        assert!(!record.execution.success);
        assert!(record.recovery.is_some());
        assert_eq!(reports[0].summary.errors_encountered, 1);
    }

    #[tokio::test]
    async fn test_run_stores_sessions() {
        let temp_dir = tempdir().unwrap();
        let sessions_dir = temp_dir.path().join("sessions");
        let config = create_test_config(
            Some(sessions_dir.to_string_lossy().into_owned()),
            vec![create_test_case(
                "stored",
                "result = df.groupby('region')['sales'].sum()",
                Some(ExecutionOutcome::succeeded(0.1, None)),
            )],
        );

        Runner::new(config.clone()).run().await;
        assert!(sessions_dir.join("stored").join(METRICS_FILE).exists());
        assert!(sessions_dir.join("stored").join(SUMMARY_FILE).exists());

        // a second run appends to what is already stored
        let reports = Runner::new(config).run().await;
        assert_eq!(reports[0].records.len(), 1);
        assert_eq!(reports[0].summary.total_entries, 2);
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_records() {
        let temp_dir = tempdir().unwrap();
        let ok = Some(ExecutionOutcome::succeeded(0.1, None));
        let config = create_test_config(
            Some(temp_dir.path().to_string_lossy().into_owned()),
            vec![
                create_test_case("../escape", "result = df['sales'].sum()", ok.clone()),
                create_test_case("../escape", "result = df['sales'].mean()", ok.clone()),
                create_test_case("fine", "result = df['sales'].sum()", ok),
            ],
        );

        let reports = Runner::new(config).run().await;

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].session_id, "../escape");
        assert_eq!(reports[0].records.len(), 2);
        assert_eq!(reports[0].summary.total_entries, 2);
        assert!(!temp_dir.path().parent().unwrap().join("escape").exists());
        assert!(temp_dir.path().join("fine").join(METRICS_FILE).exists());
    }
}
