//! Per-session record logs, their summary statistics and on-disk persistence.
//!
//! Each session owns one log behind an async mutex; appends to a session are
//! serialized through it and distinct sessions never contend. A store, when
//! configured, keeps `<root>/<session_id>/metrics.json` (every record) and
//! `metrics_summary.json` (the summary) in step with the log.

use crate::models::{ComplexityClass, ErrorCategory, EvaluationRecord};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

pub const METRICS_FILE: &str = "metrics.json";
pub const SUMMARY_FILE: &str = "metrics_summary.json";

/// Aggregate view of one session, recomputed from its records after every append
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SummaryStatistics {
    pub total_entries: usize,
    pub average_overall_score: f64,
    pub average_correctness_score: f64,
    pub average_quality_score: f64,
    pub average_performance_score: f64,
    /// Over records where the understanding dimension was available
    pub average_understanding_score: f64,
    pub average_coverage_score: f64,
    /// Over records that went through recovery
    pub average_recovery_score: f64,
    pub average_execution_time_seconds: Option<f64>,
    pub average_execution_time_ms: Option<f64>,
    pub models_used: Vec<String>,
    pub successful_executions: usize,
    pub errors_encountered: usize,
    pub total_recovery_attempts: usize,
    pub successful_recoveries: usize,
    pub recovery_success_rate: f64,
    pub time_complexity_distribution: BTreeMap<ComplexityClass, usize>,
    pub space_complexity_distribution: BTreeMap<ComplexityClass, usize>,
    /// Initial failures plus every failed recovery attempt
    pub error_categories: BTreeMap<ErrorCategory, usize>,
    /// Timestamp of the newest record, so the same records give the same summary
    pub last_updated: Option<DateTime<Utc>>,
}

fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

impl SummaryStatistics {
    pub fn from_records(records: &[EvaluationRecord]) -> Self {
        let mut time_complexity_distribution = BTreeMap::new();
        let mut space_complexity_distribution = BTreeMap::new();
        let mut error_categories = BTreeMap::new();
        let mut total_recovery_attempts = 0;
        let mut successful_recoveries = 0;
        let mut errors_encountered = 0;

        for record in records {
            *time_complexity_distribution
                .entry(record.performance.time_complexity.class)
                .or_insert(0) += 1;
            *space_complexity_distribution
                .entry(record.performance.space_complexity.class)
                .or_insert(0) += 1;

            if let Some(recovery) = &record.recovery {
                errors_encountered += 1;
                total_recovery_attempts += recovery.attempts.len();
                if recovery.recovery_success {
                    successful_recoveries += 1;
                }
                *error_categories.entry(recovery.initial_category).or_insert(0) += 1;
                for category in recovery.attempts.iter().filter_map(|a| a.category) {
                    *error_categories.entry(category).or_insert(0) += 1;
                }
            }
        }

        let models_used: BTreeSet<&str> = records.iter().map(|r| r.model.as_str()).collect();
        let average_execution_time_seconds = mean(
            records
                .iter()
                .filter_map(|r| r.performance.execution_time_seconds),
        );

        Self {
            total_entries: records.len(),
            average_overall_score: mean(records.iter().map(|r| r.overall_score)).unwrap_or(0.0),
            average_correctness_score: mean(
                records.iter().map(|r| r.correctness.correctness_score),
            )
            .unwrap_or(0.0),
            average_quality_score: mean(records.iter().map(|r| r.quality.quality_score))
                .unwrap_or(0.0),
            average_performance_score: mean(
                records.iter().map(|r| r.performance.performance_score),
            )
            .unwrap_or(0.0),
            average_understanding_score: mean(
                records
                    .iter()
                    .filter_map(|r| r.understanding.as_ref().map(|u| u.understanding_score)),
            )
            .unwrap_or(0.0),
            average_coverage_score: mean(records.iter().map(|r| r.coverage.coverage_score))
                .unwrap_or(0.0),
            average_recovery_score: mean(
                records
                    .iter()
                    .filter_map(|r| r.recovery.as_ref().map(|b| b.recovery_score)),
            )
            .unwrap_or(0.0),
            average_execution_time_seconds,
            average_execution_time_ms: average_execution_time_seconds.map(|t| t * 1000.0),
            models_used: models_used.into_iter().map(str::to_string).collect(),
            successful_executions: records.iter().filter(|r| r.execution.success).count(),
            errors_encountered,
            total_recovery_attempts,
            successful_recoveries,
            recovery_success_rate: if errors_encountered > 0 {
                successful_recoveries as f64 / errors_encountered as f64
            } else {
                0.0
            },
            time_complexity_distribution,
            space_complexity_distribution,
            error_categories,
            last_updated: records.iter().map(|r| r.timestamp).max(),
        }
    }
}

/// Append-only record list for one session
#[derive(Debug, Clone)]
pub struct SessionLog {
    session_id: String,
    records: Vec<EvaluationRecord>,
    summary: SummaryStatistics,
}

impl SessionLog {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self::from_records(session_id, Vec::new())
    }

    pub fn from_records(session_id: impl Into<String>, records: Vec<EvaluationRecord>) -> Self {
        let summary = SummaryStatistics::from_records(&records);
        Self {
            session_id: session_id.into(),
            records,
            summary,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn records(&self) -> &[EvaluationRecord] {
        &self.records
    }

    pub fn summary(&self) -> &SummaryStatistics {
        &self.summary
    }

    /// Append a record and recompute the summary
    pub fn append(&mut self, record: EvaluationRecord) -> &SummaryStatistics {
        self.records.push(record);
        self.summary = SummaryStatistics::from_records(&self.records);
        &self.summary
    }
}

/// Contents of `metrics_summary.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryFile {
    pub session_id: String,
    pub summary: SummaryStatistics,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResummarizeReport {
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Session directories under one root
#[derive(Debug, Clone)]
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for `session_id`; ids that could escape the root are rejected
    pub fn session_dir(&self, session_id: &str) -> Result<PathBuf> {
        let valid = !session_id.trim().is_empty()
            && session_id != "."
            && session_id != ".."
            && !session_id.contains(['/', '\\']);
        if !valid {
            anyhow::bail!("Invalid session id: {session_id:?}");
        }
        Ok(self.root.join(session_id))
    }

    /// Records stored for `session_id`; empty when the session has never been saved
    pub fn load(&self, session_id: &str) -> Result<Vec<EvaluationRecord>> {
        let path = self.session_dir(session_id)?.join(METRICS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        read_records(&path)
    }

    /// Write both files for `log`
    pub fn save(&self, log: &SessionLog) -> Result<()> {
        let dir = self.session_dir(log.session_id())?;
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

        let records = serde_json::to_string_pretty(log.records())
            .context("Failed to serialize session records to JSON")?;
        write_file(&dir.join(METRICS_FILE), &records)?;
        write_summary(&dir, log.session_id(), log.summary())?;

        debug!(session_id = log.session_id(), dir = %dir.display(), "Session saved");
        Ok(())
    }

    /// Rebuild the summary of every session directory that holds records
    pub fn resummarize_all(&self) -> Result<ResummarizeReport> {
        let mut report = ResummarizeReport::default();
        let entries = std::fs::read_dir(&self.root)
            .with_context(|| format!("Failed to read sessions directory: {}", self.root.display()))?;

        let mut dirs: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();

        for dir in dirs {
            let session_id = dir
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let metrics = dir.join(METRICS_FILE);
            if !metrics.exists() {
                debug!(session_id = %session_id, "No records, skipping");
                report.skipped += 1;
                continue;
            }

            match read_records(&metrics) {
                Ok(records) if records.is_empty() => {
                    debug!(session_id = %session_id, "Empty record list, skipping");
                    report.skipped += 1;
                }
                Ok(records) => {
                    let summary = SummaryStatistics::from_records(&records);
                    match write_summary(&dir, &session_id, &summary) {
                        Ok(()) => {
                            info!(session_id = %session_id, entries = records.len(), "Summary rebuilt");
                            report.updated += 1;
                        }
                        Err(err) => {
                            warn!(session_id = %session_id, error = %format!("{err:#}"), "Failed to write summary");
                            report.failed += 1;
                        }
                    }
                }
                Err(err) => {
                    warn!(session_id = %session_id, error = %format!("{err:#}"), "Failed to read records");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

fn read_records(path: &Path) -> Result<Vec<EvaluationRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read records: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse records: {}", path.display()))
}

fn write_summary(dir: &Path, session_id: &str, summary: &SummaryStatistics) -> Result<()> {
    let file = SummaryFile {
        session_id: session_id.to_string(),
        summary: summary.clone(),
    };
    let content =
        serde_json::to_string_pretty(&file).context("Failed to serialize summary to JSON")?;
    write_file(&dir.join(SUMMARY_FILE), &content)
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content).with_context(|| format!("Failed to write: {}", path.display()))
}

/// One log handle per session id, created on first use
#[derive(Default)]
pub struct SessionRegistry {
    store: Option<SessionStore>,
    sessions: Mutex<HashMap<String, Arc<AsyncMutex<SessionLog>>>>,
}

impl SessionRegistry {
    pub fn new(store: Option<SessionStore>) -> Self {
        Self {
            store,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lookup(&self, session_id: &str) -> Option<Arc<AsyncMutex<SessionLog>>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(session_id)
            .cloned()
    }

    /// Handle for `session_id`, loading stored records the first time it is seen
    pub fn handle(&self, session_id: &str) -> Result<Arc<AsyncMutex<SessionLog>>> {
        if let Some(handle) = self.lookup(session_id) {
            return Ok(handle);
        }

        let records = match &self.store {
            Some(store) => store
                .load(session_id)
                .with_context(|| format!("Failed to load session {session_id}"))?,
            None => Vec::new(),
        };

        let mut sessions = self
            .sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let handle = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(SessionLog::from_records(session_id, records))));
        Ok(Arc::clone(handle))
    }

    /// Append `record` to its session, persist it, and return the new summary
    pub async fn append(
        &self,
        session_id: &str,
        record: EvaluationRecord,
    ) -> Result<SummaryStatistics> {
        let handle = self.handle(session_id)?;
        let mut log = handle.lock().await;
        let summary = log.append(record).clone();
        if let Some(store) = &self.store {
            store.save(&log)?;
        }
        Ok(summary)
    }

    /// Snapshot of every session seen so far, ordered by id
    pub async fn snapshot(&self) -> Vec<SessionLog> {
        let handles: Vec<Arc<AsyncMutex<SessionLog>>> = {
            let sessions = self
                .sessions
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            sessions.values().cloned().collect()
        };

        let mut logs = Vec::with_capacity(handles.len());
        for handle in handles {
            logs.push(handle.lock().await.clone());
        }
        logs.sort_by(|a, b| a.session_id.cmp(&b.session_id));
        logs
    }
}
