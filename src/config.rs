use crate::models::{DatasetSchema, EvaluationInput, ExecutionOutcome, ExecutionValue};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Engine limits shared by every case in a run
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Repair attempts allowed after a failed first execution
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Upper bound on one whole evaluation, recovery included. 0 disables it.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Directory holding one sub-directory per session
    #[serde(default)]
    pub sessions_dir: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            timeout_secs: default_timeout_secs(),
            sessions_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

/// OpenAI-compatible endpoint used to repair failing code
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RepairConfig {
    pub api_endpoint: String,
    /// Environment variable name containing the API key
    pub env_var_api_key: String,
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Rate limit for API requests per second
    #[serde(default = "default_rate_limit")]
    pub rate_limit_rps: f64,
}

/// Interpreter that runs submitted code read from stdin
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorConfig {
    /// Program followed by its arguments, e.g. ["python3", "runner.py", "data.csv"]
    pub command: Vec<String>,
    #[serde(default = "default_executor_timeout_secs")]
    pub timeout_secs: u64,
}

/// One question to evaluate
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CaseConfig {
    pub session_id: String,
    pub model: String,
    pub question: String,
    pub code: String,
    #[serde(default)]
    pub schema: DatasetSchema,
    #[serde(default)]
    pub dataset_size_mb: Option<f64>,
    #[serde(default)]
    pub expected: Option<ExecutionValue>,
    /// Recorded first execution; when absent the executor runs the code
    #[serde(default)]
    pub outcome: Option<ExecutionOutcome>,
}

impl CaseConfig {
    pub fn to_input(&self) -> EvaluationInput {
        EvaluationInput {
            model: self.model.clone(),
            question: self.question.clone(),
            code: self.code.clone(),
            schema: self.schema.clone(),
            dataset_size_mb: self.dataset_size_mb,
            expected: self.expected.clone(),
        }
    }
}

fn default_max_attempts() -> u32 {
    2
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_temperature() -> f64 {
    0.3
}

fn default_max_tokens() -> u32 {
    1000
}

fn default_rate_limit() -> f64 {
    10.0
}

fn default_executor_timeout_secs() -> u64 {
    30
}

/// Root of a run file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub repair: Option<RepairConfig>,
    #[serde(default)]
    pub executor: Option<ExecutorConfig>,
    #[serde(default)]
    pub cases: Vec<CaseConfig>,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_config_parsing() {
        let toml_content = r#"
[engine]
max_attempts = 3
timeout_secs = 60
sessions_dir = "/tmp/sessions"

[repair]
api_endpoint = "https://api.openai.com/v1"
env_var_api_key = "OPENAI_API_KEY"
model = "gpt-4"
temperature = 0.5
max_tokens = 200
rate_limit_rps = 5.0

[executor]
command = ["python3", "run_pandas.py", "sales.csv"]
timeout_secs = 10

[[cases]]
session_id = "s1"
model = "gpt-4"
question = "What is the total sales per region?"
code = "result = df.groupby('region')['sales'].sum()"
schema = [{ name = "region", dtype = "object" }, { name = "sales", dtype = "int64" }]
dataset_size_mb = 2.5
expected = { type = "number", data = 42.0 }
outcome = { success = false, error_message = "KeyError: 'Sales'", elapsed_seconds = 0.02 }
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();
        assert_eq!(config.engine.max_attempts, 3);
        assert_eq!(config.engine.timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.engine.sessions_dir.as_deref(), Some("/tmp/sessions"));

        let repair = config.repair.unwrap();
        assert_eq!(repair.model, "gpt-4");
        assert_eq!(repair.temperature, 0.5);
        assert_eq!(repair.max_tokens, 200);
        assert_eq!(repair.rate_limit_rps, 5.0);

        let executor = config.executor.unwrap();
        assert_eq!(executor.command.len(), 3);
        assert_eq!(executor.timeout_secs, 10);

        assert_eq!(config.cases.len(), 1);
        let case = &config.cases[0];
        assert_eq!(case.schema.names().collect::<Vec<_>>(), vec!["region", "sales"]);
        assert_eq!(case.expected, Some(ExecutionValue::Number(42.0)));
        let outcome = case.outcome.as_ref().unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error_text(), "KeyError: 'Sales'");

        let input = case.to_input();
        assert_eq!(input.dataset_size_mb, Some(2.5));
        assert_eq!(input.question, case.question);
    }

    #[test]
    fn test_config_defaults() {
        let toml_content = r#"
[repair]
api_endpoint = "https://api.openai.com/v1"
env_var_api_key = "OPENAI_API_KEY"
model = "gpt-4"

[executor]
command = ["python3"]

[[cases]]
session_id = "s1"
model = "gpt-4"
question = "How many rows?"
code = "result = len(df)"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        write!(temp_file, "{}", toml_content).unwrap();

        let config = Config::from_file(temp_file.path()).unwrap();
        assert_eq!(config.engine.max_attempts, 2);
        assert_eq!(config.engine.timeout_secs, 120);
        assert!(config.engine.sessions_dir.is_none());

        let repair = config.repair.unwrap();
        assert_eq!(repair.temperature, 0.3);
        assert_eq!(repair.max_tokens, 1000);
        assert_eq!(repair.rate_limit_rps, 10.0);
        assert_eq!(config.executor.unwrap().timeout_secs, 30);

        let case = &config.cases[0];
        assert!(case.schema.columns.is_empty());
        assert!(case.outcome.is_none());
        assert!(case.expected.is_none());
    }

    #[test]
    fn test_zero_timeout_disables_deadline() {
        let engine = EngineConfig {
            timeout_secs: 0,
            ..EngineConfig::default()
        };
        assert_eq!(engine.timeout(), None);
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = Config::from_file(Path::new("/nonexistent/run.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
