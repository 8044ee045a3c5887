//! External collaborators: the code executor and the repair model.

use crate::config::{ExecutorConfig, RepairConfig};
use crate::error::EngineError;
use crate::models::{DatasetSchema, ExecutionOutcome, ExecutionValue};
use anyhow::{Context, Result};
use async_openai::{Client, config::OpenAIConfig, types::CreateChatCompletionRequestArgs};
use async_trait::async_trait;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio::time::sleep;

/// What the repair collaborator is asked to fix
#[derive(Debug, Clone, Copy)]
pub struct RepairRequest<'a> {
    pub question: &'a str,
    pub prior_code: &'a str,
    pub error_message: &'a str,
    pub schema: &'a DatasetSchema,
}

/// Runs code against the dataset in isolation
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn submit(&self, code: &str) -> Result<ExecutionOutcome, EngineError>;
}

/// Produces a corrected version of failing code
#[async_trait]
pub trait CodeRepairer: Send + Sync {
    async fn repair(&self, request: &RepairRequest<'_>) -> Result<String, EngineError>;
}

/// Repairer used when no endpoint is configured; every attempt is non-progress
pub struct UnconfiguredRepairer;

#[async_trait]
impl CodeRepairer for UnconfiguredRepairer {
    async fn repair(&self, _request: &RepairRequest<'_>) -> Result<String, EngineError> {
        Err(EngineError::RepairUnavailable(
            "no repair endpoint configured".to_string(),
        ))
    }
}

/// Executor used when cases carry recorded outcomes and nothing can run repaired code
pub struct UnconfiguredExecutor;

#[async_trait]
impl CodeExecutor for UnconfiguredExecutor {
    async fn submit(&self, _code: &str) -> Result<ExecutionOutcome, EngineError> {
        Err(EngineError::ExecutorUnavailable(
            "no executor command configured".to_string(),
        ))
    }
}

/// Repairs code through an OpenAI-compatible chat completions endpoint
pub struct OpenAiRepairer {
    config: RepairConfig,
    /// Last request time, shared by every session using this client
    last_request: Mutex<Option<Instant>>,
}

impl OpenAiRepairer {
    pub fn new(config: RepairConfig) -> Self {
        Self {
            config,
            last_request: Mutex::new(None),
        }
    }

    /// Enforce rate limiting for API requests
    async fn enforce_rate_limit(last_request: &mut Option<Instant>, rate_limit_rps: f64) {
        if rate_limit_rps <= 0.0 {
            return;
        }

        let min_interval = Duration::from_secs_f64(1.0 / rate_limit_rps);

        if let Some(last_time) = *last_request {
            let elapsed = last_time.elapsed();
            if elapsed < min_interval {
                sleep(min_interval - elapsed).await;
            }
        }

        *last_request = Some(Instant::now());
    }

    /// Create the OpenAI client
    fn create_client(&self) -> Result<Client<OpenAIConfig>> {
        let api_key = std::env::var(&self.config.env_var_api_key).with_context(|| {
            format!("Environment variable {} not found", self.config.env_var_api_key)
        })?;

        let openai_config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(&self.config.api_endpoint);

        Ok(Client::with_config(openai_config))
    }

    /// System prompt with the dataset columns and dtypes filled in
    fn system_prompt(schema: &DatasetSchema) -> String {
        let columns = schema.names().collect::<Vec<_>>().join(", ");
        let dtypes = schema
            .columns
            .iter()
            .map(|c| format!("\"{}\": \"{}\"", c.name, c.dtype))
            .collect::<Vec<_>>()
            .join(", ");

        format!(
            "You are a data analysis assistant. Convert natural language questions into safe, \
             read-only Pandas code.\n\n\
             Rules:\n\
             1. Only use read-only operations (no file writes, no network calls, no system commands)\n\
             2. Use the variable 'df' for the DataFrame\n\
             3. Always assign the final result to a variable named 'result' or create a figure named 'fig'\n\
             4. Return only valid Python/Pandas code, no explanations or markdown\n\n\
             Available columns: {columns}\n\
             Column types: {{{dtypes}}}\n\n\
             Return ONLY the Python code, nothing else."
        )
    }

    /// User prompt asking for a root-cause fix of the prior attempt
    fn repair_prompt(request: &RepairRequest<'_>) -> String {
        format!(
            "The previous code failed with error: {}\n\n\
             Original question: {}\n\
             Original code:\n```python\n{}\n```\n\n\
             Fix the root cause of the error rather than suppressing it. \
             Return only the corrected Python code.",
            request.error_message, request.question, request.prior_code
        )
    }

    /// Build the chat completion request
    fn build_request(
        &self,
        request: &RepairRequest<'_>,
    ) -> Result<async_openai::types::CreateChatCompletionRequest> {
        let system_message = async_openai::types::ChatCompletionRequestSystemMessageArgs::default()
            .content(Self::system_prompt(request.schema))
            .build()
            .context("Failed to build system message")?
            .into();

        let user_message = async_openai::types::ChatCompletionRequestUserMessageArgs::default()
            .content(Self::repair_prompt(request))
            .build()
            .context("Failed to build user message")?
            .into();

        CreateChatCompletionRequestArgs::default()
            .model(&self.config.model)
            .messages([system_message, user_message])
            .temperature(self.config.temperature as f32)
            .max_tokens(self.config.max_tokens as u16)
            .build()
            .context("Failed to build chat completion request")
    }

    async fn request_repair(&self, request: &RepairRequest<'_>) -> Result<String> {
        {
            let mut last_request = self.last_request.lock().await;
            Self::enforce_rate_limit(&mut last_request, self.config.rate_limit_rps).await;
        }

        let client = self.create_client()?;
        let chat_request = self.build_request(request)?;
        let response = client
            .chat()
            .create(chat_request)
            .await
            .context("Failed to generate repair")?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();
        let code = strip_code_fences(&content);
        if code.is_empty() {
            anyhow::bail!("Repair response contained no code");
        }
        Ok(code)
    }
}

#[async_trait]
impl CodeRepairer for OpenAiRepairer {
    async fn repair(&self, request: &RepairRequest<'_>) -> Result<String, EngineError> {
        self.request_repair(request)
            .await
            .map_err(|err| EngineError::RepairUnavailable(format!("{err:#}")))
    }
}

/// Remove a surrounding markdown code fence, with or without a language tag
pub fn strip_code_fences(reply: &str) -> String {
    let mut code = reply.trim();
    if let Some(rest) = code.strip_prefix("```") {
        code = match rest.find('\n') {
            // drop the language tag line
            Some(newline) if !rest[..newline].trim().contains(' ') => &rest[newline + 1..],
            _ => rest,
        };
    }
    if let Some(rest) = code.trim_end().strip_suffix("```") {
        code = rest;
    }
    code.trim().to_string()
}

/// Runs code by piping it into an interpreter process
pub struct CommandExecutor {
    config: ExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    async fn run(&self, code: &str) -> Result<ExecutionOutcome> {
        let (program, args) = self
            .config
            .command
            .split_first()
            .context("Executor command is empty")?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start executor: {program}"))?;

        let started = Instant::now();
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(code.as_bytes())
                .await
                .context("Failed to write code to executor")?;
        }

        let limit = Duration::from_secs(self.config.timeout_secs);
        let output = match tokio::time::timeout(limit, child.wait_with_output()).await {
            Ok(output) => output.context("Failed to collect executor output")?,
            Err(_) => {
                return Ok(ExecutionOutcome::failed(
                    format!("TimeoutError: execution exceeded {}s", self.config.timeout_secs),
                    Some(limit.as_secs_f64()),
                ));
            }
        };
        let elapsed = started.elapsed().as_secs_f64();

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            Ok(ExecutionOutcome::succeeded(elapsed, parse_result(&stdout)))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .map(|line| line.trim().to_string())
                .unwrap_or_else(|| format!("executor exited with {}", output.status));
            Ok(ExecutionOutcome::failed(message, Some(elapsed)))
        }
    }
}

#[async_trait]
impl CodeExecutor for CommandExecutor {
    async fn submit(&self, code: &str) -> Result<ExecutionOutcome, EngineError> {
        self.run(code)
            .await
            .map_err(|err| EngineError::ExecutorUnavailable(format!("{err:#}")))
    }
}

/// Interpret executor stdout: a tagged value, a bare number, or plain text
fn parse_result(stdout: &str) -> Option<ExecutionValue> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(value) = serde_json::from_str::<ExecutionValue>(trimmed) {
        return Some(value);
    }
    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(serde_json::Value::Number(n)) => n.as_f64().map(ExecutionValue::Number),
        _ => Some(ExecutionValue::Text(trimmed.to_string())),
    }
}
