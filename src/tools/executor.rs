//! Tool Executor
//!
//! Runs validated commands as child processes and reports every outcome as
//! data. Nothing here returns `Err` to the caller: a rejected batch, a spawn
//! failure, a non-zero exit and a timeout all arrive as [`ExecutionResult`]s.

use super::timeout::{ExecutionTimeout, TimedOut};
use super::validator::{CommandValidator, SafeCommand};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command as TokioCommand;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Default timeout for foreground execution in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Maximum captured size per stream in bytes (1MB)
const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Outcome status on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Why an execution did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Rejected by the validator; nothing ran
    PolicyViolation,
    /// The operating system could not start the process
    SpawnFailure,
    /// The process ran and exited non-zero
    RuntimeFailure,
    /// The process outlived the foreground timeout and was killed
    Timeout,
}

/// Result of one submitted command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: Status,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,

    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Informational text (background spawns)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Process id of a background spawn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
}

impl ExecutionResult {
    fn blank(status: Status) -> Self {
        Self {
            status,
            stdout: None,
            stderr: None,
            error: None,
            message: None,
            kind: None,
            exit_code: None,
            pid: None,
        }
    }

    fn failure(kind: FailureKind, error: String) -> Self {
        Self {
            error: Some(error),
            kind: Some(kind),
            ..Self::blank(Status::Error)
        }
    }

    /// A command (or batch) the validator refused
    pub fn rejected(reason: impl fmt::Display) -> Self {
        Self::failure(FailureKind::PolicyViolation, format!("Invalid command: {reason}"))
    }

    /// A foreground command that exited zero
    pub fn success(stdout: String, stderr: String) -> Self {
        Self {
            stdout: Some(stdout),
            stderr: Some(stderr),
            ..Self::blank(Status::Success)
        }
    }

    /// A foreground command that exited non-zero; captured output is kept
    pub fn runtime_failure(exit_code: Option<i32>, stdout: String, stderr: String) -> Self {
        let error = match exit_code {
            Some(code) => format!("Command failed with exit code {code}"),
            None => "Command terminated without an exit code".to_string(),
        };
        Self {
            stdout: Some(stdout),
            stderr: Some(stderr),
            exit_code,
            ..Self::failure(FailureKind::RuntimeFailure, error)
        }
    }

    pub fn spawn_failure(err: &io::Error) -> Self {
        Self::failure(FailureKind::SpawnFailure, format!("Failed to run command: {err}"))
    }

    pub fn timeout(elapsed: TimedOut) -> Self {
        Self::failure(FailureKind::Timeout, elapsed.to_string())
    }

    pub fn background(command: &str, pid: u32) -> Self {
        Self {
            message: Some(format!(
                "Command '{command}' started in background with PID {pid}"
            )),
            pid: Some(pid),
            ..Self::blank(Status::Success)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        match (&self.status, &self.error, &self.message) {
            (Status::Error, Some(error), _) => error.clone(),
            (Status::Success, _, Some(message)) => message.clone(),
            (Status::Success, _, None) => format!(
                "Success ({} bytes output)",
                self.stdout.as_deref().map_or(0, str::len)
            ),
            (Status::Error, None, _) => "Failed".to_string(),
        }
    }
}

/// Outcome of a whole batch
///
/// Serializes as the single rejection object or as the ordered result array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RunOutcome {
    /// At least one member failed validation; nothing was executed
    Rejected(ExecutionResult),
    /// Every member validated; one result per command, in input order
    Completed(Vec<ExecutionResult>),
}

impl RunOutcome {
    pub fn results(&self) -> &[ExecutionResult] {
        match self {
            Self::Rejected(result) => std::slice::from_ref(result),
            Self::Completed(results) => results,
        }
    }

    pub fn into_results(self) -> Vec<ExecutionResult> {
        match self {
            Self::Rejected(result) => vec![result],
            Self::Completed(results) => results,
        }
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// True if every result succeeded
    pub fn is_success(&self) -> bool {
        self.results().iter().all(ExecutionResult::is_success)
    }
}

/// How an accepted command is handed to the operating system
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Run the validated token list directly, no interpreter involved
    #[default]
    Direct,
    /// Pass the original text to the platform command interpreter
    Shell,
}

impl FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "direct" => Ok(Self::Direct),
            "shell" => Ok(Self::Shell),
            other => Err(format!(
                "Invalid execution mode: {other}. Must be 'direct' or 'shell'"
            )),
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => f.write_str("direct"),
            Self::Shell => f.write_str("shell"),
        }
    }
}

/// Configuration for tool execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Foreground wait bound (default: 60 seconds)
    pub timeout: Duration,

    /// Maximum captured bytes per stream (default: 1MB)
    pub max_output_size: usize,

    /// Working directory for spawned commands (default: inherited)
    pub working_dir: Option<PathBuf>,

    pub mode: ExecutionMode,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_output_size: MAX_OUTPUT_SIZE,
            working_dir: None,
            mode: ExecutionMode::default(),
        }
    }
}

impl ExecutorConfig {
    /// Create a new executor config with custom timeout
    pub fn with_timeout(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            ..Default::default()
        }
    }

    /// Create a new executor config with custom output limit
    pub fn with_max_output_size(size: usize) -> Self {
        Self {
            max_output_size: size,
            ..Default::default()
        }
    }

    /// Create a new executor config with custom working directory
    pub fn with_working_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: Some(dir.into()),
            ..Default::default()
        }
    }

    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Raw output of a finished child process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Exit code, `None` if the process was terminated by a signal
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Process-spawning seam
///
/// Implementations only start processes; validation and result shaping stay
/// in [`ToolExecutor`].
#[async_trait]
pub trait Launcher: fmt::Debug + Send + Sync {
    /// Run to completion and capture both streams
    ///
    /// Dropping the returned future must terminate the child.
    async fn output(&self, command: &SafeCommand, config: &ExecutorConfig) -> io::Result<ProcessOutput>;

    /// Start without waiting and return the process id
    async fn spawn(&self, command: &SafeCommand, config: &ExecutorConfig) -> io::Result<u32>;
}

/// [`Launcher`] backed by `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

impl SystemLauncher {
    fn build(command: &SafeCommand, config: &ExecutorConfig) -> TokioCommand {
        let mut process = match config.mode {
            ExecutionMode::Direct => {
                let mut process = TokioCommand::new(&command.program);
                process.args(&command.args);
                process
            }
            ExecutionMode::Shell => {
                let (interpreter, flag) = interpreter();
                let mut process = TokioCommand::new(interpreter);
                process.arg(flag).arg(&command.original);
                process
            }
        };

        if let Some(ref dir) = config.working_dir {
            process.current_dir(dir);
        }
        process.stdin(Stdio::null());
        process
    }
}

#[cfg(windows)]
fn interpreter() -> (&'static str, &'static str) {
    ("cmd", "/C")
}

#[cfg(not(windows))]
fn interpreter() -> (&'static str, &'static str) {
    ("sh", "-c")
}

#[async_trait]
impl Launcher for SystemLauncher {
    async fn output(&self, command: &SafeCommand, config: &ExecutorConfig) -> io::Result<ProcessOutput> {
        let mut process = Self::build(command, config);
        process
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = process.output().await?;
        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    async fn spawn(&self, command: &SafeCommand, config: &ExecutorConfig) -> io::Result<u32> {
        let mut process = Self::build(command, config);
        process
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        // The child handle is dropped; the process keeps running unsupervised
        let child = process.spawn()?;
        child
            .id()
            .ok_or_else(|| io::Error::other("process exited before its id could be read"))
    }
}

/// Tool executor for validated subprocess execution
///
/// # Example
///
/// ```no_run
/// use codeflow_sandbox::tools::ToolExecutor;
///
/// #[tokio::main]
/// async fn main() {
///     let executor = ToolExecutor::new();
///     let outcome = executor.run(&["echo hello"], false).await;
///     assert!(outcome.is_success());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    validator: CommandValidator,
    config: ExecutorConfig,
    launcher: Arc<dyn Launcher>,
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolExecutor {
    /// Create a new tool executor with default configuration
    pub fn new() -> Self {
        Self::with_config(ExecutorConfig::default())
    }

    /// Create a new tool executor with custom configuration
    pub fn with_config(config: ExecutorConfig) -> Self {
        Self::with_parts(CommandValidator::new(), config, Arc::new(SystemLauncher))
    }

    /// Create a new tool executor with custom validator
    pub fn with_validator(validator: CommandValidator) -> Self {
        Self::with_parts(validator, ExecutorConfig::default(), Arc::new(SystemLauncher))
    }

    pub fn with_parts(
        validator: CommandValidator,
        config: ExecutorConfig,
        launcher: Arc<dyn Launcher>,
    ) -> Self {
        Self {
            validator,
            config,
            launcher,
        }
    }

    /// Validate and run a batch of commands
    ///
    /// All-or-nothing: if any member is rejected, nothing runs and the first
    /// rejection is returned. Accepted members run one after another in
    /// input order. In background mode each member is spawned and never awaited.
    pub async fn run<S>(&self, commands: &[S], background: bool) -> RunOutcome
    where
        S: AsRef<str> + Sync,
    {
        let batch_id = Uuid::new_v4();
        let span = info_span!("batch", %batch_id, size = commands.len(), background);

        async {
            let mut accepted = Vec::with_capacity(commands.len());
            for command in commands {
                match self.validator.check(command.as_ref()) {
                    Ok(safe) => accepted.push(safe),
                    Err(e) => {
                        warn!("Batch rejected, nothing executed: {}", e);
                        return RunOutcome::Rejected(ExecutionResult::rejected(e));
                    }
                }
            }

            let mut results = Vec::with_capacity(accepted.len());
            for safe in &accepted {
                let result = if background {
                    self.spawn_background(safe).await
                } else {
                    self.run_foreground(safe).await
                };
                results.push(result);
            }
            RunOutcome::Completed(results)
        }
        .instrument(span)
        .await
    }

    /// Validate and run a single command
    pub async fn run_one(&self, command: &str, background: bool) -> ExecutionResult {
        // A one-element batch always yields exactly one result
        self.run(&[command], background)
            .await
            .into_results()
            .pop()
            .unwrap_or_else(|| ExecutionResult::rejected("no result produced"))
    }

    async fn run_foreground(&self, command: &SafeCommand) -> ExecutionResult {
        let start = Instant::now();
        info!(command = %command.original, mode = %self.config.mode, "Executing");

        let timeout = ExecutionTimeout::new(self.config.timeout);
        let result = match timeout.run(self.launcher.output(command, &self.config)).await {
            Err(elapsed) => {
                warn!("Command timed out after {:?}", elapsed.0);
                ExecutionResult::timeout(elapsed)
            }
            Ok(Err(e)) => {
                warn!("Failed to spawn process {}: {}", command.program, e);
                ExecutionResult::spawn_failure(&e)
            }
            Ok(Ok(output)) => {
                let stdout = truncate_output(&output.stdout, self.config.max_output_size);
                let stderr = truncate_output(&output.stderr, self.config.max_output_size);
                if output.code == Some(0) {
                    ExecutionResult::success(stdout, stderr)
                } else {
                    warn!("Command failed: {} (exit code: {:?})", command.original, output.code);
                    ExecutionResult::runtime_failure(output.code, stdout, stderr)
                }
            }
        };

        debug!(elapsed_ms = start.elapsed().as_millis() as u64, "{}", result.summary());
        result
    }

    async fn spawn_background(&self, command: &SafeCommand) -> ExecutionResult {
        match self.launcher.spawn(command, &self.config).await {
            Ok(pid) => {
                info!(pid, "Started in background: {}", command.original);
                ExecutionResult::background(&command.original, pid)
            }
            Err(e) => {
                warn!("Failed to spawn background process {}: {}", command.program, e);
                ExecutionResult::spawn_failure(&e)
            }
        }
    }

    /// Get a reference to the validator
    pub fn validator(&self) -> &CommandValidator {
        &self.validator
    }

    /// Get a reference to the config
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }
}

/// Decode captured bytes and cap them at `max_len`, adding ellipsis if truncated
fn truncate_output(bytes: &[u8], max_len: usize) -> String {
    let mut s = String::from_utf8_lossy(bytes).into_owned();
    if s.len() > max_len {
        // No room for the marker: hard cut at the cap
        let marker = if max_len < 3 { "" } else { "..." };
        let mut cut = max_len - marker.len();
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        s.truncate(cut);
        s.push_str(marker);
    }
    s
}
