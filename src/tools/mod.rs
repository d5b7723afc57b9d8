//! Command Sandbox Subsystem
//!
//! Accepts free-form command text (typically produced by an LLM agent),
//! decides whether it may run under an allow-list policy, and runs it with
//! captured output.
//!
//! # Security Features
//!
//! - **Allow-list Policy**: Only listed base commands with listed flags are accepted
//! - **Raw Pattern Scan**: Shell operators, destructive commands, redirection and
//!   traversal are rejected before tokenization can hide them
//! - **Flag Unbundling**: `-la` is checked as `-l` and `-a`
//! - **Fail Closed**: Any fault inside validation is a rejection
//! - **All-or-nothing Batches**: One rejected member stops the whole batch
//! - **Direct Invocation**: By default the validated token list runs without a shell
//! - **Timeout Enforcement**: Foreground commands are killed after a bound
//!
//! # Architecture
//!
//! - `policy.rs`: allow-list data
//! - `patterns.rs`: dangerous raw-text patterns
//! - `validator.rs`: accept/reject decision
//! - `executor.rs`: process execution and structured results
//! - `timeout.rs`: bounded waits
//!
//! # Example
//!
//! ```no_run
//! use codeflow_sandbox::tools::ToolExecutor;
//!
//! #[tokio::main]
//! async fn main() {
//!     let executor = ToolExecutor::new();
//!
//!     let outcome = executor.run(&["ls -la", "wc -l Cargo.toml"], false).await;
//!     for result in outcome.results() {
//!         println!("{}", serde_json::to_string(result).unwrap());
//!     }
//! }
//! ```

mod executor;
mod patterns;
mod policy;
mod timeout;
mod validator;

pub use executor::{
    ExecutionMode, ExecutionResult, ExecutorConfig, FailureKind, Launcher, ProcessOutput,
    RunOutcome, Status, SystemLauncher, ToolExecutor,
};
pub use patterns::{find_dangerous, DangerPattern, DANGER_PATTERNS};
pub use policy::Policy;
pub use timeout::{ExecutionTimeout, TimedOut};
pub use validator::{
    expand_flags, CommandValidationError, CommandValidator, SafeCommand, ValidationVerdict,
};
