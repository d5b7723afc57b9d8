//! Codeflow Sandbox Library
//!
//! Policy-enforcing command execution for agent-generated shell commands:
//! allow-list validation, structured execution results and configuration.

pub mod config;
pub mod tools;

pub use config::Config;
pub use tools::{CommandValidator, ExecutionResult, Policy, RunOutcome, ToolExecutor};
