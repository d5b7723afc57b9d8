// Configuration File Support
//
// TOML configuration for the sandbox with environment variable overrides.
// Loaded from the XDG config directory: ~/.config/codeflow-sandbox/config.toml

use crate::tools::{ExecutionMode, ExecutorConfig, Policy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Logging configuration
    pub logging: LoggingConfig,

    /// Command execution configuration
    pub executor: ExecutionConfig,

    /// Allow-list override
    pub policy: PolicyConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

/// Command execution configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Foreground timeout in seconds
    pub timeout_secs: u64,

    /// Maximum captured bytes per output stream
    pub max_output_size: usize,

    /// Working directory for spawned commands
    pub working_dir: Option<String>,

    /// direct (validated tokens, no shell) or shell (original text via interpreter)
    pub mode: ExecutionMode,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        let defaults = ExecutorConfig::default();
        Self {
            timeout_secs: defaults.timeout.as_secs(),
            max_output_size: defaults.max_output_size,
            working_dir: None,
            mode: defaults.mode,
        }
    }
}

/// Allow-list configuration
///
/// When `commands` is absent the built-in policy applies. When present it
/// replaces the built-in policy entirely; an empty flag list leaves that
/// command's flags unrestricted.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyConfig {
    pub commands: Option<BTreeMap<String, Vec<String>>>,
}

impl Config {
    /// Load configuration from the default XDG config directory
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed.
    /// If the config file does not exist, returns default configuration.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or
    /// fails validation.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let config = if path.exists() {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file from {:?}", path))?;
            tracing::info!("Loaded configuration from {:?}", path);
            config
        } else {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            Self::default()
        };

        let config = config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Get the default configuration file path
    ///
    /// Returns `~/.config/codeflow-sandbox/config.toml` on Linux
    pub fn config_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("com", "codeflow", "codeflow-sandbox") {
            proj_dirs.config_dir().join("config.toml")
        } else {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home)
                .join(".config")
                .join("codeflow-sandbox")
                .join("config.toml")
        }
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Environment variables take precedence over config file values:
    /// - CODEFLOW_SANDBOX_LOG_LEVEL
    /// - CODEFLOW_SANDBOX_LOG_FORMAT
    /// - CODEFLOW_SANDBOX_TIMEOUT_SECS
    /// - CODEFLOW_SANDBOX_EXEC_MODE
    /// - CODEFLOW_SANDBOX_WORKING_DIR
    fn apply_env_overrides(self) -> Self {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("CODEFLOW_SANDBOX_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("CODEFLOW_SANDBOX_LOG_FORMAT") {
            self.logging.format = format;
        }
        if let Some(timeout) = lookup("CODEFLOW_SANDBOX_TIMEOUT_SECS") {
            if let Ok(timeout) = timeout.parse::<u64>() {
                if timeout > 0 {
                    self.executor.timeout_secs = timeout;
                }
            }
        }
        if let Some(mode) = lookup("CODEFLOW_SANDBOX_EXEC_MODE") {
            match mode.parse::<ExecutionMode>() {
                Ok(mode) => self.executor.mode = mode,
                Err(e) => tracing::warn!("Ignoring CODEFLOW_SANDBOX_EXEC_MODE: {}", e),
            }
        }
        if let Some(dir) = lookup("CODEFLOW_SANDBOX_WORKING_DIR") {
            self.executor.working_dir = Some(dir);
        }

        self
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                self.logging.level
            ),
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" | "compact" => {}
            _ => anyhow::bail!(
                "Invalid log format: {}. Must be one of: json, pretty, compact",
                self.logging.format
            ),
        }

        if self.executor.timeout_secs == 0 {
            anyhow::bail!("Executor timeout must be > 0 seconds");
        }
        if self.executor.max_output_size == 0 {
            anyhow::bail!("Executor max output size must be > 0");
        }

        if let Some(commands) = &self.policy.commands {
            for (name, flags) in commands {
                if name.is_empty() || name.chars().any(char::is_whitespace) {
                    anyhow::bail!("Policy command name {:?} must be a single non-empty word", name);
                }
                for flag in flags {
                    if !flag.starts_with('-') || flag.len() < 2 {
                        anyhow::bail!(
                            "Policy flag {:?} for command '{}' must start with '-' or '--'",
                            flag,
                            name
                        );
                    }
                }
            }
        }

        Ok(())
    }

    /// Convert log level string to tracing::Level
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.logging
            .level
            .to_lowercase()
            .parse()
            .map_err(|e| anyhow::anyhow!("Failed to parse log level: {}", e))
    }

    /// Executor settings derived from this configuration
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            timeout: Duration::from_secs(self.executor.timeout_secs),
            max_output_size: self.executor.max_output_size,
            working_dir: self.executor.working_dir.as_ref().map(PathBuf::from),
            mode: self.executor.mode,
        }
    }

    /// Effective allow-list: the configured table, or the shared built-in policy
    pub fn policy(&self) -> Arc<Policy> {
        match &self.policy.commands {
            Some(commands) => {
                let policy = Policy::from_commands(commands.clone());
                if policy.is_empty() {
                    tracing::warn!("Configured policy allows no commands; every command will be rejected");
                }
                Arc::new(policy)
            }
            None => Policy::shared(),
        }
    }
}
