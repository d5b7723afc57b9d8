// Codeflow Sandbox - Main Entry Point
//
// Thin CLI over the sandbox library:
// - validate candidate commands against the allow-list
// - run accepted batches in the foreground or background
// - run a file of commands as one batch
// - print the effective policy

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use codeflow_sandbox::config::Config;
use codeflow_sandbox::tools::{
    CommandValidator, ExecutionResult, RunOutcome, SystemLauncher, ToolExecutor,
    ValidationVerdict,
};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, Level};
use tracing_subscriber::EnvFilter;

/// Codeflow Sandbox: allow-list execution for agent-generated commands
#[derive(Parser, Debug)]
#[command(name = "codeflow-sandbox")]
#[command(author = "Codeflow Contributors")]
#[command(version)]
#[command(about = "Validate and run agent-generated shell commands under an allow-list policy", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to a config file (default: XDG config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Json, global = true)]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate commands without running them
    Check {
        /// Candidate command strings
        #[arg(required = true)]
        commands: Vec<String>,
    },
    /// Validate and run a batch of commands
    Run {
        /// Spawn without waiting for completion
        #[arg(long)]
        background: bool,

        /// Foreground timeout in seconds
        #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
        timeout: Option<u64>,

        /// Candidate command strings, run in order
        #[arg(required = true)]
        commands: Vec<String>,
    },
    /// Run every non-empty line of a file as one batch
    RunFile {
        /// File with one command per line ('#' starts a comment line)
        path: PathBuf,

        /// Spawn without waiting for completion
        #[arg(long)]
        background: bool,
    },
    /// Print the effective allow-list
    Policy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Serialize)]
struct CheckReport<'a> {
    command: &'a str,
    #[serde(flatten)]
    verdict: ValidationVerdict,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            Config::load_from_path(path)?
        }
        None => Config::load()?,
    };

    init_tracing(&config, args.verbose)?;
    debug!("Effective configuration: {:?}", config);

    let ok = match args.command {
        Commands::Check { commands } => check(&config, &commands, args.output)?,
        Commands::Run {
            background,
            timeout,
            commands,
        } => run(&config, &commands, background, timeout, args.output).await?,
        Commands::RunFile { path, background } => {
            let commands = read_command_file(&path)?;
            info!("Loaded {} commands from {}", commands.len(), path.display());
            run(&config, &commands, background, None, args.output).await?
        }
        Commands::Policy => {
            print_policy(&config, args.output)?;
            true
        }
    };

    Ok(if ok { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Install the tracing subscriber; logs go to stderr so stdout stays parseable
fn init_tracing(config: &Config, verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { config.log_level()? };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.logging.format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }
    Ok(())
}

fn check(config: &Config, commands: &[String], output: OutputFormat) -> Result<bool> {
    let validator = CommandValidator::with_policy(config.policy());
    let reports: Vec<CheckReport<'_>> = commands
        .iter()
        .map(|command| CheckReport {
            command,
            verdict: validator.validate(command),
        })
        .collect();

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&reports)?),
        OutputFormat::Text => {
            for report in &reports {
                match report.verdict.reason() {
                    None => println!("[ACCEPTED] {}", report.command),
                    Some(reason) => println!("[REJECTED] {}: {}", report.command, reason),
                }
            }
        }
    }

    Ok(reports.iter().all(|r| r.verdict.is_accepted()))
}

async fn run(
    config: &Config,
    commands: &[String],
    background: bool,
    timeout: Option<u64>,
    output: OutputFormat,
) -> Result<bool> {
    let mut executor_config = config.executor_config();
    if let Some(secs) = timeout {
        executor_config.timeout = Duration::from_secs(secs);
    }

    let executor = ToolExecutor::with_parts(
        CommandValidator::with_policy(config.policy()),
        executor_config,
        Arc::new(SystemLauncher),
    );
    let outcome = executor.run(commands, background).await;

    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
        OutputFormat::Text => print_text_outcome(commands, &outcome),
    }

    Ok(outcome.is_success())
}

fn print_text_outcome(commands: &[String], outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Rejected(result) => {
            println!("[ERROR] Batch rejected: {}", result.summary());
        }
        RunOutcome::Completed(results) => {
            for (command, result) in commands.iter().zip(results) {
                print_text_result(command, result);
            }
        }
    }
}

fn print_text_result(command: &str, result: &ExecutionResult) {
    if result.is_success() {
        println!("[SUCCESS] {}", command);
        if let Some(message) = &result.message {
            println!("{}", message);
        }
    } else {
        println!("[ERROR] {}: {}", command, result.summary());
        if let Some(stderr) = result.stderr.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            println!("{}", stderr);
        }
    }
    if let Some(stdout) = result.stdout.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        println!("{}", stdout);
    }
}

fn print_policy(config: &Config, output: OutputFormat) -> Result<()> {
    let policy = config.policy();
    match output {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&*policy)?),
        OutputFormat::Text => {
            for (command, flags) in policy.entries() {
                if flags.is_empty() {
                    println!("{}: (any flags)", command);
                } else {
                    let flags: Vec<&str> = flags.iter().map(String::as_str).collect();
                    println!("{}: {}", command, flags.join(" "));
                }
            }
        }
    }
    Ok(())
}

/// Read one command per line, skipping blank lines and '#' comments
fn read_command_file(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read command file {}", path.display()))?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
