//! Command Validation Module
//!
//! Decides whether a free-form command string may run under a [`Policy`].
//! Validation is pure: no I/O, no shared mutable state, safe to call from
//! any number of tasks at once.
//!
//! Order of checks:
//! 1. raw dangerous-pattern scan (before tokenization)
//! 2. shell-style tokenization, then the same scan over every token
//! 3. base command lookup
//! 4. flag unbundling (`-la` becomes `-l`, `-a`) and whitelist check

use super::patterns::find_dangerous;
use super::policy::Policy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, warn};

/// Reasons a command is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandValidationError {
    #[error("Command contains dangerous pattern: {0}")]
    DangerousPattern(String),

    #[error("Failed to tokenize command: {0}")]
    Tokenize(String),

    #[error("Empty command")]
    EmptyCommand,

    #[error("Command '{command}' is not allowed. Allowed commands: {allowed}")]
    NotAllowed { command: String, allowed: String },

    #[error("Flags {flags} are not allowed for command '{command}'. Allowed flags: {allowed}")]
    FlagsNotAllowed {
        command: String,
        flags: String,
        allowed: String,
    },

    #[error("Failed to validate command: {0}")]
    Internal(String),
}

/// Accept/reject decision for a single command string
///
/// Carries no token data; only the decision and its reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ValidationVerdict {
    Accepted,
    Rejected { reason: String },
}

impl ValidationVerdict {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Accepted => None,
            Self::Rejected { reason } => Some(reason),
        }
    }
}

impl From<Result<SafeCommand, CommandValidationError>> for ValidationVerdict {
    fn from(result: Result<SafeCommand, CommandValidationError>) -> Self {
        match result {
            Ok(_) => Self::Accepted,
            Err(e) => Self::Rejected {
                reason: e.to_string(),
            },
        }
    }
}

/// Safe command wrapper that has been validated
///
/// Holds both the original text and the token list the validator approved,
/// so the executor can run exactly what was checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeCommand {
    /// The command text as submitted
    pub original: String,

    /// The base command
    pub program: String,

    /// The remaining tokens
    pub args: Vec<String>,
}

impl SafeCommand {
    /// Get the command and args as a tuple for subprocess execution
    pub fn as_tuple(&self) -> (&str, &[String]) {
        (&self.program, &self.args)
    }
}

/// Command validator that enforces an allow-list policy
#[derive(Debug, Clone)]
pub struct CommandValidator {
    policy: Arc<Policy>,
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandValidator {
    /// Create a validator backed by the built-in policy
    pub fn new() -> Self {
        Self {
            policy: Policy::shared(),
        }
    }

    /// Create a validator with a custom policy
    pub fn with_policy(policy: Arc<Policy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    /// Validate a command string
    ///
    /// Never panics and never returns an error: any fault inside the
    /// validation logic is reported as a rejection.
    ///
    /// # Example
    ///
    /// ```
    /// use codeflow_sandbox::tools::CommandValidator;
    ///
    /// let validator = CommandValidator::new();
    /// assert!(validator.validate("ls -la").is_accepted());
    /// assert!(!validator.validate("ls | wc").is_accepted());
    /// ```
    pub fn validate(&self, command: &str) -> ValidationVerdict {
        self.check(command).into()
    }

    /// Validate a command string and return the approved tokens
    pub fn check(&self, command: &str) -> Result<SafeCommand, CommandValidationError> {
        let result = fail_closed(|| self.check_inner(command));

        match &result {
            Ok(_) => debug!(command = %truncate(command), "Command accepted"),
            Err(e) => warn!(command = %truncate(command), "Command rejected: {}", e),
        }
        result
    }

    fn check_inner(&self, command: &str) -> Result<SafeCommand, CommandValidationError> {
        check_dangerous(command)?;

        let tokens = shell_words::split(command)
            .map_err(|e| CommandValidationError::Tokenize(e.to_string()))?;

        // Quote removal can assemble sequences the raw scan never saw,
        // e.g. `.'.'/etc` becomes `../etc`
        for token in &tokens {
            check_dangerous(token)?;
        }

        let mut tokens = tokens.into_iter();
        let program = tokens.next().ok_or(CommandValidationError::EmptyCommand)?;
        let args: Vec<String> = tokens.collect();

        let allowed = self
            .policy
            .allowed_flags(&program)
            .ok_or_else(|| CommandValidationError::NotAllowed {
                command: program.clone(),
                allowed: self.policy.commands().collect::<Vec<_>>().join(", "),
            })?;

        // Empty set: flags are unrestricted for this command
        if !allowed.is_empty() {
            let invalid: BTreeSet<String> = expand_flags(&args)
                .into_iter()
                .filter(|flag| !allowed.contains(flag))
                .collect();

            if !invalid.is_empty() {
                return Err(CommandValidationError::FlagsNotAllowed {
                    command: program,
                    flags: format_set(&invalid),
                    allowed: format_set(allowed),
                });
            }
        }

        Ok(SafeCommand {
            original: command.to_string(),
            program,
            args,
        })
    }
}

/// Run a validation step, turning a panic into an `Internal` rejection
fn fail_closed<F>(f: F) -> Result<SafeCommand, CommandValidationError>
where
    F: FnOnce() -> Result<SafeCommand, CommandValidationError>,
{
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown internal error".to_string());
        Err(CommandValidationError::Internal(msg))
    })
}

fn check_dangerous(text: &str) -> Result<(), CommandValidationError> {
    match find_dangerous(text) {
        Some(pattern) => {
            debug!(pattern = pattern.pattern(), "Dangerous pattern matched");
            Err(CommandValidationError::DangerousPattern(
                pattern.reason().to_string(),
            ))
        }
        None => Ok(()),
    }
}

/// Collect the flags named by `args`
///
/// `--long` tokens are kept whole. Single-dash tokens are unbundled into one
/// short flag per character, so `-la` yields `-l` and `-a`.
pub fn expand_flags(args: &[String]) -> BTreeSet<String> {
    let mut flags = BTreeSet::new();
    for arg in args {
        if arg.starts_with("--") {
            flags.insert(arg.clone());
        } else if let Some(bundle) = arg.strip_prefix('-') {
            flags.extend(bundle.chars().map(|c| format!("-{c}")));
        }
    }
    flags
}

fn format_set(set: &BTreeSet<String>) -> String {
    format!("{{{}}}", set.iter().cloned().collect::<Vec<_>>().join(", "))
}

fn truncate(command: &str) -> String {
    const MAX: usize = 80;
    if command.chars().count() > MAX {
        let head: String = command.chars().take(MAX).collect();
        format!("{head}...")
    } else {
        command.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rejection(cmd: &str) -> String {
        CommandValidator::new()
            .validate(cmd)
            .reason()
            .unwrap_or_else(|| panic!("expected {:?} to be rejected", cmd))
            .to_string()
    }

    #[test]
    fn test_allowed_commands() {
        let validator = CommandValidator::new();

        for cmd in [
            "ls",
            "ls -la",
            "ls -l -a",
            "ls --color",
            "cat -n file.txt",
            "grep -rn pattern src",
            "head -n 5 file",
            "wc -l file.txt",
            "pwd",
            "echo hello",
            "  echo   spaced  ",
            "echo 'hello world'",
        ] {
            assert!(validator.validate(cmd).is_accepted(), "Should accept: {}", cmd);
        }
    }

    #[test]
    fn test_unknown_command_lists_allowed() {
        let reason = rejection("whoami");
        let policy = Policy::default();
        let expected = policy.commands().collect::<Vec<_>>().join(", ");

        assert_eq!(
            reason,
            format!("Command 'whoami' is not allowed. Allowed commands: {}", expected)
        );
        assert!(reason.contains("cat, cd, curl, df, du, echo, find, grep, head, ls"));
    }

    #[test]
    fn test_base_command_is_case_sensitive() {
        assert!(rejection("LS -l").contains("'LS' is not allowed"));
    }

    #[test]
    fn test_dangerous_patterns_reject_any_base() {
        let cases = [
            ("ls; pwd", "shell operators"),
            ("ls | wc", "shell operators"),
            ("echo `id`", "shell operators"),
            ("echo $HOME", "shell operators"),
            ("rm -rf /", "remove command"),
            ("sudo ls", "sudo command"),
            ("echo hi > out.txt", "output redirection"),
            ("echo hi >> out.txt", "redirection"),
            ("cat < in.txt", "input redirection"),
            ("cat ../etc/passwd", "parent directory traversal"),
        ];

        for (cmd, category) in cases {
            let reason = rejection(cmd);
            assert!(
                reason.starts_with("Command contains dangerous pattern:"),
                "{}: {}",
                cmd,
                reason
            );
            assert!(reason.contains(category), "{}: {}", cmd, reason);
        }
    }

    #[test]
    fn test_dangerous_pattern_checked_before_tokenizing() {
        // Quoting does not hide the pattern from the raw scan
        assert!(rejection("echo 'a;b'").contains("shell operators"));
        assert!(rejection("echo \"rm x\"").contains("remove command"));
        // The raw scan also runs before the unterminated quote is noticed
        assert!(rejection("echo 'a|b").contains("shell operators"));
    }

    #[test]
    fn test_traversal_assembled_by_quote_removal() {
        // Raw text has no `..`; the token does
        assert!(rejection("cat .'.'/etc/passwd").contains("parent directory traversal"));
        assert!(rejection("cat .\\./etc/passwd").contains("parent directory traversal"));
    }

    #[test]
    fn test_tokenization_error() {
        let reason = rejection("echo 'unterminated");
        assert!(reason.starts_with("Failed to tokenize command:"), "{}", reason);
    }

    #[test]
    fn test_empty_command() {
        assert_eq!(rejection(""), "Empty command");
        assert_eq!(rejection("   "), "Empty command");
        // An empty quoted word is a token, not an empty command
        assert!(rejection("''").starts_with("Command '' is not allowed."));
    }

    #[test]
    fn test_comment_word_ends_command() {
        // Words from an unquoted `#` onward are a comment and never reach
        // the flag check; neither execution mode runs them either
        let validator = CommandValidator::new();
        assert!(validator.validate("ls #-z").is_accepted());
        let safe = validator.check("ls -l #-z").unwrap();
        assert_eq!(safe.args, vec!["-l"]);

        // Quoted or mid-word `#` is an ordinary character
        let safe = validator.check("ls '#-z'").unwrap();
        assert_eq!(safe.args, vec!["#-z"]);
        let safe = validator.check("echo a#b").unwrap();
        assert_eq!(safe.args, vec!["a#b"]);
    }

    #[test]
    fn test_fail_closed_str_panic() {
        let result = fail_closed(|| panic!("lookup table corrupted"));
        let err = result.unwrap_err();
        assert_eq!(
            err,
            CommandValidationError::Internal("lookup table corrupted".to_string())
        );
        assert!(err.to_string().starts_with("Failed to validate command:"));
    }

    #[test]
    fn test_fail_closed_string_panic() {
        let detail = String::from("bad index 7");
        let result = fail_closed(move || panic!("{}", detail));
        let err = result.unwrap_err();
        assert_eq!(err, CommandValidationError::Internal("bad index 7".to_string()));
        assert_eq!(err.to_string(), "Failed to validate command: bad index 7");

        let verdict: ValidationVerdict = fail_closed(|| panic!("boom {}", 1)).into();
        assert_eq!(verdict.reason(), Some("Failed to validate command: boom 1"));
    }

    #[test]
    fn test_fail_closed_passes_through() {
        assert_eq!(
            fail_closed(|| Err(CommandValidationError::EmptyCommand)),
            Err(CommandValidationError::EmptyCommand)
        );
    }

    #[test]
    fn test_flag_bundle_equivalence() {
        let validator = CommandValidator::new();
        assert_eq!(validator.validate("ls -la"), validator.validate("ls -l -a"));
        assert!(validator.validate("ls -la").is_accepted());
        assert_eq!(validator.validate("ls -lz"), validator.validate("ls -l -z"));
    }

    #[test]
    fn test_flag_smuggling() {
        let reason = rejection("ls -z");
        assert!(reason.contains("Flags {-z} are not allowed for command 'ls'"), "{}", reason);
        assert!(reason.contains("Allowed flags: {--color, -a, -h, -l, -r, -t}"), "{}", reason);

        // A disallowed flag hidden inside an otherwise valid bundle
        let reason = rejection("ls -laX");
        assert!(reason.contains("{-X}"), "{}", reason);
    }

    #[test]
    fn test_long_flags_kept_whole() {
        let validator = CommandValidator::new();
        assert!(validator.validate("cat --number file").is_accepted());
        assert!(rejection("cat --show-all file").contains("{--show-all}"));
    }

    #[test]
    fn test_wildcard_commands_accept_any_flags() {
        let validator = CommandValidator::new();
        assert!(validator.validate("echo anything --whatever").is_accepted());
        assert!(validator.validate("echo -neE x").is_accepted());
        assert!(validator.validate("python3 -c 'print(1)'").is_accepted());
    }

    #[test]
    fn test_multi_char_single_dash_entries_are_unbundled() {
        // `-name` expands to -n -a -m -e, none of which are in find's set
        assert!(rejection("find . -name foo").contains("not allowed for command 'find'"));
        assert!(rejection("ps -ef").contains("not allowed for command 'ps'"));
    }

    #[test]
    fn test_non_flag_arguments_ignored() {
        let validator = CommandValidator::new();
        assert!(validator.validate("grep -i needle haystack.txt").is_accepted());
        // A lone dash contributes no flags
        assert!(validator.validate("cat -").is_accepted());
    }

    #[test]
    fn test_custom_policy() {
        let policy = Arc::new(Policy::from_commands([("git", vec!["--oneline"])]));
        let validator = CommandValidator::with_policy(policy);

        assert!(validator.validate("git --oneline").is_accepted());
        assert_eq!(
            rejection_with(&validator, "ls"),
            "Command 'ls' is not allowed. Allowed commands: git"
        );
    }

    fn rejection_with(validator: &CommandValidator, cmd: &str) -> String {
        validator.validate(cmd).reason().unwrap().to_string()
    }

    #[test]
    fn test_check_returns_tokens() {
        let safe = CommandValidator::new()
            .check("grep -i 'two words' file.txt")
            .unwrap();

        assert_eq!(safe.program, "grep");
        assert_eq!(safe.args, vec!["-i", "two words", "file.txt"]);
        assert_eq!(safe.original, "grep -i 'two words' file.txt");
        let (program, args) = safe.as_tuple();
        assert_eq!(program, "grep");
        assert_eq!(args.len(), 3);
    }

    #[test]
    fn test_expand_flags() {
        let args: Vec<String> = ["-la", "--color", "file", "-", "-n"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let flags: Vec<String> = expand_flags(&args).into_iter().collect();
        assert_eq!(flags, vec!["--color", "-a", "-l", "-n"]);
    }

    #[test]
    fn test_verdict_serialization() {
        let accepted = serde_json::to_value(ValidationVerdict::Accepted).unwrap();
        assert_eq!(accepted, serde_json::json!({ "verdict": "accepted" }));

        let rejected = serde_json::to_value(ValidationVerdict::Rejected {
            reason: "Empty command".to_string(),
        })
        .unwrap();
        assert_eq!(
            rejected,
            serde_json::json!({ "verdict": "rejected", "reason": "Empty command" })
        );
    }

    proptest! {
        #[test]
        fn prop_bundle_matches_separate_flags(
            letters in prop::collection::vec(prop::sample::select(vec!['l', 'a', 'h', 't', 'r', 'x', 'z']), 1..6)
        ) {
            let validator = CommandValidator::new();
            let bundled = format!("ls -{}", letters.iter().collect::<String>());
            let separate = format!(
                "ls {}",
                letters.iter().map(|c| format!("-{c}")).collect::<Vec<_>>().join(" ")
            );
            prop_assert_eq!(
                validator.validate(&bundled).is_accepted(),
                validator.validate(&separate).is_accepted()
            );
        }

        #[test]
        fn prop_shell_operators_always_rejected(
            prefix in "[a-z ]{0,10}",
            op in prop::sample::select(vec![';', '|', '&', '`', '$']),
            suffix in "[a-z ]{0,10}"
        ) {
            let validator = CommandValidator::new();
            let cmd = format!("echo {prefix}{op}{suffix}");
            let verdict = validator.validate(&cmd);
            prop_assert!(!verdict.is_accepted());
            prop_assert!(verdict.reason().unwrap().contains("shell operators"));
        }

        #[test]
        fn prop_validate_never_panics(cmd in ".{0,64}") {
            let _ = CommandValidator::new().validate(&cmd);
        }
    }
}
