//! Dangerous Pattern Detection
//!
//! Raw-text checks run before any tokenization. Tokenizing first would let
//! quoting hide characters these checks must still see.

use lazy_static::lazy_static;
use regex::Regex;

/// A compiled pattern and the category reported when it matches
#[derive(Debug)]
pub struct DangerPattern {
    regex: Regex,
    reason: &'static str,
}

impl DangerPattern {
    fn new(pattern: &str, reason: &'static str) -> Self {
        Self {
            // Patterns are literals in this file; a bad one is a programming error
            regex: Regex::new(pattern).unwrap_or_else(|e| panic!("invalid danger pattern {pattern:?}: {e}")),
            reason,
        }
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    pub fn reason(&self) -> &'static str {
        self.reason
    }

    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }
}

lazy_static! {
    /// Ordered pattern table. The first match decides the reported reason.
    pub static ref DANGER_PATTERNS: Vec<DangerPattern> = vec![
        DangerPattern::new(r"[|;&`$]", "shell operators (|, ;, &, `, $)"),
        DangerPattern::new(r"rm\s", "remove command"),
        DangerPattern::new(r">\s", "output redirection"),
        DangerPattern::new(r">>\s", "append redirection"),
        DangerPattern::new(r"<\s", "input redirection"),
        DangerPattern::new(r"\.\.", "parent directory traversal"),
        DangerPattern::new(r"sudo\s", "sudo command"),
        DangerPattern::new(r"chmod\s", "chmod command"),
        DangerPattern::new(r"chown\s", "chown command"),
        DangerPattern::new(r"mv\s", "move command"),
        DangerPattern::new(r"cp\s", "copy command"),
        DangerPattern::new(r"[\r\n]", "line breaks (command separators)"),
    ];
}

/// Return the first pattern matching `text`, if any
pub fn find_dangerous(text: &str) -> Option<&'static DangerPattern> {
    DANGER_PATTERNS.iter().find(|p| p.is_match(text))
}
