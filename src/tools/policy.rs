//! Command Allow-List Policy
//!
//! Maps a base command to the set of flags it may be invoked with.
//! An empty flag set means the command's flags are not restricted at all;
//! it does NOT mean "no flags allowed".

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

lazy_static! {
    static ref DEFAULT_POLICY: Arc<Policy> = Arc::new(Policy::builtin());
}

/// Immutable allow-list of base commands and their permitted flags
///
/// Lookups are exact and case-sensitive. Ordered containers keep the
/// enumeration used in rejection messages sorted and reproducible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Policy {
    commands: BTreeMap<String, BTreeSet<String>>,
}

impl Default for Policy {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Policy {
    /// The process-wide built-in policy, built once on first use
    pub fn shared() -> Arc<Policy> {
        Arc::clone(&DEFAULT_POLICY)
    }

    /// Build a policy from a loaded command table
    pub fn from_commands<I, C, F>(commands: I) -> Self
    where
        I: IntoIterator<Item = (C, F)>,
        C: Into<String>,
        F: IntoIterator,
        F::Item: Into<String>,
    {
        Self {
            commands: commands
                .into_iter()
                .map(|(cmd, flags)| (cmd.into(), flags.into_iter().map(Into::into).collect()))
                .collect(),
        }
    }

    fn builtin() -> Self {
        Self::from_commands([
            ("ls", vec!["-l", "-a", "-h", "-t", "-r", "--color"]),
            ("cd", vec![]),
            ("cat", vec!["-n", "--number"]),
            ("head", vec!["-n"]),
            ("tail", vec!["-n", "-f"]),
            ("grep", vec!["-i", "-r", "-n", "-l", "-v", "--color"]),
            ("find", vec!["-name", "-type", "-size", "-mtime"]),
            ("pwd", vec![]),
            ("echo", vec![]),
            ("python3", vec![]),
            ("python", vec![]),
            ("curl", vec![]),
            ("ps", vec!["-ef", "-aux"]),
            ("df", vec!["-h"]),
            ("du", vec!["-h", "-s"]),
            ("wc", vec!["-l", "-w", "-c"]),
        ])
    }

    /// Permitted flags for `command`, or `None` if the command is not allowed
    pub fn allowed_flags(&self, command: &str) -> Option<&BTreeSet<String>> {
        self.commands.get(command)
    }

    pub fn is_allowed(&self, command: &str) -> bool {
        self.commands.contains_key(command)
    }

    /// True if `command` is allowed and its flags are unrestricted
    pub fn is_wildcard(&self, command: &str) -> bool {
        self.allowed_flags(command).is_some_and(BTreeSet::is_empty)
    }

    /// Allowed base commands in sorted order
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &BTreeSet<String>)> {
        self.commands.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
