//! Allow/deny approval policy for shell commands.
//!
//! Decides whether a command line may run without user confirmation. A deny
//! match always wins, an allow match is required for auto-approval, and the
//! absence of any match fails closed. Patterns compile once per
//! reconfiguration, never per call.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;

use crate::segment::{extract_inline_substitutions, split_top_level};
use crate::shell::ShellKind;

/// One compiled approval pattern, kept alongside its configured source for
/// diagnostics.
#[derive(Debug, Clone)]
struct CompiledPattern {
    source: String,
    regex: Regex,
}

/// Immutable, fully compiled approval policy.
///
/// Rebuilt wholesale whenever the backing configuration changes.
#[derive(Debug, Clone, Default)]
pub struct ApprovalPolicy {
    deny: Vec<CompiledPattern>,
    allow: Vec<CompiledPattern>,
}

impl ApprovalPolicy {
    /// Compile a policy from `pattern -> enabled` maps.
    ///
    /// Disabled entries are skipped; unparseable patterns are dropped with a
    /// warning so a typo can only make the policy stricter, never looser.
    pub fn from_lists(deny: &BTreeMap<String, bool>, allow: &BTreeMap<String, bool>) -> Self {
        Self {
            deny: compile_list(deny),
            allow: compile_list(allow),
        }
    }

    /// Decide auto-approval for a single command or sub-command.
    ///
    /// PowerShell idiom accommodation: when the command starts with `(`,
    /// both lists are also matched against the command with that leading
    /// paren stripped, so `(Get-Content x) | …` can match a `Get-Content`
    /// pattern.
    pub fn is_auto_approved(&self, command: &str, kind: ShellKind) -> bool {
        let command = command.trim();
        let retried = if kind.is_power_shell() {
            command.strip_prefix('(').map(str::trim_start)
        } else {
            None
        };
        fn find_match<'a>(
            patterns: &'a [CompiledPattern],
            command: &str,
            retried: Option<&str>,
        ) -> Option<&'a CompiledPattern> {
            patterns.iter().find(|pattern| {
                pattern.regex.is_match(command)
                    || retried.is_some_and(|alt| pattern.regex.is_match(alt))
            })
        }

        if let Some(denied_by) = find_match(&self.deny, command, retried) {
            tracing::debug!(command, pattern = %denied_by.source, "command denied by policy");
            return false;
        }
        find_match(&self.allow, command, retried).is_some()
    }

    /// Decide auto-approval for a whole command line.
    ///
    /// The command line auto-approves only if every top-level sub-command
    /// and every recursively extracted inline substitution individually
    /// auto-approves.
    pub fn command_line_is_auto_approved(&self, command_line: &str, kind: ShellKind) -> bool {
        let sub_commands = split_top_level(command_line, kind);
        if sub_commands.is_empty() {
            return false;
        }
        let substitutions = extract_inline_substitutions(command_line, kind);
        sub_commands
            .iter()
            .map(String::as_str)
            .chain(substitutions.iter().map(String::as_str))
            .all(|command| self.is_auto_approved(command, kind))
    }
}

fn compile_list(patterns: &BTreeMap<String, bool>) -> Vec<CompiledPattern> {
    patterns
        .iter()
        .filter(|(_, enabled)| **enabled)
        .filter_map(|(source, _)| {
            compile_pattern(source).map(|regex| CompiledPattern {
                source: source.clone(),
                regex,
            })
        })
        .collect()
}

/// Compile one configured pattern.
///
/// `/…/`-delimited patterns are used verbatim (unanchored). Anything else is
/// a literal matched as a left-anchored prefix with a trailing word boundary,
/// so `echo` approves `echo hello` but not `echotest`. The boundary is
/// omitted when the literal ends in a non-word character, where `\b` could
/// never match the literal's own occurrence.
fn compile_pattern(source: &str) -> Option<Regex> {
    let trimmed = source.trim();
    if trimmed.is_empty() {
        return None;
    }

    let pattern = if trimmed.len() >= 2 && trimmed.starts_with('/') && trimmed.ends_with('/') {
        trimmed[1..trimmed.len() - 1].to_string()
    } else {
        let escaped = regex::escape(trimmed);
        let ends_in_word_char = trimmed
            .chars()
            .last()
            .is_some_and(|ch| ch.is_alphanumeric() || ch == '_');
        if ends_in_word_char {
            format!("^{escaped}\\b")
        } else {
            format!("^{escaped}")
        }
    };

    match Regex::new(&pattern) {
        Ok(regex) => Some(regex),
        Err(err) => {
            tracing::warn!(pattern = %source, %err, "ignoring unparseable approval pattern");
            None
        }
    }
}

/// Raw approval configuration as it appears in a TOML table.
#[derive(Debug, Deserialize, Default)]
pub struct ApprovalConfig {
    #[serde(default)]
    pub allow: BTreeMap<String, bool>,
    #[serde(default)]
    pub deny: BTreeMap<String, bool>,
}

impl ApprovalConfig {
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("failed to parse approval configuration")
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read approval config {}", path.display()))?;
        Self::from_toml(&contents)
    }

    /// Compile into an immutable [`ApprovalPolicy`].
    pub fn compile(&self) -> ApprovalPolicy {
        ApprovalPolicy::from_lists(&self.deny, &self.allow)
    }
}
