//! Command-line segmentation without a shell grammar.
//!
//! Splits compound command lines on shell control operators and extracts
//! nested command substitutions. This is a deliberate heuristic: quoting and
//! escaping are not interpreted, so `echo "a && b"` splits into two
//! segments. Approval decisions are computed over exactly this split, so the
//! behavior is pinned by tests rather than "fixed".

use std::collections::HashSet;

use crate::shell::ShellKind;

/// Split a command line into its top-level sub-commands.
///
/// Applies the dialect's separator tokens in order, trimming whitespace
/// after each split and dropping empty segments. A segment with no
/// separators comes back unchanged as the only element.
pub fn split_top_level(command_line: &str, kind: ShellKind) -> Vec<String> {
    let mut segments = vec![command_line.trim().to_string()];
    for separator in kind.separators() {
        let split: Vec<String> = segments
            .iter()
            .flat_map(|segment| segment.split(separator))
            .map(|segment| segment.trim().to_string())
            .collect();
        segments = split;
    }
    segments.retain(|segment| !segment.is_empty());
    segments
}

/// Extract every inline command substitution, recursively.
///
/// POSIX shells: `$( … )`, backtick spans, and process substitution
/// `<( … )` / `>( … )`. PowerShell: `$( … )`, `@( … )`, `&( … )`.
/// Parenthesized forms are matched with a depth-counting scanner so nested
/// substitutions resolve to their real closing paren; backtick spans run to
/// the next unescaped backtick and do not nest. Malformed or unterminated
/// constructs are ignored without a partial match. The result is a set:
/// de-duplicated and unordered.
pub fn extract_inline_substitutions(command_line: &str, kind: ShellKind) -> HashSet<String> {
    let mut found = HashSet::new();
    collect_substitutions(command_line, kind, &mut found);
    found
}

fn substitution_prefixes(kind: ShellKind) -> &'static [&'static str] {
    match kind {
        ShellKind::PowerShell => &["$(", "@(", "&("],
        ShellKind::Posix | ShellKind::Zsh => &["$(", "<(", ">("],
    }
}

fn collect_substitutions(text: &str, kind: ShellKind, found: &mut HashSet<String>) {
    let bytes = text.as_bytes();
    let mut index = 0;
    while index < bytes.len() {
        if !kind.is_power_shell() && bytes[index] == b'`' {
            match unescaped_backtick_end(bytes, index + 1) {
                Some(end) => {
                    record(&text[index + 1..end], kind, found);
                    index = end + 1;
                }
                None => index += 1,
            }
            continue;
        }

        if let Some(prefix) = prefix_at(text, index, kind) {
            let inner_start = index + prefix.len();
            match balanced_close(bytes, inner_start) {
                Some(close) => {
                    record(&text[inner_start..close], kind, found);
                    index = close + 1;
                }
                None => index += prefix.len(),
            }
            continue;
        }

        index += 1;
    }
}

fn record(inner: &str, kind: ShellKind, found: &mut HashSet<String>) {
    let inner = inner.trim();
    if inner.is_empty() {
        return;
    }
    if found.insert(inner.to_string()) {
        collect_substitutions(inner, kind, found);
    }
}

fn prefix_at(text: &str, index: usize, kind: ShellKind) -> Option<&'static str> {
    // Byte-wise comparison: `index` may sit inside a multi-byte character.
    let rest = &text.as_bytes()[index..];
    substitution_prefixes(kind)
        .iter()
        .find(|prefix| rest.starts_with(prefix.as_bytes()))
        .copied()
}

/// Position of the `)` matching an already-consumed `(`, honoring nesting.
fn balanced_close(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 1usize;
    for (offset, byte) in bytes[start..].iter().enumerate() {
        match byte {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn unescaped_backtick_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut index = start;
    while index < bytes.len() {
        match bytes[index] {
            b'\\' => index += 2,
            b'`' => return Some(index),
            _ => index += 1,
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn set(items: &[&str]) -> HashSet<String> {
        items.iter().map(|item| (*item).to_string()).collect()
    }

    #[test]
    fn single_command_is_returned_unchanged() {
        assert_eq!(
            split_top_level("cargo test", ShellKind::Posix),
            vec!["cargo test".to_string()]
        );
    }

    #[test]
    fn splits_on_chains_pipes_and_redirections() {
        assert_eq!(
            split_top_level("make build && make test | tee log.txt", ShellKind::Posix),
            vec!["make build", "make test", "tee log.txt"]
        );
        assert_eq!(
            split_top_level("cmd1 ; cmd2 &> out.txt", ShellKind::Posix),
            vec!["cmd1", "cmd2", "out.txt"]
        );
    }

    #[test]
    fn longest_separator_wins() {
        // `&>>` must be consumed as one operator, not as `&` then `>>`.
        assert_eq!(
            split_top_level("run &>> all.log", ShellKind::Posix),
            vec!["run", "all.log"]
        );
    }

    #[test]
    fn powershell_separator_set() {
        assert_eq!(
            split_top_level("Get-ChildItem | Select-Object Name; exit", ShellKind::PowerShell),
            vec!["Get-ChildItem", "Select-Object Name", "exit"]
        );
    }

    #[test]
    fn quoting_is_not_interpreted() {
        // Known approximation: separators inside quotes still split.
        assert_eq!(
            split_top_level("echo \"a && b\"", ShellKind::Posix),
            vec!["echo \"a", "b\""]
        );
    }

    #[test]
    fn no_substitutions_yields_empty_set() {
        assert!(extract_inline_substitutions("ls -la /tmp", ShellKind::Posix).is_empty());
    }

    #[test]
    fn extracts_dollar_paren_and_backticks() {
        assert_eq!(
            extract_inline_substitutions("echo $(date) `uname -r`", ShellKind::Posix),
            set(&["date", "uname -r"])
        );
    }

    #[test]
    fn nested_substitutions_are_extracted_recursively() {
        assert_eq!(
            extract_inline_substitutions("echo \"$(echo \"$(date)\")\"", ShellKind::Posix),
            set(&["echo \"$(date)\"", "date"])
        );
    }

    #[test]
    fn process_substitution_forms() {
        assert_eq!(
            extract_inline_substitutions("diff <(sort a) >(tee b)", ShellKind::Posix),
            set(&["sort a", "tee b"])
        );
    }

    #[test]
    fn powershell_substitution_forms() {
        assert_eq!(
            extract_inline_substitutions(
                "Write-Output $(Get-Date) @(1, 2) &(Get-Command git)",
                ShellKind::PowerShell
            ),
            set(&["Get-Date", "1, 2", "Get-Command git"])
        );
    }

    #[test]
    fn unterminated_substitution_is_ignored() {
        assert!(extract_inline_substitutions("echo $(date", ShellKind::Posix).is_empty());
        assert!(extract_inline_substitutions("echo `date", ShellKind::Posix).is_empty());
    }

    #[test]
    fn empty_inner_commands_are_discarded() {
        assert!(extract_inline_substitutions("echo $(  )", ShellKind::Posix).is_empty());
    }

    #[test]
    fn duplicate_substitutions_collapse() {
        assert_eq!(
            extract_inline_substitutions("echo $(date) $(date)", ShellKind::Posix),
            set(&["date"])
        );
    }
}
