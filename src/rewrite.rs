//! Cosmetic rewrite of redundant `cd` prefixes.
//!
//! Agents habitually emit `cd /workspace && npm test` even when the terminal
//! already sits in `/workspace`. The prefix is dropped when the target
//! directory provably equals the terminal's working directory (or the sole
//! workspace root before any terminal exists); anything less certain leaves
//! the command untouched.

use std::path::{Path, PathBuf};

use crate::shell::OsFamily;

/// Rewrite `cd <dir> && <suffix>` / `cd <dir>; <suffix>` to `<suffix>`.
///
/// Returns `None` when the command does not match the shape or the directory
/// cannot be proven current. The caller keeps the original command line.
pub fn rewrite_cd_prefix(
    command: &str,
    terminal_cwd: Option<&Path>,
    workspace_roots: &[PathBuf],
    os: OsFamily,
) -> Option<String> {
    let rest = command.trim().strip_prefix("cd ")?;
    let (dir, suffix) = split_on_chain(rest)?;
    let suffix = suffix.trim();
    if suffix.is_empty() {
        return None;
    }

    let dir = unquote(dir.trim());
    let current = match terminal_cwd {
        Some(cwd) => cwd.to_path_buf(),
        None => {
            // Without a terminal the only trustworthy reference is a single
            // unambiguous workspace root.
            let [sole_root] = workspace_roots else {
                return None;
            };
            sole_root.clone()
        }
    };

    if paths_equal(dir, &current.to_string_lossy(), os) {
        Some(suffix.to_string())
    } else {
        None
    }
}

// `&&` and `;` are the chain forms agents emit in every supported dialect.
fn split_on_chain(rest: &str) -> Option<(&str, &str)> {
    let chain = rest.find("&&").map(|at| (at, 2));
    let semi = rest.find(';').map(|at| (at, 1));
    let (at, len) = match (chain, semi) {
        (Some(a), Some(b)) => {
            if a.0 <= b.0 {
                a
            } else {
                b
            }
        }
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    Some((&rest[..at], &rest[at + len..]))
}

fn unquote(dir: &str) -> &str {
    for quote in ['"', '\''] {
        if dir.len() >= 2 && dir.starts_with(quote) && dir.ends_with(quote) {
            return &dir[1..dir.len() - 1];
        }
    }
    dir
}

fn paths_equal(candidate: &str, current: &str, os: OsFamily) -> bool {
    let candidate = trim_one_trailing_separator(candidate);
    let current = trim_one_trailing_separator(current);
    match os {
        OsFamily::Windows => candidate.eq_ignore_ascii_case(current),
        OsFamily::Unix => candidate == current,
    }
}

fn trim_one_trailing_separator(path: &str) -> &str {
    path.strip_suffix('/')
        .or_else(|| path.strip_suffix('\\'))
        .unwrap_or(path)
}
