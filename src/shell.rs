//! Shell dialect detection and control-operator tables.

/// Shell dialects the subsystem distinguishes when splitting command lines
/// and matching approval patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShellKind {
    /// POSIX `sh`-compatible shells (bash, dash, fish treated alike).
    Posix,
    Zsh,
    PowerShell,
}

/// Separator tokens for POSIX shells, most specific first so that e.g.
/// `&>>` is consumed before `>>` and `>` get their turn.
const POSIX_SEPARATORS: &[&str] = &[
    "&&", "||", ";;", ";", "|&", "|", "&>>", "&>", "2>>", "2>", ">>", ">", "<<<", "<<", "<", "&",
];

const ZSH_SEPARATORS: &[&str] = &[
    "&&", "||", ";;", ";", "|&", "&|", "&!", "|", "&>>", "&>", "2>>", "2>", ">>", ">", "<<<",
    "<<", "<", "&",
];

const POWERSHELL_SEPARATORS: &[&str] = &[
    "&&", "||", ";", "|", "*>>", "2>>", ">>", "*>", "2>", ">", "<",
];

impl ShellKind {
    /// Derive the dialect from a shell executable path or name.
    ///
    /// Matches the basename case-insensitively, ignoring an optional `.exe`
    /// extension and an optional `-preview` suffix, so `pwsh`,
    /// `PowerShell.exe` and `pwsh-preview` all map to [`ShellKind::PowerShell`].
    pub fn from_executable(executable: &str) -> Self {
        // Split on both separators: Windows shell paths show up on any host.
        let basename = executable
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(executable);
        let mut name = basename.to_ascii_lowercase();
        if let Some(stripped) = name.strip_suffix(".exe") {
            name = stripped.to_string();
        }
        if let Some(stripped) = name.strip_suffix("-preview") {
            name = stripped.to_string();
        }
        match name.as_str() {
            "powershell" | "pwsh" => ShellKind::PowerShell,
            "zsh" => ShellKind::Zsh,
            _ => ShellKind::Posix,
        }
    }

    /// Ordered list of top-level separator tokens for this dialect.
    pub(crate) fn separators(self) -> &'static [&'static str] {
        match self {
            ShellKind::Posix => POSIX_SEPARATORS,
            ShellKind::Zsh => ZSH_SEPARATORS,
            ShellKind::PowerShell => POWERSHELL_SEPARATORS,
        }
    }

    pub fn is_power_shell(self) -> bool {
        matches!(self, ShellKind::PowerShell)
    }
}

/// Host OS family, used for path comparisons in the cd-prefix rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OsFamily {
    Windows,
    Unix,
}

impl OsFamily {
    pub fn current() -> Self {
        if cfg!(windows) {
            OsFamily::Windows
        } else {
            OsFamily::Unix
        }
    }
}
