//! Terminal command execution for coding agents.
//!
//! Provides:
//! - Approval policy over allow/deny pattern lists, evaluated across every
//!   sub-command and inline substitution of a command line
//! - Command-line segmentation for POSIX shells, zsh and PowerShell
//! - Idle and prompt-state tracking over a terminal's data stream
//! - Execution strategies for each shell-integration quality level
//! - A session orchestrator multiplexing foreground and background
//!   terminals, with durable session↔terminal associations

// === Modules ===

pub mod approval;
pub mod error;
pub mod idle;
pub mod integration;
pub mod output;
pub mod persist;
pub mod pty;
pub mod rewrite;
pub mod segment;
pub mod session;
pub mod shell;
pub mod strategy;
pub mod telemetry;
pub mod terminal;
pub mod test_support;
pub mod tool;

// === Re-exports ===

pub use approval::{ApprovalConfig, ApprovalPolicy};
pub use error::{ExecError, Result};
pub use idle::{track_idle_on_prompt, wait_for_idle};
pub use integration::{IntegrationEvent, ShellIntegrationQuality};
pub use persist::{
    AssociationStore, FileAssociationStore, MemoryAssociationStore, SessionAssociation,
};
pub use pty::{PtyConfig, PtyTerminal, PtyTerminalFactory};
pub use rewrite::rewrite_cd_prefix;
pub use segment::{extract_inline_substitutions, split_top_level};
pub use session::{
    ConfirmationRequest, RunOutcome, TerminalOrchestrator, UserConfirmation,
};
pub use shell::{OsFamily, ShellKind};
pub use strategy::{ExecutionResult, ExecutionStrategy};
pub use telemetry::{ApprovalKind, CommandTelemetry};
pub use terminal::{FinishedCommand, MarkerId, Terminal, TerminalFactory};
pub use tool::{GetOutputRequest, RunCommandRequest, ToolContent, ToolOutput};
