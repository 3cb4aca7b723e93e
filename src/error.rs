//! Error taxonomy for terminal command execution.

use thiserror::Error;

/// Errors surfaced by the execution subsystem.
#[derive(Debug, Error)]
pub enum ExecError {
    /// The cancellation token fired. Always propagated as-is, never retried.
    #[error("command execution was cancelled")]
    Cancelled,

    /// The terminal handle could not be readied or became unusable.
    /// Fatal for the current terminal; the orchestrator disposes it.
    #[error("terminal unavailable: {reason}")]
    TerminalUnavailable { reason: String },

    /// Output was requested for a background execution id that is not
    /// registered.
    #[error("no background execution with id {id}")]
    UnknownExecutionId { id: String },

    /// A configuration payload could not be parsed.
    #[error("configuration parse failure: {message}")]
    ConfigurationParse { message: String },
}

impl ExecError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        ExecError::TerminalUnavailable {
            reason: reason.into(),
        }
    }

    pub fn unknown_execution(id: impl Into<String>) -> Self {
        ExecError::UnknownExecutionId { id: id.into() }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        ExecError::ConfigurationParse {
            message: message.into(),
        }
    }

    /// Whether this error is the distinguished cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ExecError::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, ExecError>;
