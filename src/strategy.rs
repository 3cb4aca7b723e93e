//! Execution strategies over a terminal handle.
//!
//! One strategy per shell-integration quality level, selected with a plain
//! `match`. All three share the marker discipline: the start marker is
//! registered strictly before the command is issued and the end marker
//! strictly after the completion race resolves, so captured output is
//! bounded correctly no matter which race branch won. "Detected done" never
//! implies the process exited; timeouts here only bound detection.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{ExecError, Result};
use crate::idle::{
    IDLE_WINDOW, LONG_IDLE_WINDOW, track_idle_on_prompt, track_idle_on_prompt_stream,
    wait_for_idle,
};
use crate::integration::ShellIntegrationQuality;
use crate::output::{NO_OUTPUT_SENTINEL, with_exit_code};
use crate::terminal::{FinishedCommand, MarkerId, Terminal};

/// Outcome of a single strategy invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub text: String,
    pub exit_code: Option<i32>,
}

/// Progress of one execution, for tracing and invariants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NotStarted,
    WaitingForIdle,
    Executing,
    WaitingForCompletion,
    Done,
    Cancelled,
    Failed,
}

/// How a command is driven to completion, given the terminal's
/// self-reporting trustworthiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// No structured signals: bracket the command with idle waits.
    None,
    /// Markers exist but may be mistimed: confirm the finished event with an
    /// idle-at-prompt wait, and keep a long idle catch-all.
    Basic,
    /// Trustworthy markers and per-command output.
    Rich,
}

impl ExecutionStrategy {
    pub fn for_quality(quality: ShellIntegrationQuality) -> Self {
        match quality {
            ShellIntegrationQuality::None => ExecutionStrategy::None,
            ShellIntegrationQuality::Basic => ExecutionStrategy::Basic,
            ShellIntegrationQuality::Rich => ExecutionStrategy::Rich,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ExecutionStrategy::None => "none",
            ExecutionStrategy::Basic => "basic",
            ExecutionStrategy::Rich => "rich",
        }
    }

    /// Run one command line to detected completion.
    ///
    /// Scoped resources (markers, stream subscriptions) are released on
    /// every exit path; a signaled cancellation token resolves to
    /// [`ExecError::Cancelled`] at the next checkpoint.
    pub async fn execute(
        self,
        terminal: &Arc<dyn Terminal>,
        command_line: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult> {
        let mut tracker = PhaseTracker::new(self);
        let outcome = match self {
            ExecutionStrategy::None => {
                execute_without_integration(terminal, command_line, cancel, &mut tracker).await
            }
            ExecutionStrategy::Basic => {
                execute_basic(terminal, command_line, cancel, &mut tracker).await
            }
            ExecutionStrategy::Rich => {
                execute_rich(terminal, command_line, cancel, &mut tracker).await
            }
        };
        tracker.finish(&outcome);
        outcome
    }
}

struct PhaseTracker {
    strategy: ExecutionStrategy,
    phase: Phase,
}

impl PhaseTracker {
    fn new(strategy: ExecutionStrategy) -> Self {
        Self {
            strategy,
            phase: Phase::NotStarted,
        }
    }

    fn advance(&mut self, next: Phase) {
        tracing::trace!(
            strategy = self.strategy.name(),
            from = ?self.phase,
            to = ?next,
            "execution phase"
        );
        self.phase = next;
    }

    fn finish(&mut self, outcome: &Result<ExecutionResult>) {
        let terminal_phase = match outcome {
            Ok(_) => Phase::Done,
            Err(ExecError::Cancelled) => Phase::Cancelled,
            Err(_) => Phase::Failed,
        };
        self.advance(terminal_phase);
    }
}

/// Marker registration scoped to the enclosing execution.
struct ScopedMarker {
    terminal: Arc<dyn Terminal>,
    id: MarkerId,
}

impl ScopedMarker {
    fn register(terminal: &Arc<dyn Terminal>) -> Self {
        Self {
            terminal: Arc::clone(terminal),
            id: terminal.register_marker(),
        }
    }

    fn id(&self) -> MarkerId {
        self.id
    }
}

impl Drop for ScopedMarker {
    fn drop(&mut self) {
        self.terminal.remove_marker(self.id);
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(ExecError::Cancelled);
    }
    Ok(())
}

/// Await a future unless cancellation wins the race.
async fn cancellable<T>(
    cancel: &CancellationToken,
    future: impl std::future::Future<Output = T>,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(ExecError::Cancelled),
        value = future => Ok(value),
    }
}

async fn execute_without_integration(
    terminal: &Arc<dyn Terminal>,
    command_line: &str,
    cancel: &CancellationToken,
    tracker: &mut PhaseTracker,
) -> Result<ExecutionResult> {
    checkpoint(cancel)?;
    terminal.wait_ready().await?;

    tracker.advance(Phase::WaitingForIdle);
    cancellable(cancel, wait_for_idle(terminal.subscribe_data(), IDLE_WINDOW)).await?;

    let start = ScopedMarker::register(terminal);
    let data = terminal.subscribe_data();
    tracker.advance(Phase::Executing);
    terminal.run_command(command_line).await?;

    tracker.advance(Phase::WaitingForCompletion);
    cancellable(cancel, wait_for_idle(data, IDLE_WINDOW)).await?;
    let end = ScopedMarker::register(terminal);

    let text = terminal.text_between(start.id(), Some(end.id()));
    Ok(ExecutionResult {
        text,
        exit_code: None,
    })
}

async fn execute_basic(
    terminal: &Arc<dyn Terminal>,
    command_line: &str,
    cancel: &CancellationToken,
    tracker: &mut PhaseTracker,
) -> Result<ExecutionResult> {
    checkpoint(cancel)?;
    terminal.wait_ready().await?;

    let start = ScopedMarker::register(terminal);
    let finished_event = terminal.next_finished_command();
    // Subscribed before the command is issued so the catch-all cannot miss
    // markers that land while the event race is being set up.
    let prompt_stream = terminal.subscribe_data();
    tracker.advance(Phase::Executing);
    terminal.run_command(command_line).await?;

    tracker.advance(Phase::WaitingForCompletion);
    let finished: Option<FinishedCommand> = tokio::select! {
        _ = cancel.cancelled() => return Err(ExecError::Cancelled),
        finished = finished_event => {
            // The finished event can be mistimed at this integration level;
            // hold until the prompt has settled before trusting it. Bounded,
            // in case the prompt markers never arrive either.
            let settle = tokio::time::timeout(
                LONG_IDLE_WINDOW,
                track_idle_on_prompt(terminal.as_ref(), IDLE_WINDOW),
            );
            cancellable(cancel, settle).await?.ok();
            finished
        }
        _ = track_idle_on_prompt_stream(prompt_stream, LONG_IDLE_WINDOW) => None,
    };

    let end = ScopedMarker::register(terminal);
    // Output attribution cannot be trusted here, so the finished event's own
    // output is ignored in favor of marker-bounded emulator text.
    let text = terminal.text_between(start.id(), Some(end.id()));
    let exit_code = finished.and_then(|finished| finished.exit_code);
    Ok(ExecutionResult {
        text: with_exit_code(&text, exit_code),
        exit_code,
    })
}

async fn execute_rich(
    terminal: &Arc<dyn Terminal>,
    command_line: &str,
    cancel: &CancellationToken,
    tracker: &mut PhaseTracker,
) -> Result<ExecutionResult> {
    checkpoint(cancel)?;
    terminal.wait_ready().await?;

    let start = ScopedMarker::register(terminal);
    let finished_event = terminal.next_finished_command();
    let prompt_stream = terminal.subscribe_data();
    tracker.advance(Phase::Executing);
    terminal.run_command(command_line).await?;

    tracker.advance(Phase::WaitingForCompletion);
    let finished: Option<FinishedCommand> = tokio::select! {
        _ = cancel.cancelled() => return Err(ExecError::Cancelled),
        finished = finished_event => finished,
        _ = track_idle_on_prompt_stream(prompt_stream, IDLE_WINDOW) => None,
    };

    let end = ScopedMarker::register(terminal);
    let reported = finished
        .as_ref()
        .and_then(|finished| finished.output.clone())
        .filter(|output| !output.is_empty());
    let text = reported.unwrap_or_else(|| terminal.text_between(start.id(), Some(end.id())));
    let text = if text.trim().is_empty() {
        NO_OUTPUT_SENTINEL.to_string()
    } else {
        text
    };
    let exit_code = finished.and_then(|finished| finished.exit_code);
    Ok(ExecutionResult {
        text: with_exit_code(&text, exit_code),
        exit_code,
    })
}
