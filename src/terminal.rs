//! The terminal boundary consumed by execution strategies.
//!
//! Everything about rendering, keystrokes and screen state lives behind this
//! trait; the subsystem only needs a data stream, marker-bounded text
//! extraction, and (when integration is available) command-finished events.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::{ExecError, Result};
use crate::integration::ShellIntegrationQuality;

/// Opaque handle to a position in a terminal's screen text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkerId(pub(crate) u64);

/// A command completion reported through shell integration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedCommand {
    pub exit_code: Option<i32>,
    /// Self-reported output of the command, when the integration level
    /// attributes output per command.
    pub output: Option<String>,
}

/// Long-lived terminal session handle.
///
/// Implementations must be cheap to share (`Arc`) and callable from a single
/// task at a time per command; the data stream may fan out to any number of
/// subscribers.
#[async_trait]
pub trait Terminal: Send + Sync {
    /// Resolve once the terminal can accept a command.
    async fn wait_ready(&self) -> Result<()>;

    fn integration_quality(&self) -> ShellIntegrationQuality;

    fn shell_executable(&self) -> String;

    fn current_dir(&self) -> Option<PathBuf>;

    /// OS process id of the shell, once known.
    async fn process_id(&self) -> Option<u32>;

    /// Subscribe to the raw data stream (integration sequences included).
    fn subscribe_data(&self) -> broadcast::Receiver<String>;

    /// Register a marker at the current end of the screen text.
    fn register_marker(&self) -> MarkerId;

    fn remove_marker(&self, marker: MarkerId);

    /// Screen text between two markers; `end = None` reads to the current
    /// end. Repeatable, not a draining read.
    fn text_between(&self, start: MarkerId, end: Option<MarkerId>) -> String;

    /// Issue a command line to the shell.
    async fn run_command(&self, command_line: &str) -> Result<()>;

    /// Next command-finished event, or `None` once the terminal is disposed.
    /// Events are queued, so a completion that lands before the caller
    /// awaits is not lost.
    async fn next_finished_command(&self) -> Option<FinishedCommand>;

    fn is_disposed(&self) -> bool;

    fn dispose(&self);
}

/// Allocates terminals for the orchestrator.
#[async_trait]
pub trait TerminalFactory: Send + Sync {
    async fn create_terminal(&self, background: bool) -> Result<std::sync::Arc<dyn Terminal>>;

    /// Shell executable used for terminals this factory creates; consulted
    /// for dialect decisions before any terminal exists.
    fn default_shell(&self) -> String;
}

/// Plain-text screen accumulator shared by terminal implementations.
///
/// Markers are byte offsets into the accumulated text; removing a marker
/// only forgets the offset, the text is retained.
#[derive(Debug, Default)]
pub(crate) struct ScreenBuffer {
    text: String,
    markers: HashMap<u64, usize>,
    next_marker: u64,
}

impl ScreenBuffer {
    pub(crate) fn append(&mut self, text: &str) {
        self.text.push_str(text);
    }

    pub(crate) fn register_marker(&mut self) -> MarkerId {
        let id = self.next_marker;
        self.next_marker += 1;
        self.markers.insert(id, self.text.len());
        MarkerId(id)
    }

    pub(crate) fn remove_marker(&mut self, marker: MarkerId) {
        self.markers.remove(&marker.0);
    }

    pub(crate) fn text_between(&self, start: MarkerId, end: Option<MarkerId>) -> String {
        let from = self.markers.get(&start.0).copied().unwrap_or(0);
        let to = end
            .and_then(|marker| self.markers.get(&marker.0).copied())
            .unwrap_or(self.text.len());
        if from >= to {
            return String::new();
        }
        self.text[from..to].to_string()
    }
}

/// Map an unusable-terminal condition into the shared error type.
pub(crate) fn unavailable_io(context: &str, err: std::io::Error) -> ExecError {
    ExecError::unavailable(format!("{context}: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markers_bound_screen_text() {
        let mut screen = ScreenBuffer::default();
        screen.append("before");
        let start = screen.register_marker();
        screen.append("during");
        let end = screen.register_marker();
        screen.append("after");

        assert_eq!(screen.text_between(start, Some(end)), "during");
        assert_eq!(screen.text_between(start, None), "duringafter");
    }

    #[test]
    fn reads_are_repeatable() {
        let mut screen = ScreenBuffer::default();
        let start = screen.register_marker();
        screen.append("line\n");
        assert_eq!(screen.text_between(start, None), "line\n");
        assert_eq!(screen.text_between(start, None), "line\n");
    }

    #[test]
    fn removed_marker_falls_back_to_bounds() {
        let mut screen = ScreenBuffer::default();
        screen.append("head ");
        let start = screen.register_marker();
        screen.append("tail");
        screen.remove_marker(start);
        // A forgotten start marker degrades to the full buffer.
        assert_eq!(screen.text_between(start, None), "head tail");
    }
}
