//! Scripted terminal doubles for tests.
//!
//! [`MockTerminal`] plays back configured data chunks and finished events
//! when a command is issued, and records everything the subsystem did to it.
//! Kept in the library (not behind `cfg(test)`) so integration tests and
//! embedders' own tests can drive the orchestrator without a real PTY.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::{Notify, broadcast};

use crate::error::{ExecError, Result};
use crate::integration::{MarkerScanner, ShellIntegrationQuality};
use crate::terminal::{FinishedCommand, MarkerId, ScreenBuffer, Terminal, TerminalFactory};

/// One scripted response to `run_command`.
#[derive(Debug, Default, Clone)]
pub struct ScriptedRun {
    chunks: Vec<String>,
    finished: Option<FinishedCommand>,
}

impl ScriptedRun {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw data chunk (integration sequences included) emitted when
    /// the command runs.
    pub fn chunk(mut self, data: &str) -> Self {
        self.chunks.push(data.to_string());
        self
    }

    /// Report a command-finished event after the chunks.
    pub fn finished(mut self, exit_code: Option<i32>, output: Option<&str>) -> Self {
        self.finished = Some(FinishedCommand {
            exit_code,
            output: output.map(str::to_string),
        });
        self
    }
}

pub struct MockTerminal {
    shell: String,
    cwd: Option<PathBuf>,
    pid: Option<u32>,
    quality: ShellIntegrationQuality,
    data_tx: broadcast::Sender<String>,
    screen: Mutex<ScreenBuffer>,
    scanner: Mutex<MarkerScanner>,
    scripted: Mutex<VecDeque<ScriptedRun>>,
    commands: Mutex<Vec<String>>,
    finished: Mutex<VecDeque<FinishedCommand>>,
    finished_notify: Notify,
    live_markers: Mutex<i64>,
    fail_reason: Mutex<Option<String>>,
    disposed: AtomicBool,
}

impl MockTerminal {
    pub fn new(quality: ShellIntegrationQuality) -> Self {
        let (data_tx, _) = broadcast::channel(256);
        Self {
            shell: "/bin/bash".to_string(),
            cwd: None,
            pid: Some(4242),
            quality,
            data_tx,
            screen: Mutex::new(ScreenBuffer::default()),
            scanner: Mutex::new(MarkerScanner::default()),
            scripted: Mutex::new(VecDeque::new()),
            commands: Mutex::new(Vec::new()),
            finished: Mutex::new(VecDeque::new()),
            finished_notify: Notify::new(),
            live_markers: Mutex::new(0),
            fail_reason: Mutex::new(None),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn with_shell(mut self, shell: &str) -> Self {
        self.shell = shell.to_string();
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_pid(mut self, pid: Option<u32>) -> Self {
        self.pid = pid;
        self
    }

    /// Queue a scripted response for the next `run_command`.
    pub fn script(&self, run: ScriptedRun) {
        lock(&self.scripted).push_back(run);
    }

    /// Fail the next `run_command` with a terminal-unavailable error.
    pub fn fail_next_run(&self, reason: &str) {
        *lock(&self.fail_reason) = Some(reason.to_string());
    }

    /// Emit a raw data chunk as if the shell produced it spontaneously.
    pub fn emit_data(&self, chunk: &str) {
        let cleaned = lock(&self.scanner).scan(chunk).text;
        lock(&self.screen).append(&cleaned);
        // No receivers is fine; markers still land in the screen buffer.
        self.data_tx.send(chunk.to_string()).ok();
    }

    /// Push a command-finished event directly.
    pub fn push_finished(&self, finished: FinishedCommand) {
        lock(&self.finished).push_back(finished);
        self.finished_notify.notify_waiters();
    }

    /// Commands the subsystem has issued, in order.
    pub fn commands_run(&self) -> Vec<String> {
        lock(&self.commands).clone()
    }

    /// Currently registered (not yet removed) markers.
    pub fn live_markers(&self) -> i64 {
        *lock(&self.live_markers)
    }

    pub fn was_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl Terminal for MockTerminal {
    async fn wait_ready(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(ExecError::unavailable("terminal disposed"));
        }
        Ok(())
    }

    fn integration_quality(&self) -> ShellIntegrationQuality {
        self.quality
    }

    fn shell_executable(&self) -> String {
        self.shell.clone()
    }

    fn current_dir(&self) -> Option<PathBuf> {
        self.cwd.clone()
    }

    async fn process_id(&self) -> Option<u32> {
        self.pid
    }

    fn subscribe_data(&self) -> broadcast::Receiver<String> {
        self.data_tx.subscribe()
    }

    fn register_marker(&self) -> MarkerId {
        *lock(&self.live_markers) += 1;
        lock(&self.screen).register_marker()
    }

    fn remove_marker(&self, marker: MarkerId) {
        *lock(&self.live_markers) -= 1;
        lock(&self.screen).remove_marker(marker);
    }

    fn text_between(&self, start: MarkerId, end: Option<MarkerId>) -> String {
        lock(&self.screen).text_between(start, end)
    }

    async fn run_command(&self, command_line: &str) -> Result<()> {
        if let Some(reason) = lock(&self.fail_reason).take() {
            return Err(ExecError::unavailable(reason));
        }
        lock(&self.commands).push(command_line.to_string());
        let run = lock(&self.scripted).pop_front().unwrap_or_default();
        for chunk in &run.chunks {
            self.emit_data(chunk);
        }
        if let Some(finished) = run.finished {
            self.push_finished(finished);
        }
        Ok(())
    }

    async fn next_finished_command(&self) -> Option<FinishedCommand> {
        loop {
            let notified = self.finished_notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(finished) = lock(&self.finished).pop_front() {
                return Some(finished);
            }
            if self.disposed.load(Ordering::SeqCst) {
                return None;
            }
            notified.await;
        }
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.finished_notify.notify_waiters();
    }
}

/// Factory handing out pre-built mock terminals in order.
#[derive(Default)]
pub struct MockTerminalFactory {
    queued: Mutex<VecDeque<Arc<MockTerminal>>>,
    created: Mutex<Vec<Arc<MockTerminal>>>,
    default_shell: String,
}

impl MockTerminalFactory {
    pub fn new() -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            created: Mutex::new(Vec::new()),
            default_shell: "/bin/bash".to_string(),
        }
    }

    pub fn with_default_shell(mut self, shell: &str) -> Self {
        self.default_shell = shell.to_string();
        self
    }

    pub fn queue(&self, terminal: Arc<MockTerminal>) {
        lock(&self.queued).push_back(terminal);
    }

    /// Terminals handed out so far, in creation order.
    pub fn created(&self) -> Vec<Arc<MockTerminal>> {
        lock(&self.created).clone()
    }
}

#[async_trait]
impl TerminalFactory for MockTerminalFactory {
    async fn create_terminal(&self, _background: bool) -> Result<Arc<dyn Terminal>> {
        let terminal = lock(&self.queued)
            .pop_front()
            .ok_or_else(|| ExecError::unavailable("no terminal available"))?;
        lock(&self.created).push(Arc::clone(&terminal));
        Ok(terminal as Arc<dyn Terminal>)
    }

    fn default_shell(&self) -> String {
        self.default_shell.clone()
    }
}
