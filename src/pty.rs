//! PTY-backed terminal implementation.
//!
//! Spawns the user's shell on a pseudo-terminal, pumps reader bytes into the
//! broadcast data stream, and accumulates de-escaped screen text for
//! marker-bounded extraction. Command-finished events come from the
//! shell-integration markers observed in the stream, so the reported quality
//! should reflect whether the user's shell actually emits them.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use portable_pty::{
    Child, ChildKiller, CommandBuilder, MasterPty, PtySize, PtySystem, SlavePty,
    native_pty_system,
};
use tokio::sync::{Notify, broadcast, watch};

use crate::error::{ExecError, Result};
use crate::integration::{IntegrationEvent, MarkerScanner, ShellIntegrationQuality};
use crate::terminal::{
    FinishedCommand, MarkerId, ScreenBuffer, Terminal, TerminalFactory, unavailable_io,
};

const PTY_ROWS: u16 = 24;
const PTY_COLS: u16 = 80;
/// Bound on waiting for the shell's first output.
const READY_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(5000);

/// Configuration for spawning PTY terminals.
#[derive(Debug, Clone)]
pub struct PtyConfig {
    pub shell: String,
    pub cwd: PathBuf,
    /// Trust level of the shell's integration markers. This is a property of
    /// the user's shell configuration, not something the subsystem can
    /// detect up front, so the embedder declares it.
    pub quality: ShellIntegrationQuality,
}

pub struct PtyTerminal {
    config: PtyConfig,
    pid: Option<u32>,
    data_tx: broadcast::Sender<String>,
    screen: Mutex<ScreenBuffer>,
    finished: Mutex<std::collections::VecDeque<FinishedCommand>>,
    finished_notify: Notify,
    writer: Mutex<Box<dyn Write + Send>>,
    child: Mutex<Box<dyn Child + Send>>,
    // Kept alive for the lifetime of the terminal; dropping it closes the pty.
    _master: Mutex<Box<dyn MasterPty + Send>>,
    ready_rx: watch::Receiver<bool>,
    disposed: AtomicBool,
}

impl PtyTerminal {
    /// Spawn the configured shell on a fresh PTY.
    pub fn spawn(config: PtyConfig) -> Result<Arc<Self>> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: PTY_ROWS,
                cols: PTY_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|err| ExecError::unavailable(format!("openpty failed: {err}")))?;

        let mut command = CommandBuilder::new(&config.shell);
        command.cwd(&config.cwd);
        let child = pair
            .slave
            .spawn_command(command)
            .map_err(|err| ExecError::unavailable(format!("failed to spawn shell: {err}")))?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|err| ExecError::unavailable(format!("failed to clone pty reader: {err}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|err| ExecError::unavailable(format!("failed to take pty writer: {err}")))?;

        let (data_tx, _) = broadcast::channel(1024);
        let (ready_tx, ready_rx) = watch::channel(false);
        let pid = child.process_id();

        let terminal = Arc::new(Self {
            config,
            pid,
            data_tx,
            screen: Mutex::new(ScreenBuffer::default()),
            finished: Mutex::new(std::collections::VecDeque::new()),
            finished_notify: Notify::new(),
            writer: Mutex::new(writer),
            child: Mutex::new(child),
            _master: Mutex::new(pair.master),
            ready_rx,
            disposed: AtomicBool::new(false),
        });

        let pump = Arc::downgrade(&terminal);
        std::thread::spawn(move || {
            let mut reader = reader;
            let mut chunk = [0u8; 4096];
            let mut scanner = MarkerScanner::default();
            loop {
                let read = match reader.read(&mut chunk) {
                    Ok(0) | Err(_) => break,
                    Ok(read) => read,
                };
                let Some(terminal) = pump.upgrade() else {
                    break;
                };
                let data = String::from_utf8_lossy(&chunk[..read]).to_string();
                terminal.ingest(&mut scanner, &data);
                ready_tx.send(true).ok();
            }
        });

        Ok(terminal)
    }

    fn ingest(&self, scanner: &mut MarkerScanner, data: &str) {
        let scanned = scanner.scan(data);
        lock(&self.screen).append(&scanned.text);
        for event in scanned.events {
            if let IntegrationEvent::CommandFinished { exit_code } = event {
                lock(&self.finished).push_back(FinishedCommand {
                    exit_code,
                    // Marker-bounded capture is the output source; per-command
                    // attribution is not reconstructed from the pty stream.
                    output: None,
                });
                self.finished_notify.notify_waiters();
            }
        }
        self.data_tx.send(data.to_string()).ok();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[async_trait]
impl Terminal for PtyTerminal {
    async fn wait_ready(&self) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(ExecError::unavailable("terminal disposed"));
        }
        if *self.ready_rx.borrow() {
            return Ok(());
        }
        let mut ready = self.ready_rx.clone();
        let waited = tokio::time::timeout(READY_TIMEOUT, async {
            while !*ready.borrow_and_update() {
                if ready.changed().await.is_err() {
                    return false;
                }
            }
            true
        })
        .await;
        match waited {
            Ok(true) => Ok(()),
            Ok(false) => Err(ExecError::unavailable("shell exited before becoming ready")),
            Err(_) => Err(ExecError::unavailable("shell produced no output")),
        }
    }

    fn integration_quality(&self) -> ShellIntegrationQuality {
        self.config.quality
    }

    fn shell_executable(&self) -> String {
        self.config.shell.clone()
    }

    fn current_dir(&self) -> Option<PathBuf> {
        Some(self.config.cwd.clone())
    }

    async fn process_id(&self) -> Option<u32> {
        self.pid
    }

    fn subscribe_data(&self) -> broadcast::Receiver<String> {
        self.data_tx.subscribe()
    }

    fn register_marker(&self) -> MarkerId {
        lock(&self.screen).register_marker()
    }

    fn remove_marker(&self, marker: MarkerId) {
        lock(&self.screen).remove_marker(marker);
    }

    fn text_between(&self, start: MarkerId, end: Option<MarkerId>) -> String {
        lock(&self.screen).text_between(start, end)
    }

    async fn run_command(&self, command_line: &str) -> Result<()> {
        if self.disposed.load(Ordering::SeqCst) {
            return Err(ExecError::unavailable("terminal disposed"));
        }
        let mut writer = lock(&self.writer);
        writer
            .write_all(command_line.as_bytes())
            .map_err(|err| unavailable_io("pty write failed", err))?;
        writer
            .write_all(b"\r")
            .map_err(|err| unavailable_io("pty write failed", err))?;
        writer
            .flush()
            .map_err(|err| unavailable_io("pty flush failed", err))?;
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
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = lock(&self.child).kill() {
            tracing::debug!(%err, "failed to kill pty child on dispose");
        }
        self.finished_notify.notify_waiters();
    }
}

/// Factory spawning [`PtyTerminal`]s from one configuration.
pub struct PtyTerminalFactory {
    config: PtyConfig,
}

impl PtyTerminalFactory {
    pub fn new(config: PtyConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl TerminalFactory for PtyTerminalFactory {
    async fn create_terminal(&self, _background: bool) -> Result<Arc<dyn Terminal>> {
        let terminal = PtyTerminal::spawn(self.config.clone())?;
        Ok(terminal as Arc<dyn Terminal>)
    }

    fn default_shell(&self) -> String {
        self.config.shell.clone()
    }
}
