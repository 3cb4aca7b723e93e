//! Session orchestration: approval, terminal allocation, execution, result
//! shaping.
//!
//! One orchestrator serves one agent host. Each agent session owns at most
//! one foreground terminal, reused across invocations; background runs
//! always get a fresh terminal tracked in an explicit registry and polled by
//! execution id. All state lives on this object; nothing is process-global.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::approval::ApprovalPolicy;
use crate::error::{ExecError, Result};
use crate::output::truncate_output;
use crate::persist::{
    AssociationStore, SessionAssociation, load_associations, save_associations,
};
use crate::rewrite::rewrite_cd_prefix;
use crate::shell::{OsFamily, ShellKind};
use crate::strategy::ExecutionStrategy;
use crate::telemetry::{ApprovalKind, CommandTelemetry};
use crate::terminal::{MarkerId, Terminal, TerminalFactory};
use crate::tool::{GetOutputRequest, RunCommandRequest, ToolOutput};

/// Bound on acquiring the shell's OS process id for persistence.
const PROCESS_ID_TIMEOUT: Duration = Duration::from_millis(5000);
/// Foreground runs slower than this earn a one-time background-flag tip.
const BACKGROUND_NUDGE_AFTER: Duration = Duration::from_secs(15);

/// The user's answer to a confirmation request.
#[derive(Debug, Clone, Default)]
pub struct UserConfirmation {
    /// Set when the user edited the command before approving it.
    pub edited_command: Option<String>,
}

/// Confirmation dialog payload for commands that did not auto-approve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationRequest {
    pub title: String,
    pub message: String,
    /// The command that will run if the user approves (after any rewrite).
    pub command: String,
}

impl ConfirmationRequest {
    fn new(request: &RunCommandRequest, command: &str) -> Self {
        let title = if request.is_background {
            "Run command in background terminal".to_string()
        } else {
            "Run command in terminal".to_string()
        };
        Self {
            title,
            message: format!("{}\n\n```\n{}\n```", request.explanation, command),
            command: command.to_string(),
        }
    }
}

/// Result of one orchestrated invocation.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// The command ran (or started, for background) and produced output.
    Completed(ToolOutput),
    /// The command needs explicit user confirmation before it may run.
    ConfirmationRequired(ConfirmationRequest),
}

/// One tracked background execution. Output reads are repeatable: always
/// the full screen text from the start marker to the current end.
struct BackgroundExecution {
    terminal: Arc<dyn Terminal>,
    start_marker: MarkerId,
    command: String,
}

impl BackgroundExecution {
    fn output(&self) -> String {
        self.terminal.text_between(self.start_marker, None)
    }
}

/// Registry of live background executions, keyed by generated execution id.
/// Constructed once and owned by the orchestrator.
#[derive(Default)]
struct BackgroundRegistry {
    executions: HashMap<String, BackgroundExecution>,
}

impl BackgroundRegistry {
    fn insert(&mut self, id: String, execution: BackgroundExecution) {
        self.executions.insert(id, execution);
    }

    fn get(&self, id: &str) -> Result<&BackgroundExecution> {
        self.executions
            .get(id)
            .ok_or_else(|| ExecError::unknown_execution(id))
    }

    fn remove(&mut self, id: &str) -> Option<BackgroundExecution> {
        self.executions.remove(id)
    }
}

/// Orchestrates terminal command execution for agent sessions.
pub struct TerminalOrchestrator {
    factory: Arc<dyn TerminalFactory>,
    store: Arc<dyn AssociationStore>,
    policy: ApprovalPolicy,
    workspace_roots: Vec<PathBuf>,
    os: OsFamily,
    sessions: HashMap<String, Arc<dyn Terminal>>,
    background: BackgroundRegistry,
    associations: HashMap<u32, SessionAssociation>,
    nudged_background: bool,
}

impl TerminalOrchestrator {
    pub fn new(
        factory: Arc<dyn TerminalFactory>,
        store: Arc<dyn AssociationStore>,
        policy: ApprovalPolicy,
        workspace_roots: Vec<PathBuf>,
        os: OsFamily,
    ) -> Self {
        let associations = load_associations(store.as_ref());
        if !associations.is_empty() {
            tracing::debug!(
                count = associations.len(),
                "restored terminal associations from previous host run"
            );
        }
        Self {
            factory,
            store,
            policy,
            workspace_roots,
            os,
            sessions: HashMap::new(),
            background: BackgroundRegistry::default(),
            associations,
            nudged_background: false,
        }
    }

    /// Swap in a freshly compiled approval policy.
    pub fn set_policy(&mut self, policy: ApprovalPolicy) {
        self.policy = policy;
    }

    /// Associations restored from durable storage, keyed by shell process
    /// id. The embedder decides which of those processes still exist.
    pub fn restored_associations(&self) -> &HashMap<u32, SessionAssociation> {
        &self.associations
    }

    /// Run one command on behalf of `session_id`.
    ///
    /// Without a prior confirmation, a command that does not auto-approve
    /// comes back as [`RunOutcome::ConfirmationRequired`]; the caller shows
    /// the dialog and re-invokes with the user's [`UserConfirmation`].
    pub async fn run_command(
        &mut self,
        session_id: &str,
        request: &RunCommandRequest,
        confirmation: Option<UserConfirmation>,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        if cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }
        let started = Instant::now();

        let confirmed = confirmation.is_some();
        let edited = confirmation.and_then(|confirmation| confirmation.edited_command);
        let edited_by_user = edited.is_some();
        let mut command = edited.unwrap_or_else(|| request.command.clone());

        let existing = self
            .sessions
            .get(session_id)
            .filter(|terminal| !terminal.is_disposed())
            .cloned();
        let kind = self.resolve_shell_kind(existing.as_ref());
        let cwd = existing.as_ref().and_then(|terminal| terminal.current_dir());

        let mut edited_by_tool = false;
        if let Some(rewritten) =
            rewrite_cd_prefix(&command, cwd.as_deref(), &self.workspace_roots, self.os)
        {
            tracing::debug!(original = %command, rewritten = %rewritten, "dropped redundant cd prefix");
            command = rewritten;
            edited_by_tool = true;
        }

        let auto_approved = self.policy.command_line_is_auto_approved(&command, kind);
        if !auto_approved && !confirmed {
            tracing::debug!(command = %command, "command requires user confirmation");
            return Ok(RunOutcome::ConfirmationRequired(ConfirmationRequest::new(
                request, &command,
            )));
        }
        let approval = if auto_approved {
            ApprovalKind::AllowList
        } else {
            ApprovalKind::UserConfirmed
        };

        if request.is_background {
            return self
                .run_background(session_id, &command, approval, edited_by_user, edited_by_tool, started)
                .await;
        }

        let terminal = match existing {
            Some(terminal) => terminal,
            None => {
                let terminal = self.factory.create_terminal(false).await?;
                self.sessions
                    .insert(session_id.to_string(), Arc::clone(&terminal));
                terminal
            }
        };
        let invocation_id = generate_execution_id();
        self.persist_association(session_id, &terminal, &invocation_id, false)
            .await;

        let strategy = ExecutionStrategy::for_quality(terminal.integration_quality());
        let result = match strategy.execute(&terminal, &command, cancel).await {
            Ok(result) => result,
            Err(ExecError::Cancelled) => return Err(ExecError::Cancelled),
            Err(err) => {
                // A terminal that failed mid-command cannot be trusted again.
                tracing::error!(%err, session_id, "execution failed; disposing terminal");
                self.discard_session_terminal(session_id, &terminal).await;
                return Err(err);
            }
        };

        let mut text = result.text;
        if let Some(note) = edited_note(edited_by_user, edited_by_tool, &command) {
            text = format!("{note}\n\n{text}");
        }
        let duration = started.elapsed();
        if duration >= BACKGROUND_NUDGE_AFTER && !self.nudged_background {
            self.nudged_background = true;
            text.push_str(
                "\n\nTip: long-running commands can be started with isBackground set to true and polled with the get-output tool.",
            );
        }
        let text = truncate_output(&text);

        crate::telemetry::record(&CommandTelemetry {
            approval,
            strategy: strategy.name(),
            edited_by_user,
            edited_by_tool,
            is_background: false,
            output_line_count: text.lines().count(),
            exit_code_sign: CommandTelemetry::exit_code_sign(result.exit_code),
            duration_ms: duration.as_millis() as u64,
        });

        Ok(RunOutcome::Completed(ToolOutput::text(text)))
    }

    async fn run_background(
        &mut self,
        session_id: &str,
        command: &str,
        approval: ApprovalKind,
        edited_by_user: bool,
        edited_by_tool: bool,
        started: Instant,
    ) -> Result<RunOutcome> {
        let terminal = self.factory.create_terminal(true).await?;
        if let Err(err) = terminal.wait_ready().await {
            terminal.dispose();
            return Err(err);
        }

        let id = generate_execution_id();
        let start_marker = terminal.register_marker();
        if let Err(err) = terminal.run_command(command).await {
            terminal.remove_marker(start_marker);
            terminal.dispose();
            return Err(err);
        }
        self.persist_association(session_id, &terminal, &id, true)
            .await;
        self.background.insert(
            id.clone(),
            BackgroundExecution {
                terminal,
                start_marker,
                command: command.to_string(),
            },
        );

        let mut text = format!("Command is running in terminal with ID={id}");
        if let Some(note) = edited_note(edited_by_user, edited_by_tool, command) {
            text = format!("{note}\n\n{text}");
        }

        crate::telemetry::record(&CommandTelemetry {
            approval,
            strategy: "background",
            edited_by_user,
            edited_by_tool,
            is_background: true,
            output_line_count: 0,
            exit_code_sign: None,
            duration_ms: started.elapsed().as_millis() as u64,
        });

        Ok(RunOutcome::Completed(
            ToolOutput::text(text).with_terminal_id(id),
        ))
    }

    /// Current captured output of a background execution. Repeatable.
    pub fn background_output(&self, id: &str) -> Result<String> {
        let execution = self.background.get(id)?;
        Ok(truncate_output(&execution.output()))
    }

    /// Handle the get-output companion tool call.
    pub fn get_output(&self, request: &GetOutputRequest) -> Result<ToolOutput> {
        let text = self.background_output(&request.id)?;
        Ok(ToolOutput::text(text).with_terminal_id(request.id.clone()))
    }

    /// Command line a background execution is running, for display.
    pub fn background_command(&self, id: &str) -> Result<String> {
        Ok(self.background.get(id)?.command.clone())
    }

    /// Dispose a background execution and its terminal.
    pub async fn dispose_background(&mut self, id: &str) -> Result<()> {
        let execution = self
            .background
            .remove(id)
            .ok_or_else(|| ExecError::unknown_execution(id))?;
        execution.terminal.remove_marker(execution.start_marker);
        self.forget_association(&execution.terminal).await;
        execution.terminal.dispose();
        Ok(())
    }

    /// Dispose a session's foreground terminal, if any.
    pub async fn dispose_session(&mut self, session_id: &str) {
        if let Some(terminal) = self.sessions.remove(session_id) {
            self.forget_association(&terminal).await;
            terminal.dispose();
        }
    }

    fn resolve_shell_kind(&self, terminal: Option<&Arc<dyn Terminal>>) -> ShellKind {
        match terminal {
            Some(terminal) => ShellKind::from_executable(&terminal.shell_executable()),
            None => ShellKind::from_executable(&self.factory.default_shell()),
        }
    }

    async fn persist_association(
        &mut self,
        session_id: &str,
        terminal: &Arc<dyn Terminal>,
        id: &str,
        is_background: bool,
    ) {
        let pid = tokio::time::timeout(PROCESS_ID_TIMEOUT, terminal.process_id())
            .await
            .ok()
            .flatten();
        let Some(pid) = pid else {
            tracing::debug!(session_id, "shell process id unavailable; not persisting association");
            return;
        };
        self.associations.insert(
            pid,
            SessionAssociation {
                session_id: session_id.to_string(),
                shell_integration_quality: terminal.integration_quality(),
                id: id.to_string(),
                is_background,
            },
        );
        save_associations(self.store.as_ref(), &self.associations);
    }

    async fn forget_association(&mut self, terminal: &Arc<dyn Terminal>) {
        let pid = tokio::time::timeout(PROCESS_ID_TIMEOUT, terminal.process_id())
            .await
            .ok()
            .flatten();
        if let Some(pid) = pid {
            if self.associations.remove(&pid).is_some() {
                save_associations(self.store.as_ref(), &self.associations);
            }
        }
    }

    async fn discard_session_terminal(&mut self, session_id: &str, terminal: &Arc<dyn Terminal>) {
        let is_current = self
            .sessions
            .get(session_id)
            .is_some_and(|current| Arc::ptr_eq(current, terminal));
        if is_current {
            self.sessions.remove(session_id);
        }
        self.forget_association(terminal).await;
        terminal.dispose();
    }
}

fn generate_execution_id() -> String {
    format!("term_{}", &Uuid::new_v4().to_string()[..8])
}

fn edited_note(edited_by_user: bool, edited_by_tool: bool, command: &str) -> Option<String> {
    if edited_by_user {
        Some(format!(
            "Note: the user edited the command before approving it; `{command}` is what ran."
        ))
    } else if edited_by_tool {
        Some(format!(
            "Note: the redundant cd prefix was dropped; `{command}` is what ran."
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::ApprovalConfig;
    use crate::integration::ShellIntegrationQuality;
    use crate::persist::MemoryAssociationStore;
    use crate::test_support::{MockTerminal, MockTerminalFactory, ScriptedRun};
    use pretty_assertions::assert_eq;

    fn policy_allowing(patterns: &[&str]) -> ApprovalPolicy {
        let toml = format!(
            "[allow]\n{}",
            patterns
                .iter()
                .map(|pattern| format!("\"{pattern}\" = true"))
                .collect::<Vec<_>>()
                .join("\n")
        );
        ApprovalConfig::from_toml(&toml).expect("config").compile()
    }

    fn orchestrator_with(
        factory: Arc<MockTerminalFactory>,
        policy: ApprovalPolicy,
    ) -> TerminalOrchestrator {
        TerminalOrchestrator::new(
            factory,
            Arc::new(MemoryAssociationStore::new()),
            policy,
            vec![PathBuf::from("/ws")],
            OsFamily::Unix,
        )
    }

    fn request(command: &str, background: bool) -> RunCommandRequest {
        RunCommandRequest {
            command: command.to_string(),
            explanation: "test command".to_string(),
            is_background: background,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn foreground_terminal_is_reused_across_invocations() {
        let factory = Arc::new(MockTerminalFactory::new());
        let terminal = Arc::new(MockTerminal::new(ShellIntegrationQuality::Rich));
        terminal.script(ScriptedRun::new().chunk("one\n").finished(Some(0), Some("one\n")));
        terminal.script(ScriptedRun::new().chunk("two\n").finished(Some(0), Some("two\n")));
        factory.queue(Arc::clone(&terminal));
        let mut orchestrator = orchestrator_with(Arc::clone(&factory), policy_allowing(&["echo"]));

        for _ in 0..2 {
            let outcome = orchestrator
                .run_command("s1", &request("echo hi", false), None, &CancellationToken::new())
                .await
                .expect("run");
            assert!(matches!(outcome, RunOutcome::Completed(_)));
        }
        assert_eq!(factory.created().len(), 1);
        assert_eq!(terminal.commands_run().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unapproved_command_requests_confirmation() {
        let factory = Arc::new(MockTerminalFactory::new());
        let mut orchestrator = orchestrator_with(Arc::clone(&factory), policy_allowing(&["echo"]));

        let outcome = orchestrator
            .run_command("s1", &request("rm -rf /", false), None, &CancellationToken::new())
            .await
            .expect("run");
        let RunOutcome::ConfirmationRequired(confirmation) = outcome else {
            panic!("expected confirmation request");
        };
        assert_eq!(confirmation.title, "Run command in terminal");
        assert!(confirmation.message.contains("rm -rf /"));
        // Nothing was allocated for a command that never ran.
        assert!(factory.created().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn confirmed_command_runs_despite_no_allow_match() {
        let factory = Arc::new(MockTerminalFactory::new());
        let terminal = Arc::new(MockTerminal::new(ShellIntegrationQuality::Rich));
        terminal.script(ScriptedRun::new().finished(Some(0), Some("done\n")));
        factory.queue(terminal);
        let mut orchestrator = orchestrator_with(Arc::clone(&factory), ApprovalPolicy::default());

        let outcome = orchestrator
            .run_command(
                "s1",
                &request("cargo build", false),
                Some(UserConfirmation::default()),
                &CancellationToken::new(),
            )
            .await
            .expect("run");
        assert!(matches!(outcome, RunOutcome::Completed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn user_edited_command_is_noted_in_output() {
        let factory = Arc::new(MockTerminalFactory::new());
        let terminal = Arc::new(MockTerminal::new(ShellIntegrationQuality::Rich));
        terminal.script(ScriptedRun::new().finished(Some(0), Some("ok\n")));
        factory.queue(Arc::clone(&terminal));
        let mut orchestrator = orchestrator_with(Arc::clone(&factory), ApprovalPolicy::default());

        let outcome = orchestrator
            .run_command(
                "s1",
                &request("make test", false),
                Some(UserConfirmation {
                    edited_command: Some("make check".to_string()),
                }),
                &CancellationToken::new(),
            )
            .await
            .expect("run");
        let RunOutcome::Completed(output) = outcome else {
            panic!("expected completion");
        };
        assert!(output.joined_text().contains("the user edited the command"));
        assert_eq!(terminal.commands_run(), vec!["make check".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn cd_prefix_rewrite_applies_and_is_noted() {
        let factory = Arc::new(MockTerminalFactory::new());
        let terminal = Arc::new(MockTerminal::new(ShellIntegrationQuality::Rich));
        terminal.script(ScriptedRun::new().finished(Some(0), Some("test ok\n")));
        factory.queue(Arc::clone(&terminal));
        let mut orchestrator =
            orchestrator_with(Arc::clone(&factory), policy_allowing(&["npm"]));

        let outcome = orchestrator
            .run_command(
                "s1",
                &request("cd /ws && npm test", false),
                None,
                &CancellationToken::new(),
            )
            .await
            .expect("run");
        let RunOutcome::Completed(output) = outcome else {
            panic!("expected completion");
        };
        assert_eq!(terminal.commands_run(), vec!["npm test".to_string()]);
        assert!(output.joined_text().contains("cd prefix was dropped"));
    }

    #[tokio::test(start_paused = true)]
    async fn background_run_returns_id_and_polls_output() {
        let factory = Arc::new(MockTerminalFactory::new());
        let terminal = Arc::new(MockTerminal::new(ShellIntegrationQuality::Basic));
        terminal.script(ScriptedRun::new().chunk("server listening\n"));
        factory.queue(Arc::clone(&terminal));
        let mut orchestrator = orchestrator_with(Arc::clone(&factory), policy_allowing(&["npm"]));

        let outcome = orchestrator
            .run_command(
                "s1",
                &request("npm start", true),
                None,
                &CancellationToken::new(),
            )
            .await
            .expect("run");
        let RunOutcome::Completed(output) = outcome else {
            panic!("expected completion");
        };
        let id = output.terminal_id.clone().expect("terminal id");
        assert!(output.joined_text().contains(&id));

        assert_eq!(
            orchestrator.background_output(&id).expect("output"),
            "server listening"
        );
        // Repeatable, not a draining read.
        assert_eq!(
            orchestrator.background_output(&id).expect("output"),
            "server listening"
        );
        assert_eq!(
            orchestrator.background_command(&id).expect("command"),
            "npm start"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_execution_id_is_an_error() {
        let factory = Arc::new(MockTerminalFactory::new());
        let orchestrator = orchestrator_with(Arc::clone(&factory), ApprovalPolicy::default());
        let err = orchestrator
            .background_output("term_nope")
            .expect_err("unknown id");
        assert!(matches!(err, ExecError::UnknownExecutionId { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_execution_disposes_the_terminal() {
        let factory = Arc::new(MockTerminalFactory::new());
        let terminal = Arc::new(MockTerminal::new(ShellIntegrationQuality::Rich));
        terminal.fail_next_run("shell died");
        factory.queue(Arc::clone(&terminal));
        // A replacement for the next invocation.
        let replacement = Arc::new(MockTerminal::new(ShellIntegrationQuality::Rich));
        replacement.script(ScriptedRun::new().finished(Some(0), Some("ok\n")));
        factory.queue(Arc::clone(&replacement));
        let mut orchestrator = orchestrator_with(Arc::clone(&factory), policy_allowing(&["echo"]));

        let err = orchestrator
            .run_command("s1", &request("echo hi", false), None, &CancellationToken::new())
            .await
            .expect_err("should fail");
        assert!(matches!(err, ExecError::TerminalUnavailable { .. }));
        assert!(terminal.was_disposed());

        // The corrupted terminal is not reused: the next run allocates fresh.
        orchestrator
            .run_command("s1", &request("echo hi", false), None, &CancellationToken::new())
            .await
            .expect("recovered run");
        assert_eq!(factory.created().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn associations_are_persisted_and_restored() {
        let store = Arc::new(MemoryAssociationStore::new());
        let factory = Arc::new(MockTerminalFactory::new());
        let terminal =
            Arc::new(MockTerminal::new(ShellIntegrationQuality::Rich).with_pid(Some(7777)));
        terminal.script(ScriptedRun::new().finished(Some(0), Some("ok\n")));
        factory.queue(terminal);
        let mut orchestrator = TerminalOrchestrator::new(
            Arc::clone(&factory) as Arc<dyn TerminalFactory>,
            Arc::clone(&store) as Arc<dyn AssociationStore>,
            policy_allowing(&["echo"]),
            vec![],
            OsFamily::Unix,
        );
        orchestrator
            .run_command("s1", &request("echo hi", false), None, &CancellationToken::new())
            .await
            .expect("run");

        let restored = TerminalOrchestrator::new(
            Arc::new(MockTerminalFactory::new()),
            store,
            ApprovalPolicy::default(),
            vec![],
            OsFamily::Unix,
        );
        let associations = restored.restored_associations();
        assert_eq!(associations.len(), 1);
        let association = associations.get(&7777).expect("association for pid");
        assert_eq!(association.session_id, "s1");
        assert!(!association.is_background);
    }

    #[tokio::test(start_paused = true)]
    async fn disposing_background_removes_it_from_the_registry() {
        let factory = Arc::new(MockTerminalFactory::new());
        let terminal = Arc::new(MockTerminal::new(ShellIntegrationQuality::Basic));
        factory.queue(Arc::clone(&terminal));
        let mut orchestrator = orchestrator_with(Arc::clone(&factory), policy_allowing(&["npm"]));

        let outcome = orchestrator
            .run_command("s1", &request("npm start", true), None, &CancellationToken::new())
            .await
            .expect("run");
        let RunOutcome::Completed(output) = outcome else {
            panic!("expected completion");
        };
        let id = output.terminal_id.expect("id");

        orchestrator.dispose_background(&id).await.expect("dispose");
        assert!(terminal.was_disposed());
        assert!(matches!(
            orchestrator.background_output(&id),
            Err(ExecError::UnknownExecutionId { .. })
        ));
    }
}
