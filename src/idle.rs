//! Idle detection over a terminal's data stream.
//!
//! Two primitives share one debounce mechanism: [`wait_for_idle`] trusts raw
//! silence, while [`track_idle_on_prompt`] only trusts silence once the
//! shell has returned to a prompt *after* a tracked execution, so a prompt
//! redraw mid-command cannot be mistaken for completion.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::integration::{IntegrationEvent, MarkerScanner};
use crate::terminal::Terminal;

/// Short idle window used before/after command issue and as the rich
/// fallback.
pub(crate) const IDLE_WINDOW: Duration = Duration::from_millis(1000);
/// Long idle-on-prompt catch-all for partially integrated terminals.
pub(crate) const LONG_IDLE_WINDOW: Duration = Duration::from_millis(3000);

/// Resolve once `idle` has elapsed since the most recent data event.
///
/// The timer is armed immediately, so a stream that never produces data
/// still resolves after one idle window.
pub async fn wait_for_idle(mut data: broadcast::Receiver<String>, idle: Duration) {
    let mut deadline = Instant::now() + idle;
    loop {
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return,
            received = data.recv() => match received {
                // A lagged receiver still proves the stream was active.
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                    deadline = Instant::now() + idle;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tokio::time::sleep_until(deadline).await;
                    return;
                }
            },
        }
    }
}

/// Prompt-tracking state. Idleness is only trusted in
/// `PromptAfterExecuting`: an execute marker must have been seen before the
/// prompt marker that re-arms the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PromptState {
    Initial,
    Prompt,
    Executing,
    PromptAfterExecuting,
}

impl PromptState {
    fn on_event(self, event: IntegrationEvent) -> Self {
        match event {
            IntegrationEvent::PromptStart => match self {
                PromptState::Initial => PromptState::Prompt,
                PromptState::Executing => PromptState::PromptAfterExecuting,
                other => other,
            },
            IntegrationEvent::CommandExecuted | IntegrationEvent::CommandFinished { .. } => {
                PromptState::Executing
            }
        }
    }
}

/// Resolve once the terminal has been idle at a post-execution prompt for
/// `idle`. Resolves immediately if the terminal's stream closes.
pub async fn track_idle_on_prompt(terminal: &dyn Terminal, idle: Duration) {
    track_idle_on_prompt_stream(terminal.subscribe_data(), idle).await;
}

/// [`track_idle_on_prompt`] over an already-subscribed data stream, for
/// callers that must not miss events emitted before the tracker is polled.
pub async fn track_idle_on_prompt_stream(mut data: broadcast::Receiver<String>, idle: Duration) {
    let mut scanner = MarkerScanner::default();
    let mut state = PromptState::Initial;
    let mut deadline: Option<Instant> = None;

    loop {
        let idle_timer = async {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = idle_timer => return,
            received = data.recv() => {
                let chunk = match received {
                    Ok(chunk) => chunk,
                    Err(broadcast::error::RecvError::Lagged(_)) => String::new(),
                    Err(broadcast::error::RecvError::Closed) => return,
                };
                for event in scanner.scan(&chunk).events {
                    state = state.on_event(event);
                }
                deadline = if state == PromptState::PromptAfterExecuting {
                    Some(Instant::now() + idle)
                } else {
                    None
                };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integration::ShellIntegrationQuality;
    use crate::test_support::MockTerminal;
    use std::sync::Arc;

    const OSC_PROMPT: &str = "\u{1b}]133;A\u{7}";
    const OSC_EXECUTED: &str = "\u{1b}]133;C\u{7}";

    #[tokio::test(start_paused = true)]
    async fn silent_stream_resolves_after_one_window() {
        let (tx, rx) = broadcast::channel(16);
        let started = Instant::now();
        wait_for_idle(rx, Duration::from_millis(500)).await;
        assert!(started.elapsed() >= Duration::from_millis(500));
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn data_events_rearm_the_timer() {
        let (tx, rx) = broadcast::channel(16);
        let producer = tokio::spawn(async move {
            for _ in 0..3 {
                tx.send("chunk".to_string()).ok();
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            tx
        });

        let started = Instant::now();
        wait_for_idle(rx, Duration::from_millis(500)).await;
        // Three events at 0/200/400ms, so idleness lands at >= 900ms.
        assert!(started.elapsed() >= Duration::from_millis(900));
        producer.await.expect("producer");
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_after_execution_is_required() {
        let terminal = Arc::new(MockTerminal::new(ShellIntegrationQuality::Basic));
        let tracked = {
            let terminal = Arc::clone(&terminal);
            tokio::spawn(async move {
                track_idle_on_prompt(terminal.as_ref(), Duration::from_millis(300)).await;
            })
        };
        tokio::task::yield_now().await;

        // A bare prompt redraw must not count as completion.
        terminal.emit_data(OSC_PROMPT);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!tracked.is_finished());

        // Execute marker, then a fresh prompt: now idleness is trusted.
        terminal.emit_data(OSC_EXECUTED);
        terminal.emit_data(OSC_PROMPT);
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(tracked.is_finished());
        tracked.await.expect("tracker");
    }

    #[tokio::test(start_paused = true)]
    async fn output_during_post_prompt_rearms() {
        let terminal = Arc::new(MockTerminal::new(ShellIntegrationQuality::Basic));
        let tracked = {
            let terminal = Arc::clone(&terminal);
            tokio::spawn(async move {
                track_idle_on_prompt(terminal.as_ref(), Duration::from_millis(300)).await;
            })
        };
        tokio::task::yield_now().await;

        terminal.emit_data(OSC_EXECUTED);
        terminal.emit_data(OSC_PROMPT);
        tokio::time::sleep(Duration::from_millis(200)).await;
        // Straggling output before the window elapses pushes idleness out.
        terminal.emit_data("late output");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!tracked.is_finished());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(tracked.is_finished());
        tracked.await.expect("tracker");
    }
}
