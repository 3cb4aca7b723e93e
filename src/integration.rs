//! Shell-integration control markers.
//!
//! Shells configured for integration bracket prompts and executions with OSC
//! sequences. Both the FinalTerm family (`OSC 133`) and the VS Code family
//! (`OSC 633`) are recognized: `A` marks a prompt start, `C` marks a command
//! starting to execute, and `D` marks a command finishing (optionally
//! carrying the exit code).

use serde::{Deserialize, Serialize};

const ESC: char = '\u{1b}';
const BEL: char = '\u{7}';

/// How much the terminal's self-reported command boundaries can be trusted.
/// Fixed per terminal instance at creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellIntegrationQuality {
    /// No structured signals at all.
    None,
    /// Markers exist but timing and attribution are unreliable.
    Basic,
    /// Markers and per-command output reporting are trustworthy.
    Rich,
}

/// A shell-integration event decoded from the raw data stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrationEvent {
    PromptStart,
    CommandExecuted,
    CommandFinished { exit_code: Option<i32> },
}

/// Result of feeding one chunk to the [`MarkerScanner`].
#[derive(Debug, Default)]
pub struct ScanResult {
    pub events: Vec<IntegrationEvent>,
    /// The chunk with recognized integration sequences removed, suitable for
    /// appending to a plain-text screen buffer.
    pub text: String,
}

/// Incremental OSC scanner. Sequences split across chunk boundaries are
/// carried over to the next call.
#[derive(Debug, Default)]
pub struct MarkerScanner {
    pending: String,
}

impl MarkerScanner {
    pub fn scan(&mut self, chunk: &str) -> ScanResult {
        self.pending.push_str(chunk);
        let data = std::mem::take(&mut self.pending);
        let mut result = ScanResult::default();
        let mut rest = data.as_str();

        loop {
            let Some(start) = rest.find("\u{1b}]") else {
                // No opener left. A trailing lone ESC may be the first byte
                // of the next sequence, so keep it pending.
                if rest.ends_with(ESC) {
                    result.text.push_str(&rest[..rest.len() - ESC.len_utf8()]);
                    self.pending.push(ESC);
                } else {
                    result.text.push_str(rest);
                }
                return result;
            };

            result.text.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match sequence_end(after) {
                None => {
                    // Unterminated sequence: hold it for the next chunk.
                    self.pending.push_str(&rest[start..]);
                    return result;
                }
                Some((body_end, terminator_len)) => {
                    if let Some(event) = parse_body(&after[..body_end]) {
                        result.events.push(event);
                    }
                    rest = &after[body_end + terminator_len..];
                }
            }
        }
    }
}

/// Find the end of an OSC body: terminated by BEL or ST (`ESC \`).
fn sequence_end(data: &str) -> Option<(usize, usize)> {
    let bel = data.find(BEL).map(|at| (at, BEL.len_utf8()));
    let st = data.find("\u{1b}\\").map(|at| (at, 2));
    match (bel, st) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn parse_body(body: &str) -> Option<IntegrationEvent> {
    let rest = body
        .strip_prefix("133;")
        .or_else(|| body.strip_prefix("633;"))?;
    let (kind, args) = match rest.split_once(';') {
        Some((kind, args)) => (kind, Some(args)),
        None => (rest, None),
    };
    match kind {
        "A" => Some(IntegrationEvent::PromptStart),
        "C" => Some(IntegrationEvent::CommandExecuted),
        "D" => Some(IntegrationEvent::CommandFinished {
            exit_code: args.and_then(|args| {
                args.split(';').next().and_then(|code| code.parse().ok())
            }),
        }),
        _ => None,
    }
}
