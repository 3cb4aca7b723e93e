//! Best-effort structured telemetry for command invocations.
//!
//! One record per invocation on a dedicated tracing target. Consumers that
//! care subscribe to the target; nothing here can fail the execution flow.

use serde::Serialize;

pub const TELEMETRY_TARGET: &str = "termpilot::telemetry";

/// How the invocation cleared the approval gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalKind {
    AllowList,
    UserConfirmed,
}

/// Structured record emitted once per invocation.
#[derive(Debug, Clone, Serialize)]
pub struct CommandTelemetry {
    pub approval: ApprovalKind,
    pub strategy: &'static str,
    pub edited_by_user: bool,
    pub edited_by_tool: bool,
    pub is_background: bool,
    pub output_line_count: usize,
    /// -1, 0 or 1; absent when no exit code was observed.
    pub exit_code_sign: Option<i8>,
    pub duration_ms: u64,
}

impl CommandTelemetry {
    pub fn exit_code_sign(exit_code: Option<i32>) -> Option<i8> {
        exit_code.map(|code| code.signum() as i8)
    }
}

/// Emit the record. Serialization failures are swallowed after a warning.
pub fn record(telemetry: &CommandTelemetry) {
    match serde_json::to_string(telemetry) {
        Ok(record) => {
            tracing::info!(target: "termpilot::telemetry", %record, "terminal command invocation");
        }
        Err(err) => tracing::warn!(%err, "failed to serialize telemetry record"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_sign_collapses_to_sign() {
        assert_eq!(CommandTelemetry::exit_code_sign(Some(0)), Some(0));
        assert_eq!(CommandTelemetry::exit_code_sign(Some(127)), Some(1));
        assert_eq!(CommandTelemetry::exit_code_sign(Some(-9)), Some(-1));
        assert_eq!(CommandTelemetry::exit_code_sign(None), None);
    }

    #[test]
    fn record_serializes_every_field() {
        let telemetry = CommandTelemetry {
            approval: ApprovalKind::AllowList,
            strategy: "rich",
            edited_by_user: false,
            edited_by_tool: true,
            is_background: false,
            output_line_count: 3,
            exit_code_sign: Some(0),
            duration_ms: 120,
        };
        let json = serde_json::to_string(&telemetry).expect("serialize");
        assert!(json.contains("\"approval\":\"allow_list\""));
        assert!(json.contains("\"edited_by_tool\":true"));
        assert!(json.contains("\"exit_code_sign\":0"));
    }
}
