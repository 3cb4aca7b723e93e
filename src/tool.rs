//! Tool-invocation boundary types.
//!
//! The shapes the calling agent serializes across the tool boundary. Field
//! names follow the wire convention of the tool schema, not Rust style.

use serde::{Deserialize, Serialize};

/// Input for the run-command tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCommandRequest {
    /// The command line to run. Opaque and unvalidated here.
    pub command: String,
    /// One-sentence explanation shown to the user in confirmation UI.
    pub explanation: String,
    #[serde(default)]
    pub is_background: bool,
}

/// Input for the get-output companion call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetOutputRequest {
    /// Execution id returned by a background run.
    pub id: String,
}

/// One piece of tool-result content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ToolContent {
    Text { value: String },
}

/// Tool-call result returned to the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOutput {
    pub content: Vec<ToolContent>,
    /// Present for background runs so the caller can poll for output later.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_id: Option<String>,
}

impl ToolOutput {
    pub fn text(value: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                value: value.into(),
            }],
            terminal_id: None,
        }
    }

    pub fn with_terminal_id(mut self, id: impl Into<String>) -> Self {
        self.terminal_id = Some(id.into());
        self
    }

    /// Concatenated text content, for callers that only render text.
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .map(|content| match content {
                ToolContent::Text { value } => value.as_str(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
