//! Tool call records attached to assistant messages.
//!
//! The remote assistant invokes external capabilities (SSH execution, server
//! inspection) on its own; the client only records that an invocation started
//! and how it ended. A [`ToolCall`] is created once, in the
//! [`ToolCallStatus::Running`] state, and is then resolved exactly once.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle state of a tool invocation.
///
/// Serializes to lowercase strings: "running", "completed", "error".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    /// The invocation has started and has not produced a result yet.
    Running,
    /// The invocation finished and produced output.
    Completed,
    /// The invocation failed.
    Error,
}

impl ToolCallStatus {
    /// Returns `true` for the terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }
}

/// How a running tool invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    /// Finished with the given output.
    Completed(String),
    /// Failed with the given error text.
    Failed(String),
}

/// A record of one external capability invocation.
///
/// `input` is kept as an opaque JSON object; nothing in the client interprets it.
///
/// # Example
///
/// ```
/// use opsmind_common::tools::{ToolCall, ToolCallStatus, ToolOutcome};
///
/// let mut call = ToolCall::new("thought-1", "ssh_execute", serde_json::Map::new());
/// assert_eq!(call.status, ToolCallStatus::Running);
///
/// call.resolve(ToolOutcome::Completed("load average: 0.12".to_string())).unwrap();
/// assert_eq!(call.status, ToolCallStatus::Completed);
///
/// // A resolved call never changes again.
/// assert!(call.resolve(ToolOutcome::Failed("late".to_string())).is_err());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    /// Invocation id, used to patch the record in place when it resolves.
    pub id: String,
    /// Name of the invoked capability.
    pub name: String,
    /// Arguments the capability was invoked with.
    #[serde(default)]
    pub input: Map<String, Value>,
    /// Output text, present once the call has resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Current lifecycle state.
    pub status: ToolCallStatus,
}

impl ToolCall {
    /// Creates a running tool call.
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
            output: None,
            status: ToolCallStatus::Running,
        }
    }

    /// Returns `true` once the call has completed or failed.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves the call out of the running state.
    ///
    /// # Errors
    ///
    /// Returns an error if the call was already resolved; the record is left untouched.
    pub fn resolve(&mut self, outcome: ToolOutcome) -> anyhow::Result<()> {
        if self.is_resolved() {
            anyhow::bail!(
                "Tool call {} is already {:?} and cannot be resolved again",
                self.id,
                self.status
            );
        }

        let (status, output) = match outcome {
            ToolOutcome::Completed(output) => (ToolCallStatus::Completed, output),
            ToolOutcome::Failed(output) => (ToolCallStatus::Error, output),
        };
        self.status = status;
        self.output = Some(output);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use serde_json::json;

    fn sample_input() -> Map<String, Value> {
        let Value::Object(map) = json!({"host": "10.0.0.5", "command": "df -h"}) else {
            unreachable!()
        };
        map
    }

    #[test]
    fn test_new_tool_call_is_running() {
        let call = ToolCall::new("t1", "ssh_execute", sample_input());

        assert_eq!(call.status, ToolCallStatus::Running);
        assert!(call.output.is_none());
        assert!(!call.is_resolved());
        assert_eq!(call.input["host"], json!("10.0.0.5"));
    }

    #[test]
    fn test_resolve_completed() {
        let mut call = ToolCall::new("t1", "ssh_execute", sample_input());
        call.resolve(ToolOutcome::Completed("/dev/sda1 40%".to_string()))
            .unwrap();

        assert_eq!(call.status, ToolCallStatus::Completed);
        assert_eq!(call.output.as_deref(), Some("/dev/sda1 40%"));
    }

    #[test]
    fn test_resolve_failed() {
        let mut call = ToolCall::new("t1", "ssh_execute", sample_input());
        call.resolve(ToolOutcome::Failed("connection refused".to_string()))
            .unwrap();

        assert_eq!(call.status, ToolCallStatus::Error);
        assert_eq!(call.output.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_resolved_call_never_reverts() {
        let mut call = ToolCall::new("t1", "ssh_execute", sample_input());
        call.resolve(ToolOutcome::Failed("timeout".to_string()))
            .unwrap();

        let result = call.resolve(ToolOutcome::Completed("ok".to_string()));
        assert!(result.is_err());
        assert_eq!(call.status, ToolCallStatus::Error);
        assert_eq!(call.output.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&ToolCallStatus::Running).unwrap(),
            "\"running\""
        );
        assert_eq!(
            serde_json::to_string(&ToolCallStatus::Completed).unwrap(),
            "\"completed\""
        );
        assert_eq!(
            serde_json::to_string(&ToolCallStatus::Error).unwrap(),
            "\"error\""
        );
    }
}
