//! Request and response bodies of the remote assistant API.
//!
//! Field names follow the wire format (`snake_case`); the Rust names match.

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

/// User id sent when the caller does not provide one.
pub const DEFAULT_USER_ID: &str = "default_user";

/// SSH port used when the caller does not provide one.
pub const DEFAULT_SSH_PORT: u16 = 22;

const fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// Body of `POST /chat/send` and `POST /chat/stream`.
///
/// ```
/// use opsmind_common::api::ChatRequest;
///
/// let request = ChatRequest::builder().message("uptime on db-02").build();
/// let json = serde_json::to_value(&request).unwrap();
///
/// assert_eq!(json["user_id"], "default_user");
/// assert!(json.get("conversation_id").is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TypedBuilder)]
pub struct ChatRequest {
    /// The user's message text.
    #[builder(setter(into))]
    pub message: String,
    /// Remote conversation id to continue, omitted for a new remote conversation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[builder(default, setter(into))]
    pub conversation_id: Option<String>,
    /// Caller identity on the remote side.
    #[builder(default = DEFAULT_USER_ID.to_string(), setter(into))]
    pub user_id: String,
}

/// Successful response of `POST /chat/send`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatResponse {
    /// The complete answer text.
    pub answer: String,
    /// Remote conversation id the answer belongs to.
    #[serde(default)]
    pub conversation_id: String,
    /// Remote message id of the answer.
    #[serde(default)]
    pub message_id: String,
}

/// Body of `POST /ssh/execute`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TypedBuilder)]
pub struct SshExecuteRequest {
    /// Target host name or address.
    #[builder(setter(into))]
    pub host: String,
    /// Command line to run. The remote side enforces its own allow-list.
    #[builder(setter(into))]
    pub command: String,
    /// SSH port.
    #[serde(default = "default_ssh_port")]
    #[builder(default = DEFAULT_SSH_PORT)]
    pub port: u16,
}

/// Response of `POST /ssh/execute`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SshExecuteResponse {
    /// `true` when the command exited with status 0.
    pub success: bool,
    /// Standard output.
    #[serde(default)]
    pub stdout: String,
    /// Standard error.
    #[serde(default)]
    pub stderr: String,
    /// Exit status of the command.
    pub exit_code: i32,
    /// Echo of the executed command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Execution time measured by the remote side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<f64>,
    /// Completion time as reported by the remote side (ISO 8601).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Body of `POST /ssh/server-status` and `POST /ssh/test-connection`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HostRequest {
    /// Target host name or address.
    pub host: String,
    /// SSH port.
    #[serde(default = "default_ssh_port")]
    pub port: u16,
}

impl HostRequest {
    /// Targets `host` on the given port, or on port 22.
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port: port.unwrap_or(DEFAULT_SSH_PORT),
        }
    }
}

/// Response of `POST /ssh/server-status`.
///
/// Usage figures are preformatted by the remote side and absent when the host
/// is offline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerStatus {
    /// Host the status refers to.
    pub host: String,
    /// Whether an SSH session could be opened.
    pub online: bool,
    /// CPU usage.
    #[serde(default)]
    pub cpu_usage: Option<String>,
    /// Memory usage.
    #[serde(default)]
    pub memory_usage: Option<String>,
    /// Root filesystem usage.
    #[serde(default)]
    pub disk_usage: Option<String>,
    /// Load average.
    #[serde(default)]
    pub load_average: Option<String>,
    /// Uptime.
    #[serde(default)]
    pub uptime: Option<String>,
}

/// Response of `POST /ssh/test-connection`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionTest {
    /// Whether the connection succeeded.
    pub success: bool,
    /// Human-readable result.
    #[serde(default)]
    pub message: String,
    /// Host that was tested.
    #[serde(default)]
    pub host: String,
    /// Round-trip time of the test, when it succeeded.
    #[serde(default)]
    pub latency_ms: Option<f64>,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use serde_json::json;

    #[test]
    fn test_chat_request_with_conversation_id() {
        let request = ChatRequest::builder()
            .message("free -m")
            .conversation_id(Some("abc".to_string()))
            .user_id("ops")
            .build();

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            json!({"message": "free -m", "conversation_id": "abc", "user_id": "ops"})
        );
    }

    #[test]
    fn test_ssh_execute_request_default_port() {
        let request = SshExecuteRequest::builder()
            .host("10.0.0.5")
            .command("df -h")
            .build();

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            json!({"host": "10.0.0.5", "command": "df -h", "port": 22})
        );
    }

    #[test]
    fn test_execute_response_minimal_fields() {
        let response: SshExecuteResponse = serde_json::from_value(json!({
            "success": false,
            "stdout": "",
            "stderr": "permission denied",
            "exit_code": 1
        }))
        .unwrap();

        assert!(!response.success);
        assert_eq!(response.exit_code, 1);
        assert!(response.execution_time_ms.is_none());
    }

    #[test]
    fn test_offline_server_status() {
        let status: ServerStatus =
            serde_json::from_value(json!({"host": "10.0.0.9", "online": false})).unwrap();

        assert!(!status.online);
        assert!(status.cpu_usage.is_none());
        assert!(status.uptime.is_none());
    }

    #[test]
    fn test_host_request_port_fallback() {
        assert_eq!(HostRequest::new("web-01", None).port, DEFAULT_SSH_PORT);
        assert_eq!(HostRequest::new("web-01", Some(2222)).port, 2222);
    }
}
