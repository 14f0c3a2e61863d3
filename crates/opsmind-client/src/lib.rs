//! # opsmind-client
//!
//! Client library for the opsmind operations assistant API.
//!
//! The [`AssistantApi`] trait is the seam between the conversation core and the
//! network. [`ApiClient`] implements it over HTTP:
//! - synchronous chat (`chat/send`)
//! - streamed chat (`chat/stream`, server-sent events, see [`stream`])
//! - remote command execution and host status (`ssh/*`)
//! - remote conversation history and deletion
//!
//! ## Example
//!
//! ```no_run
//! use futures::TryStreamExt;
//! use opsmind_client::{ApiClient, AssistantApi};
//! use opsmind_common::{ChatRequest, Config};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ApiClient::new(Config::new("http://localhost:8000/api"))?;
//!
//! let request = ChatRequest::builder().message("disk usage on web-01").build();
//! let mut answer = client.stream_fragments(&request).await?;
//! while let Some(fragment) = answer.try_next().await? {
//!     print!("{fragment}");
//! }
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures::TryStreamExt;
use serde_json::Value;

use opsmind_common::{
    ChatRequest, ChatResponse, Config, ConnectionTest, HostRequest, ServerStatus,
    SshExecuteRequest, SshExecuteResponse,
};

pub mod error;
pub mod http;
pub mod stream;

pub use error::ClientError;
pub use http::ApiClient;
pub use stream::{FragmentStream, RecordStream, StreamRecord};

/// Operations offered by the remote assistant API.
///
/// Implementations must be thread-safe (Send + Sync) so a session can share
/// one client across tasks.
#[must_use = "AssistantApi must be used to make requests"]
#[async_trait]
pub trait AssistantApi: Send + Sync {
    /// Get the client's configuration.
    fn config(&self) -> &Config;

    /// Sends a message and waits for the complete answer.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be delivered or the API rejects it.
    async fn send_message(&self, request: &ChatRequest) -> Result<ChatResponse, ClientError>;

    /// Sends a message and returns the answer as a stream of typed records.
    ///
    /// # Errors
    ///
    /// Fails before any record is produced when the request is rejected.
    async fn stream_message(&self, request: &ChatRequest) -> Result<RecordStream, ClientError>;

    /// Sends a message and returns only the answer fragments.
    ///
    /// # Errors
    ///
    /// Same as [`AssistantApi::stream_message`].
    async fn stream_fragments(&self, request: &ChatRequest) -> Result<FragmentStream, ClientError> {
        let records = self.stream_message(request).await?;
        Ok(Box::pin(records.try_filter_map(|record| async move {
            Ok(match record {
                StreamRecord::Answer(text) => Some(text),
                _ => None,
            })
        })))
    }

    /// Runs a command on a remote host.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails. A command that ran but exited
    /// non-zero is a successful call with `success == false`.
    async fn execute_command(
        &self,
        request: &SshExecuteRequest,
    ) -> Result<SshExecuteResponse, ClientError>;

    /// Fetches usage figures of a remote host.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn server_status(&self, request: &HostRequest) -> Result<ServerStatus, ClientError>;

    /// Checks whether a remote host accepts connections.
    ///
    /// A rejected check is reported as `success == false`, not as an error.
    ///
    /// # Errors
    ///
    /// Returns an error only when the API cannot be reached.
    async fn test_connection(&self, request: &HostRequest) -> Result<ConnectionTest, ClientError>;

    /// Fetches the message history of a remote conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn conversation_messages(
        &self,
        remote_id: &str,
        limit: u32,
    ) -> Result<Value, ClientError>;

    /// Deletes a remote conversation.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails.
    async fn delete_remote_conversation(&self, remote_id: &str) -> Result<(), ClientError>;
}
