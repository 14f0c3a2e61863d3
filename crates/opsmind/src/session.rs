//! Chat orchestration.
//!
//! [`ChatSession`] connects an [`AssistantApi`] client to a
//! [`ConversationStore`]. It is the only place that turns network results into
//! store mutations:
//!
//! - [`ChatSession::send`] waits for the complete answer and appends it.
//! - [`ChatSession::send_streaming`] appends an empty assistant placeholder and
//!   fills it in as records arrive, until the stream ends or the caller cancels.
//!
//! Both append the user message first and keep the store's loading flag raised
//! while the request is outstanding. A failed request leaves an assistant
//! message with status `error` behind and is also returned to the caller.

use std::sync::Arc;

use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use opsmind_client::{AssistantApi, StreamRecord};
use opsmind_common::{
    ChatRequest, ConnectionTest, DeliveryStatus, HostRequest, MessagePatch, NewMessage,
    ServerStatus, SshExecuteRequest, SshExecuteResponse, ToolCall,
};

use crate::error::{Result, SessionError};
use crate::store::ConversationStore;

/// Content of the assistant message recorded when a request fails.
pub const ERROR_REPLY: &str =
    "Sorry, something went wrong while contacting the assistant. Please try again later.";

/// Number of remote messages fetched by [`ChatSession::remote_history`] by default.
pub const DEFAULT_HISTORY_LIMIT: u32 = 20;

/// How a streamed answer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    /// The stream ran to its end. Holds the assistant message id.
    Completed(Uuid),
    /// The caller cancelled. Holds the assistant message id.
    Cancelled(Uuid),
}

impl StreamOutcome {
    /// The id of the assistant message the stream was written to.
    #[must_use]
    pub const fn message_id(self) -> Uuid {
        match self {
            Self::Completed(id) | Self::Cancelled(id) => id,
        }
    }
}

/// Lowers the store's loading flag when dropped, whichever way a request ends.
struct LoadingGuard<'a>(&'a ConversationStore);

impl<'a> LoadingGuard<'a> {
    fn raise(store: &'a ConversationStore) -> Self {
        store.set_loading(true);
        Self(store)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.set_loading(false);
    }
}

/// A chat session bound to one client and one store.
pub struct ChatSession<C: AssistantApi> {
    client: Arc<C>,
    store: ConversationStore,
}

impl<C: AssistantApi> ChatSession<C> {
    /// Creates a session with an empty store.
    pub fn new(client: C) -> Self {
        Self::with_store(client, ConversationStore::new())
    }

    /// Creates a session over an existing store.
    pub fn with_store(client: C, store: ConversationStore) -> Self {
        Self {
            client: Arc::new(client),
            store,
        }
    }

    /// The store this session writes to.
    pub const fn store(&self) -> &ConversationStore {
        &self.store
    }

    /// The underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Appends the user message to the active conversation (creating one if
    /// needed) and builds the request for it.
    fn prepare(&self, text: &str) -> Result<(Uuid, ChatRequest)> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        let conversation_id = self.store.ensure_active_conversation();
        self.store
            .add_message(conversation_id, NewMessage::user(text))
            .ok_or(SessionError::ConversationNotFound(conversation_id))?;

        let remote_id = self
            .store
            .conversation(conversation_id)
            .and_then(|c| c.remote_id.clone());

        let request = ChatRequest::builder()
            .message(text)
            .conversation_id(remote_id)
            .user_id(self.client.config().user_id.clone())
            .build();

        Ok((conversation_id, request))
    }

    fn record_failure(&self, conversation_id: Uuid) {
        self.store.add_message(
            conversation_id,
            NewMessage::assistant(ERROR_REPLY).with_status(DeliveryStatus::Error),
        );
    }

    /// Marks a streamed placeholder as failed, filling in the apology if
    /// nothing was received.
    fn fail_placeholder(&self, conversation_id: Uuid, message_id: Uuid) {
        let empty = self
            .store
            .conversation(conversation_id)
            .and_then(|c| c.message(message_id).map(|m| m.content.is_empty()))
            .unwrap_or(false);

        let patch = if empty {
            MessagePatch::content(ERROR_REPLY).with_status(DeliveryStatus::Error)
        } else {
            MessagePatch::status(DeliveryStatus::Error)
        };
        self.store.update_message(conversation_id, message_id, patch);
    }

    /// Sends a message and waits for the complete answer.
    ///
    /// Returns the id of the appended assistant message.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::EmptyMessage`] for blank input (nothing is
    /// recorded), or the client error if the request failed (an error reply is
    /// recorded).
    #[instrument(skip(self, text), fields(message_length = text.len()))]
    pub async fn send(&self, text: &str) -> Result<Uuid> {
        let (conversation_id, request) = self.prepare(text)?;
        let _loading = LoadingGuard::raise(&self.store);

        match self.client.send_message(&request).await {
            Ok(response) => {
                if !response.conversation_id.is_empty() {
                    self.store
                        .set_remote_id(conversation_id, response.conversation_id);
                }
                let message_id = self
                    .store
                    .add_message(conversation_id, NewMessage::assistant(response.answer))
                    .ok_or(SessionError::ConversationNotFound(conversation_id))?;
                debug!(conversation_id = %conversation_id, message_id = %message_id, "Received answer");
                Ok(message_id)
            }
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "Chat request failed");
                self.record_failure(conversation_id);
                Err(e.into())
            }
        }
    }

    /// Sends a message and streams the answer into an assistant placeholder.
    ///
    /// Fragments are appended in arrival order. Tool records create and resolve
    /// tool calls on the placeholder; an end record stores the remote
    /// conversation id. Cancelling `cancel` closes the stream and stops every
    /// further mutation: the placeholder keeps what it received and becomes
    /// `sent`, or `error` if it is still empty.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::EmptyMessage`] for blank input, the client error
    /// if the request or the stream failed, or [`SessionError::Remote`] if the
    /// assistant reported a failure. The placeholder is marked `error` in the
    /// last two cases.
    #[instrument(skip(self, text, cancel), fields(message_length = text.len()))]
    pub async fn send_streaming(&self, text: &str, cancel: CancellationToken) -> Result<StreamOutcome> {
        let (conversation_id, request) = self.prepare(text)?;
        let _loading = LoadingGuard::raise(&self.store);

        let message_id = self
            .store
            .add_message(conversation_id, NewMessage::placeholder())
            .ok_or(SessionError::ConversationNotFound(conversation_id))?;

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Ok(self.finish_cancelled(conversation_id, message_id));
            }
            opened = self.client.stream_message(&request) => opened,
        };

        let mut records = match opened {
            Ok(records) => records,
            Err(e) => {
                warn!(conversation_id = %conversation_id, error = %e, "Stream request failed");
                self.fail_placeholder(conversation_id, message_id);
                return Err(e.into());
            }
        };

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return Ok(self.finish_cancelled(conversation_id, message_id));
                }
                next = records.next() => next,
            };

            match next {
                None => break,
                Some(Ok(StreamRecord::Error { message })) => {
                    warn!(conversation_id = %conversation_id, reason = %message, "Assistant reported an error");
                    self.fail_placeholder(conversation_id, message_id);
                    return Err(SessionError::Remote(message));
                }
                Some(Ok(record)) => self.apply_record(conversation_id, message_id, record),
                Some(Err(e)) => {
                    warn!(conversation_id = %conversation_id, error = %e, "Stream broke off");
                    self.fail_placeholder(conversation_id, message_id);
                    return Err(e.into());
                }
            }
        }

        self.store.update_message(
            conversation_id,
            message_id,
            MessagePatch::status(DeliveryStatus::Sent),
        );
        debug!(conversation_id = %conversation_id, message_id = %message_id, "Stream completed");
        Ok(StreamOutcome::Completed(message_id))
    }

    fn apply_record(&self, conversation_id: Uuid, message_id: Uuid, record: StreamRecord) {
        match record {
            StreamRecord::Answer(fragment) => {
                self.store
                    .append_to_message(conversation_id, message_id, &fragment);
            }
            StreamRecord::ToolStarted(call) => {
                debug!(tool = %call.name, tool_call_id = %call.id, "Tool started");
                self.store.start_tool_call(conversation_id, message_id, call);
            }
            StreamRecord::ToolFinished {
                id,
                name,
                input,
                outcome,
            } => {
                debug!(tool = %name, tool_call_id = %id, "Tool finished");
                // The start record may never have been sent.
                self.store.start_tool_call(
                    conversation_id,
                    message_id,
                    ToolCall::new(id.clone(), name, input),
                );
                self.store
                    .resolve_tool_call(conversation_id, message_id, &id, outcome);
            }
            StreamRecord::End {
                conversation_id: Some(remote_id),
                ..
            } => {
                self.store.set_remote_id(conversation_id, remote_id);
            }
            StreamRecord::End { .. } | StreamRecord::Error { .. } => {}
        }
    }

    fn finish_cancelled(&self, conversation_id: Uuid, message_id: Uuid) -> StreamOutcome {
        let received = self
            .store
            .conversation(conversation_id)
            .and_then(|c| c.message(message_id).map(|m| !m.content.is_empty()))
            .unwrap_or(false);

        let status = if received {
            DeliveryStatus::Sent
        } else {
            DeliveryStatus::Error
        };
        self.store
            .update_message(conversation_id, message_id, MessagePatch::status(status));
        info!(conversation_id = %conversation_id, message_id = %message_id, "Stream cancelled");
        StreamOutcome::Cancelled(message_id)
    }

    /// Starts a new, empty conversation and makes it active.
    pub fn new_conversation(&self) -> Uuid {
        self.store.create_conversation()
    }

    /// Makes an existing conversation active.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConversationNotFound`] if there is no such conversation.
    pub fn switch_to(&self, conversation_id: Uuid) -> Result<()> {
        if self.store.conversation(conversation_id).is_none() {
            return Err(SessionError::ConversationNotFound(conversation_id));
        }
        self.store.set_active_conversation(conversation_id);
        Ok(())
    }

    /// Removes all messages of a conversation.
    ///
    /// The remote side keeps its copy; the next message starts a fresh remote
    /// conversation.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConversationNotFound`] if there is no such conversation.
    pub fn clear(&self, conversation_id: Uuid) -> Result<()> {
        if self.store.clear_conversation(conversation_id) {
            Ok(())
        } else {
            Err(SessionError::ConversationNotFound(conversation_id))
        }
    }

    /// Deletes a conversation locally and, if it was synced, remotely.
    ///
    /// The remote delete is best effort: a failure is logged and the local
    /// delete stands. Returns `false` if there was no such conversation.
    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    pub async fn delete_conversation(&self, conversation_id: Uuid) -> bool {
        let remote_id = self
            .store
            .conversation(conversation_id)
            .and_then(|c| c.remote_id.clone());

        if !self.store.delete_conversation(conversation_id) {
            return false;
        }

        if let Some(remote_id) = remote_id
            && let Err(e) = self.client.delete_remote_conversation(&remote_id).await
        {
            warn!(remote_id = %remote_id, error = %e, "Remote delete failed");
        }
        true
    }

    /// Fetches the remote message history of a synced conversation.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ConversationNotFound`] or [`SessionError::NotSynced`]
    /// if there is nothing to fetch, or the client error.
    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    pub async fn remote_history(&self, conversation_id: Uuid, limit: u32) -> Result<Value> {
        let conversation = self
            .store
            .conversation(conversation_id)
            .ok_or(SessionError::ConversationNotFound(conversation_id))?;
        let remote_id = conversation
            .remote_id
            .as_deref()
            .ok_or(SessionError::NotSynced(conversation_id))?;

        Ok(self.client.conversation_messages(remote_id, limit).await?)
    }

    /// Runs a command on a remote host.
    ///
    /// # Errors
    ///
    /// Returns the client error if the request failed.
    #[instrument(skip(self))]
    pub async fn execute_command(
        &self,
        host: &str,
        command: &str,
        port: Option<u16>,
    ) -> Result<SshExecuteResponse> {
        let request = SshExecuteRequest::builder()
            .host(host)
            .command(command)
            .port(port.unwrap_or(opsmind_common::api::DEFAULT_SSH_PORT))
            .build();
        Ok(self.client.execute_command(&request).await?)
    }

    /// Fetches usage figures of a remote host.
    ///
    /// # Errors
    ///
    /// Returns the client error if the request failed.
    #[instrument(skip(self))]
    pub async fn server_status(&self, host: &str, port: Option<u16>) -> Result<ServerStatus> {
        Ok(self
            .client
            .server_status(&HostRequest::new(host, port))
            .await?)
    }

    /// Checks whether a remote host accepts connections.
    ///
    /// # Errors
    ///
    /// Returns the client error if the API could not be reached.
    #[instrument(skip(self))]
    pub async fn test_connection(&self, host: &str, port: Option<u16>) -> Result<ConnectionTest> {
        Ok(self
            .client
            .test_connection(&HostRequest::new(host, port))
            .await?)
    }
}
