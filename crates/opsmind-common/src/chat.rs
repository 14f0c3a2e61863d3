//! Conversation and message types.
//!
//! A [`Conversation`] is a titled, timestamped, ordered sequence of [`Message`]s.
//! Messages are appended once and never reordered; after the append only their
//! content, delivery status and tool calls may change (through [`MessagePatch`]).
//!
//! # Titles
//!
//! A new conversation is titled [`DEFAULT_TITLE`]. When its first message is a
//! user message, the title is derived from that message's content: the first
//! [`TITLE_MAX_CHARS`] characters, followed by [`TITLE_ELLIPSIS`] when the
//! content is longer.
//!
//! ```
//! use opsmind_common::chat::{Conversation, NewMessage};
//!
//! let mut conversation = Conversation::new();
//! conversation.push_message(NewMessage::user(
//!     "Check server 10.0.0.5 status please tell me everything about it",
//! ));
//! assert_eq!(conversation.title, "Check server 10.0.0.5 status p...");
//!
//! // Later messages never change the title.
//! conversation.push_message(NewMessage::user("and the load average"));
//! assert_eq!(conversation.title, "Check server 10.0.0.5 status p...");
//! ```
//!
//! # Timestamps
//!
//! `updated_at` is refreshed on every append or message update and never moves
//! backwards, even if the wall clock does.

use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::tools::ToolCall;

/// Title given to conversations that have no user message yet.
pub const DEFAULT_TITLE: &str = "New conversation";

/// Number of characters of the first user message kept in a derived title.
pub const TITLE_MAX_CHARS: usize = 30;

/// Marker appended to a derived title when the message was truncated.
pub const TITLE_ELLIPSIS: &str = "...";

/// Author of a message.
///
/// Serializes to "user" / "assistant".
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Input typed by the operator.
    User,
    /// Answer produced by the remote assistant.
    Assistant,
}

/// Delivery state of a message.
///
/// Informational only: no store operation is gated on it.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// The request carrying this message (or filling it) is still in flight.
    Sending,
    /// Delivered, or fully received.
    #[default]
    Sent,
    /// The request failed.
    Error,
}

/// A single turn in a conversation.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Message {
    /// Unique within the owning conversation. Generated at append time.
    pub id: Uuid,
    /// Author. Fixed at append time.
    pub role: MessageRole,
    /// Text content. Filled in incrementally while an answer streams.
    pub content: String,
    /// Creation time. Fixed at append time.
    pub timestamp: DateTime<Utc>,
    /// Delivery state.
    #[serde(default)]
    pub status: DeliveryStatus,
    /// Tool invocations referenced by this message, in start order.
    ///
    /// Uses `SmallVec` since most answers invoke at most a couple of tools.
    #[serde(default, skip_serializing_if = "SmallVec::is_empty")]
    pub tool_calls: SmallVec<[ToolCall; 2]>,
}

impl Message {
    /// Materializes a [`NewMessage`] with a fresh id and the current time.
    #[must_use]
    pub fn from_new(new: NewMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: new.role,
            content: new.content,
            timestamp: Utc::now(),
            status: new.status,
            tool_calls: new.tool_calls,
        }
    }

    /// Merges a patch into this message. Role, id and timestamp are never touched.
    pub fn apply(&mut self, patch: MessagePatch) {
        if let Some(content) = patch.content {
            self.content = content;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(mut tool_calls) = patch.tool_calls {
            // Resolved calls are final: they never go back to running and are
            // never dropped by a replacement list.
            for resolved in self.tool_calls.iter().filter(|c| c.is_resolved()) {
                match tool_calls.iter_mut().find(|call| call.id == resolved.id) {
                    Some(call) if call != resolved => {
                        debug!("Keeping resolved tool call {} over patch", resolved.id);
                        call.clone_from(resolved);
                    }
                    Some(_) => {}
                    None => {
                        debug!("Keeping resolved tool call {} missing from patch", resolved.id);
                        tool_calls.push(resolved.clone());
                    }
                }
            }
            self.tool_calls = tool_calls;
        }
    }

    /// Looks up a tool call by invocation id.
    pub fn tool_call_mut(&mut self, tool_call_id: &str) -> Option<&mut ToolCall> {
        self.tool_calls.iter_mut().find(|tc| tc.id == tool_call_id)
    }
}

/// A message as supplied by a caller, before it gets an id and timestamp.
///
/// ```
/// use opsmind_common::chat::{DeliveryStatus, MessageRole, NewMessage};
///
/// let msg = NewMessage::builder()
///     .role(MessageRole::Assistant)
///     .content("Sorry, something went wrong.")
///     .status(DeliveryStatus::Error)
///     .build();
/// assert_eq!(msg.status, DeliveryStatus::Error);
/// ```
#[derive(Debug, Clone, PartialEq, TypedBuilder)]
pub struct NewMessage {
    /// Author.
    pub role: MessageRole,
    /// Initial content.
    #[builder(setter(into))]
    pub content: String,
    /// Initial delivery state.
    #[builder(default)]
    pub status: DeliveryStatus,
    /// Initial tool calls.
    #[builder(default)]
    pub tool_calls: SmallVec<[ToolCall; 2]>,
}

impl NewMessage {
    /// A delivered user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::builder().role(MessageRole::User).content(content).build()
    }

    /// A fully received assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::builder()
            .role(MessageRole::Assistant)
            .content(content)
            .build()
    }

    /// An empty assistant message that a streamed answer will fill in.
    #[must_use]
    pub fn placeholder() -> Self {
        Self::builder()
            .role(MessageRole::Assistant)
            .content(String::new())
            .status(DeliveryStatus::Sending)
            .build()
    }

    /// Overrides the delivery status.
    #[must_use]
    pub const fn with_status(mut self, status: DeliveryStatus) -> Self {
        self.status = status;
        self
    }
}

/// A partial update to an existing message. `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePatch {
    /// Replacement content.
    pub content: Option<String>,
    /// Replacement delivery status.
    pub status: Option<DeliveryStatus>,
    /// Replacement tool call list. Resolved calls of the message survive the
    /// replacement unchanged, whether or not the list mentions them.
    pub tool_calls: Option<SmallVec<[ToolCall; 2]>>,
}

impl MessagePatch {
    /// A patch that only replaces the content.
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// A patch that only replaces the status.
    #[must_use]
    pub fn status(status: DeliveryStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Adds a status replacement to this patch.
    #[must_use]
    pub const fn with_status(mut self, status: DeliveryStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Returns `true` if applying this patch would change nothing.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.content.is_none() && self.status.is_none() && self.tool_calls.is_none()
    }
}

/// Derives a conversation title from the content of its first user message.
#[must_use]
pub fn derive_title(content: &str) -> String {
    let mut chars = content.chars();
    let head: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        head + TITLE_ELLIPSIS
    } else {
        head
    }
}

/// A conversation thread.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Conversation {
    /// Unique for the lifetime of the store. Generated at creation.
    pub id: Uuid,

    /// Human-readable title, see the module docs for how it is derived.
    pub title: String,

    /// Messages in conversation order (insertion order).
    pub messages: Vec<Message>,

    /// When this conversation was created.
    pub created_at: DateTime<Utc>,

    /// When this conversation or one of its messages last changed.
    pub updated_at: DateTime<Utc>,

    /// Conversation id assigned by the remote assistant, once known.
    ///
    /// Sent back with every later request so the remote side keeps its context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
}

impl Conversation {
    /// Creates an empty conversation with a generated id and the default title.
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: DEFAULT_TITLE.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
            remote_id: None,
        }
    }

    /// Refreshes `updated_at`, never moving it backwards.
    pub fn touch(&mut self) {
        let now = Utc::now();
        if now > self.updated_at {
            self.updated_at = now;
        }
    }

    /// Appends a message and returns its generated id.
    ///
    /// If this is the first message and it is authored by the user, the title
    /// is derived from its content.
    pub fn push_message(&mut self, new: NewMessage) -> Uuid {
        if self.messages.is_empty() && new.role == MessageRole::User {
            self.title = derive_title(&new.content);
        }

        let message = Message::from_new(new);
        let id = message.id;
        self.messages.push(message);
        self.touch();
        id
    }

    /// Returns the message with the given id.
    #[must_use]
    pub fn message(&self, message_id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == message_id)
    }

    /// Returns the message with the given id, mutably.
    pub fn message_mut(&mut self, message_id: Uuid) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == message_id)
    }

    /// Returns the most recent message, if any.
    #[must_use]
    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Empties the message sequence and resets the title.
    ///
    /// The remote id is dropped too: a cleared conversation starts a fresh
    /// context on the remote side.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.title = DEFAULT_TITLE.to_string();
        self.remote_id = None;
        self.touch();
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
