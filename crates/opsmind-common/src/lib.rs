//! # opsmind-common
//!
//! Shared types for the opsmind operations assistant client.
//!
//! This crate holds everything the other crates agree on:
//! - Conversations, messages and their delivery status
//! - Tool call records and their one-way status lifecycle
//! - Request/response bodies of the remote assistant API
//! - Client configuration
//!
//! ## Example
//!
//! ```
//! use opsmind_common::{Conversation, MessageRole, NewMessage};
//!
//! let mut conversation = Conversation::new();
//! let id = conversation.push_message(NewMessage::user("Check disk usage on 10.0.0.5"));
//!
//! let message = conversation.message(id).unwrap();
//! assert_eq!(message.role, MessageRole::User);
//! assert_eq!(conversation.title, "Check disk usage on 10.0.0.5");
//! ```

/// Remote API request and response bodies.
pub mod api;
/// Conversation and message types.
pub mod chat;
/// Client configuration.
pub mod client;
/// Tool call records.
pub mod tools;

pub use api::{
    ChatRequest, ChatResponse, ConnectionTest, HostRequest, ServerStatus, SshExecuteRequest,
    SshExecuteResponse,
};
pub use chat::{Conversation, DeliveryStatus, Message, MessagePatch, MessageRole, NewMessage};
pub use client::{Config, RetryConfig};
pub use tools::{ToolCall, ToolCallStatus, ToolOutcome};
