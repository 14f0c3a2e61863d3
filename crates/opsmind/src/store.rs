//! In-memory conversation table.
//!
//! [`ConversationStore`] is the only owner of conversation state. Every
//! mutation builds a new [`StoreSnapshot`] and swaps it in under the channel
//! lock, so readers holding a snapshot (or watching for changes) always see a
//! complete before- or after-state, never a half-applied one. Conversations
//! inside a snapshot are `Arc`-shared; a mutation only copies the one
//! conversation it touches.
//!
//! Operations that target a conversation or message that does not exist are
//! no-ops: nothing changes and subscribers are not woken.
//!
//! ```
//! use opsmind::store::ConversationStore;
//! use opsmind_common::NewMessage;
//!
//! let store = ConversationStore::new();
//! let id = store.create_conversation();
//! store.add_message(id, NewMessage::user("Is nginx running on web-01?"));
//!
//! let snapshot = store.snapshot();
//! assert_eq!(snapshot.active_conversation_id, Some(id));
//! assert_eq!(snapshot.conversations[0].title, "Is nginx running on web-01?");
//! ```

use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use opsmind_common::{Conversation, Message, MessagePatch, NewMessage, ToolCall, ToolOutcome};

/// An immutable view of the whole store.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    /// All conversations, most recently created first.
    pub conversations: Vec<Arc<Conversation>>,
    /// The conversation new messages go to.
    ///
    /// Normally references a conversation in `conversations`, but
    /// [`ConversationStore::set_active_conversation`] does not check.
    pub active_conversation_id: Option<Uuid>,
    /// Whether a request to the assistant is outstanding.
    pub is_loading: bool,
}

impl StoreSnapshot {
    /// Looks up a conversation by id.
    #[must_use]
    pub fn conversation(&self, id: Uuid) -> Option<&Arc<Conversation>> {
        self.conversations.iter().find(|c| c.id == id)
    }

    /// The active conversation, if it exists.
    #[must_use]
    pub fn active_conversation(&self) -> Option<&Arc<Conversation>> {
        self.active_conversation_id
            .and_then(|id| self.conversation(id))
    }

    fn conversation_mut(&mut self, id: Uuid) -> Option<&mut Conversation> {
        self.conversations
            .iter_mut()
            .find(|c| c.id == id)
            .map(Arc::make_mut)
    }
}

/// Handle to the conversation table.
///
/// Cloning the handle shares the table.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    state: Arc<watch::Sender<Arc<StoreSnapshot>>>,
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore {
    /// Creates an empty store with no active conversation.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(Arc::new(StoreSnapshot::default()));
        Self {
            state: Arc::new(state),
        }
    }

    /// The current state.
    #[must_use]
    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        Arc::clone(&self.state.borrow())
    }

    /// A receiver that is notified whenever a mutation takes effect.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<StoreSnapshot>> {
        self.state.subscribe()
    }

    /// The id of the active conversation.
    #[must_use]
    pub fn active_conversation_id(&self) -> Option<Uuid> {
        self.state.borrow().active_conversation_id
    }

    /// Looks up a conversation by id.
    #[must_use]
    pub fn conversation(&self, id: Uuid) -> Option<Arc<Conversation>> {
        self.state.borrow().conversation(id).cloned()
    }

    /// Whether a request to the assistant is outstanding.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.state.borrow().is_loading
    }

    /// Applies `f` to a copy of the current snapshot and publishes the copy if
    /// `f` reports a change.
    fn update(&self, f: impl FnOnce(&mut StoreSnapshot) -> bool) -> bool {
        self.state.send_if_modified(|current| {
            let mut next = StoreSnapshot::clone(current);
            if f(&mut next) {
                *current = Arc::new(next);
                true
            } else {
                false
            }
        })
    }

    /// Applies `f` to one message and refreshes its conversation's
    /// `updated_at` if `f` reports a change.
    fn update_message_with(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        f: impl FnOnce(&mut Message) -> bool,
    ) -> bool {
        let changed = self.update(|snapshot| {
            let Some(conversation) = snapshot.conversation_mut(conversation_id) else {
                return false;
            };
            let Some(message) = conversation.message_mut(message_id) else {
                return false;
            };
            if !f(message) {
                return false;
            }
            conversation.touch();
            true
        });
        if !changed {
            debug!(
                conversation_id = %conversation_id,
                message_id = %message_id,
                "Message update had no effect"
            );
        }
        changed
    }

    /// Creates an empty conversation, puts it first and makes it active.
    pub fn create_conversation(&self) -> Uuid {
        let conversation = Conversation::new();
        let id = conversation.id;
        self.update(|snapshot| {
            snapshot.conversations.insert(0, Arc::new(conversation));
            snapshot.active_conversation_id = Some(id);
            true
        });
        debug!(conversation_id = %id, "Created conversation");
        id
    }

    /// Points the active conversation at `id` without checking that it exists.
    pub fn set_active_conversation(&self, id: Uuid) {
        self.update(|snapshot| {
            let changed = snapshot.active_conversation_id != Some(id);
            snapshot.active_conversation_id = Some(id);
            changed
        });
    }

    /// Returns the active conversation, creating one if none exists.
    pub fn ensure_active_conversation(&self) -> Uuid {
        if let Some(id) = self
            .state
            .borrow()
            .active_conversation()
            .map(|c| c.id)
        {
            return id;
        }
        self.create_conversation()
    }

    /// Removes a conversation and all its messages.
    ///
    /// If it was active, the first remaining conversation becomes active (or
    /// none). Returns `false` if no such conversation existed.
    pub fn delete_conversation(&self, id: Uuid) -> bool {
        let deleted = self.update(|snapshot| {
            let Some(index) = snapshot.conversations.iter().position(|c| c.id == id) else {
                return false;
            };
            snapshot.conversations.remove(index);
            if snapshot.active_conversation_id == Some(id) {
                snapshot.active_conversation_id = snapshot.conversations.first().map(|c| c.id);
            }
            true
        });
        if deleted {
            debug!(conversation_id = %id, "Deleted conversation");
        } else {
            debug!(conversation_id = %id, "Delete of unknown conversation ignored");
        }
        deleted
    }

    /// Appends a message and returns its generated id.
    ///
    /// The first message of a conversation, if authored by the user, sets the
    /// title. Returns `None` if the conversation does not exist.
    pub fn add_message(&self, conversation_id: Uuid, message: NewMessage) -> Option<Uuid> {
        let mut added = None;
        self.update(|snapshot| {
            let Some(conversation) = snapshot.conversation_mut(conversation_id) else {
                return false;
            };
            added = Some(conversation.push_message(message));
            true
        });
        match added {
            Some(message_id) => debug!(
                conversation_id = %conversation_id,
                message_id = %message_id,
                "Added message"
            ),
            None => debug!(conversation_id = %conversation_id, "Add to unknown conversation ignored"),
        }
        added
    }

    /// Merges `patch` into a message. Returns `false` if nothing was patched.
    pub fn update_message(&self, conversation_id: Uuid, message_id: Uuid, patch: MessagePatch) -> bool {
        if patch.is_empty() {
            return false;
        }
        self.update_message_with(conversation_id, message_id, |message| {
            message.apply(patch);
            true
        })
    }

    /// Appends streamed text to a message's content.
    pub fn append_to_message(&self, conversation_id: Uuid, message_id: Uuid, fragment: &str) -> bool {
        if fragment.is_empty() {
            return false;
        }
        self.update_message_with(conversation_id, message_id, |message| {
            message.content.push_str(fragment);
            true
        })
    }

    /// Records the start of a tool invocation on a message.
    ///
    /// An invocation id that is already present is left alone.
    pub fn start_tool_call(&self, conversation_id: Uuid, message_id: Uuid, call: ToolCall) -> bool {
        self.update_message_with(conversation_id, message_id, |message| {
            if message.tool_calls.iter().any(|existing| existing.id == call.id) {
                return false;
            }
            message.tool_calls.push(call);
            true
        })
    }

    /// Resolves a running tool invocation in place.
    ///
    /// Resolving an unknown or already resolved invocation changes nothing.
    pub fn resolve_tool_call(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        tool_call_id: &str,
        outcome: ToolOutcome,
    ) -> bool {
        self.update_message_with(conversation_id, message_id, |message| {
            let Some(call) = message.tool_call_mut(tool_call_id) else {
                return false;
            };
            match call.resolve(outcome) {
                Ok(()) => true,
                Err(e) => {
                    debug!(tool_call_id, "{e}");
                    false
                }
            }
        })
    }

    /// Records the id the remote side assigned to a conversation.
    pub fn set_remote_id(&self, conversation_id: Uuid, remote_id: impl Into<String>) -> bool {
        let remote_id = remote_id.into();
        self.update(|snapshot| {
            let Some(conversation) = snapshot.conversation_mut(conversation_id) else {
                return false;
            };
            if conversation.remote_id.as_deref() == Some(remote_id.as_str()) {
                return false;
            }
            conversation.remote_id = Some(remote_id);
            true
        })
    }

    /// Removes all messages of a conversation and resets its title.
    pub fn clear_conversation(&self, id: Uuid) -> bool {
        let cleared = self.update(|snapshot| {
            let Some(conversation) = snapshot.conversation_mut(id) else {
                return false;
            };
            conversation.clear();
            true
        });
        if cleared {
            debug!(conversation_id = %id, "Cleared conversation");
        }
        cleared
    }

    /// Sets the outstanding-request flag.
    pub fn set_loading(&self, loading: bool) {
        self.update(|snapshot| {
            let changed = snapshot.is_loading != loading;
            snapshot.is_loading = loading;
            changed
        });
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    #![allow(clippy::expect_used)]

    use super::*;
    use opsmind_common::chat::DEFAULT_TITLE;
    use opsmind_common::{DeliveryStatus, MessageRole, ToolCallStatus};

    #[test]
    fn test_create_conversation_is_first_and_active() {
        let store = ConversationStore::new();
        let first = store.create_conversation();
        let second = store.create_conversation();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.conversations.len(), 2);
        assert_eq!(snapshot.conversations[0].id, second);
        assert_eq!(snapshot.conversations[1].id, first);
        assert_eq!(snapshot.active_conversation_id, Some(second));
        assert_eq!(snapshot.conversations[0].title, DEFAULT_TITLE);
    }

    #[test]
    fn test_set_active_is_unchecked() {
        let store = ConversationStore::new();
        let phantom = Uuid::new_v4();
        store.set_active_conversation(phantom);

        assert_eq!(store.active_conversation_id(), Some(phantom));
        assert!(store.snapshot().active_conversation().is_none());
    }

    #[test]
    fn test_ensure_active_creates_only_when_needed() {
        let store = ConversationStore::new();
        let created = store.ensure_active_conversation();
        assert_eq!(store.ensure_active_conversation(), created);

        store.set_active_conversation(Uuid::new_v4());
        let replacement = store.ensure_active_conversation();
        assert_ne!(replacement, created);
        assert_eq!(store.snapshot().conversations.len(), 2);
    }

    #[test]
    fn test_delete_active_repoints_to_first_remaining() {
        let store = ConversationStore::new();
        let oldest = store.create_conversation();
        let middle = store.create_conversation();
        let newest = store.create_conversation();

        assert!(store.delete_conversation(newest));
        assert_eq!(store.active_conversation_id(), Some(middle));

        store.set_active_conversation(oldest);
        assert!(store.delete_conversation(oldest));
        assert_eq!(store.active_conversation_id(), Some(middle));

        assert!(store.delete_conversation(middle));
        assert_eq!(store.active_conversation_id(), None);
        assert!(store.snapshot().conversations.is_empty());
    }

    #[test]
    fn test_delete_other_or_unknown_keeps_active() {
        let store = ConversationStore::new();
        let other = store.create_conversation();
        let active = store.create_conversation();

        assert!(!store.delete_conversation(Uuid::new_v4()));
        assert_eq!(store.active_conversation_id(), Some(active));

        assert!(store.delete_conversation(other));
        assert_eq!(store.active_conversation_id(), Some(active));
    }

    #[test]
    fn test_add_message_sets_title_and_advances_updated_at() {
        let store = ConversationStore::new();
        let id = store.create_conversation();
        let before = store.conversation(id).unwrap().updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));

        let message_id = store
            .add_message(
                id,
                NewMessage::user("Check server 10.0.0.5 status please tell me everything about it"),
            )
            .unwrap();

        let conversation = store.conversation(id).unwrap();
        assert_eq!(conversation.title, "Check server 10.0.0.5 status p...");
        assert!(conversation.updated_at > before);
        assert_eq!(conversation.message(message_id).unwrap().role, MessageRole::User);

        store.add_message(id, NewMessage::user("something else entirely"));
        assert_eq!(
            store.conversation(id).unwrap().title,
            "Check server 10.0.0.5 status p..."
        );
    }

    #[test]
    fn test_operations_on_missing_targets_are_noops() {
        let store = ConversationStore::new();
        let id = store.create_conversation();
        let rx = store.subscribe();

        let missing = Uuid::new_v4();
        assert!(store.add_message(missing, NewMessage::user("hi")).is_none());
        assert!(!store.update_message(id, missing, MessagePatch::content("x")));
        assert!(!store.append_to_message(missing, missing, "x"));
        assert!(!store.clear_conversation(missing));
        assert!(!store.set_remote_id(missing, "r"));

        assert!(!rx.has_changed().unwrap());
        assert!(store.conversation(id).unwrap().messages.is_empty());
    }

    #[test]
    fn test_update_message_merges_and_touches() {
        let store = ConversationStore::new();
        let id = store.create_conversation();
        let message_id = store.add_message(id, NewMessage::placeholder()).unwrap();
        let before = store.conversation(id).unwrap().updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));

        assert!(store.update_message(
            id,
            message_id,
            MessagePatch::content("done").with_status(DeliveryStatus::Sent),
        ));

        let conversation = store.conversation(id).unwrap();
        let message = conversation.message(message_id).unwrap();
        assert_eq!(message.content, "done");
        assert_eq!(message.status, DeliveryStatus::Sent);
        assert_eq!(message.role, MessageRole::Assistant);
        assert!(conversation.updated_at > before);
    }

    #[test]
    fn test_append_preserves_arrival_order() {
        let store = ConversationStore::new();
        let id = store.create_conversation();
        let message_id = store.add_message(id, NewMessage::placeholder()).unwrap();

        for fragment in ["CPU ", "usage ", "is ", "12%"] {
            store.append_to_message(id, message_id, fragment);
        }

        let conversation = store.conversation(id).unwrap();
        assert_eq!(conversation.message(message_id).unwrap().content, "CPU usage is 12%");
    }

    #[test]
    fn test_tool_call_lifecycle() {
        let store = ConversationStore::new();
        let id = store.create_conversation();
        let message_id = store.add_message(id, NewMessage::placeholder()).unwrap();

        let call = ToolCall::new("t1", "execute_command", serde_json::Map::new());
        assert!(store.start_tool_call(id, message_id, call.clone()));
        assert!(!store.start_tool_call(id, message_id, call));

        assert!(store.resolve_tool_call(
            id,
            message_id,
            "t1",
            ToolOutcome::Completed("ok".to_string())
        ));
        assert!(!store.resolve_tool_call(
            id,
            message_id,
            "t1",
            ToolOutcome::Failed("late".to_string())
        ));

        let conversation = store.conversation(id).unwrap();
        let calls = &conversation.message(message_id).unwrap().tool_calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].status, ToolCallStatus::Completed);
        assert_eq!(calls[0].output.as_deref(), Some("ok"));
    }

    #[test]
    fn test_clear_conversation_resets() {
        let store = ConversationStore::new();
        let id = store.create_conversation();
        store.add_message(id, NewMessage::user("restart nginx"));
        store.set_remote_id(id, "remote-1");

        assert!(store.clear_conversation(id));

        let conversation = store.conversation(id).unwrap();
        assert!(conversation.messages.is_empty());
        assert_eq!(conversation.title, DEFAULT_TITLE);
        assert!(conversation.remote_id.is_none());
    }

    #[test]
    fn test_old_snapshot_is_unaffected_by_mutation() {
        let store = ConversationStore::new();
        let id = store.create_conversation();
        let before = store.snapshot();

        store.add_message(id, NewMessage::user("hello"));
        store.set_loading(true);

        assert!(before.conversations[0].messages.is_empty());
        assert!(!before.is_loading);
        assert_eq!(store.snapshot().conversations[0].messages.len(), 1);
        assert!(store.is_loading());
    }

    #[tokio::test]
    async fn test_subscribers_see_each_mutation() {
        let store = ConversationStore::new();
        let mut rx = store.subscribe();

        let id = store.create_conversation();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().active_conversation_id, Some(id));

        store.set_loading(false);
        assert!(!rx.has_changed().unwrap());

        store.set_loading(true);
        rx.changed().await.unwrap();
        assert!(rx.borrow_and_update().is_loading);
    }
}
