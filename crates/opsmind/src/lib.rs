//! # opsmind
//!
//! Conversation state and chat orchestration for the opsmind operations
//! assistant.
//!
//! Two pieces live here:
//! - [`ConversationStore`]: the in-memory table of conversations, mutated only
//!   through its operations and observed through immutable snapshots.
//! - [`ChatSession`]: sends user messages through an
//!   [`AssistantApi`](opsmind_client::AssistantApi) client and records the
//!   answers (complete or streamed) in the store.
//!
//! ## Example
//!
//! ```no_run
//! use opsmind::{ApiClient, ChatSession, Config};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ApiClient::new(Config::new("http://localhost:8000/api"))?;
//! let session = ChatSession::new(client);
//!
//! let outcome = session
//!     .send_streaming("How full is /var on db-02?", CancellationToken::new())
//!     .await?;
//!
//! let store = session.store();
//! let conversation = store
//!     .conversation(store.active_conversation_id().unwrap())
//!     .unwrap();
//! println!("{}", conversation.message(outcome.message_id()).unwrap().content);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod session;
pub mod store;

pub use opsmind_client::*;
pub use opsmind_common::*;

pub use error::SessionError;
pub use session::{ChatSession, DEFAULT_HISTORY_LIMIT, ERROR_REPLY, StreamOutcome};
pub use store::{ConversationStore, StoreSnapshot};
