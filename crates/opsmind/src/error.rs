use thiserror::Error;
use uuid::Uuid;

use opsmind_client::ClientError;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(Uuid),

    #[error("Conversation {0} has not been synced with the assistant yet")]
    NotSynced(Uuid),

    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("Assistant error: {0}")]
    Remote(String),
}

pub type Result<T> = std::result::Result<T, SessionError>;
