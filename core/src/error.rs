/// Error types for the chat synchronization core
use crate::types::LocalId;
use thiserror::Error;

/// Rejections raised synchronously by the outbound dispatcher, before any
/// network call is made.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("message content is empty")]
    EmptyContent,

    #[error("no conversation is open")]
    NoOpenConversation,

    #[error("conversation {requested} is not the open conversation ({open})")]
    ConversationNotOpen { requested: i64, open: i64 },

    #[error("message {0} has not failed and cannot be retried or discarded")]
    NotFailed(LocalId),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("API error: status {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("chat view is not mounted")]
    NotMounted,

    #[error("open request superseded by a later selection")]
    Superseded,

    #[error("no local message with id {0}")]
    UnknownMessage(LocalId),
}

impl SyncError {
    /// True for failures a poller recovers from by waiting for the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SyncError::Http(_) | SyncError::Api { .. } | SyncError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
