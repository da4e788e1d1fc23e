use thiserror::Error;

use crate::messaging::channels::ChannelError;
use crate::messaging::database::DatabaseError;

pub type Result<T> = core::result::Result<T, MessagingError>;

/// Failures raised by the collaborators (store, roster, identity, filesystem).
#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("SQLx error: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Message rejected: {0}")]
    Rejected(String),

    #[error("Identity provider error: {0}")]
    Identity(String),

    #[error("Roster error: {0}")]
    Roster(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Errors surfaced to the viewer by a chat session or thread aggregator.
///
/// None of these are fatal: the component that raised one keeps running and
/// holds the error as view state until the next successful operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversationError {
    #[error("Message content must not be empty")]
    ValidationRejected,

    #[error("Failed to load: {0}")]
    LoadFailed(String),

    #[error("Failed to send message: {0}")]
    SendFailed(String),

    #[error("Live updates paused: {0}")]
    SubscriptionLost(String),

    #[error("Viewer identity is not resolved yet")]
    IdentityPending,

    #[error("Conversation is closed")]
    Closed,
}

impl ConversationError {
    /// Whether a manual retry of the load can clear this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ConversationError::LoadFailed(_)
                | ConversationError::SubscriptionLost(_)
                | ConversationError::IdentityPending
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_error_converts() {
        let err: MessagingError = ChannelError::InsufficientArguments.into();
        assert!(matches!(err, MessagingError::Channel(_)));
        assert!(err.to_string().contains("explicit name"));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(ConversationError::LoadFailed("x".into()).is_retryable());
        assert!(ConversationError::SubscriptionLost("x".into()).is_retryable());
        assert!(ConversationError::IdentityPending.is_retryable());
        assert!(!ConversationError::SendFailed("x".into()).is_retryable());
        assert!(!ConversationError::ValidationRejected.is_retryable());
        assert!(!ConversationError::Closed.is_retryable());
    }
}
