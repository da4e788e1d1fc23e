//! Message type and the store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::messaging::channels::{ChannelId, ParticipantId};
use crate::messaging::error::Result;

/// Opaque message identifier assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A persisted message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier, assigned by the store
    pub id: MessageId,

    /// Conversation this message belongs to
    pub channel: ChannelId,

    /// Author of the message
    pub sender: ParticipantId,

    /// Non-empty text payload
    pub content: String,

    /// Assigned by the store; the only ordering key
    pub created_at: DateTime<Utc>,
}

/// Append-only, channel-scoped message persistence.
///
/// Implementations are shared and externally owned: other writers may append
/// concurrently, and the only ordering guarantee relied on is per-channel
/// acceptance order.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists a message. Empty content is rejected without a write.
    async fn append(
        &self,
        channel: &ChannelId,
        sender: &ParticipantId,
        content: &str,
    ) -> Result<Message>;

    /// The `limit` most recent messages of a channel, oldest first.
    ///
    /// Always reads current store state.
    async fn history(&self, channel: &ChannelId, limit: usize) -> Result<Vec<Message>>;

    /// The `limit` most recent messages across `channels`, newest first.
    async fn recent_across(&self, channels: &[ChannelId], limit: usize) -> Result<Vec<Message>>;
}
