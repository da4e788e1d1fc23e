use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::messaging::channels::{ChannelId, ParticipantId};
use crate::messaging::error::ConversationError;
use crate::messaging::message_store::{Message, MessageId};

/// Preview shown for a conversation that has no messages yet.
pub const NO_MESSAGES_PREVIEW: &str = "No messages yet";

/// Configuration for the thread aggregator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatorConfig {
    /// Shared channel, always listed first
    pub general_channel: ChannelId,

    /// Label shown for the shared channel
    pub general_label: String,

    /// How many recent messages the initial build scans
    pub aggregate_limit: usize,

    /// Characters kept in a preview before it is cut with an ellipsis
    pub preview_chars: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            general_channel: ChannelId::named("general"),
            general_label: "General".to_string(),
            aggregate_limit: 400,
            preview_chars: 80,
        }
    }
}

/// Lifecycle of an aggregator's list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregatorState {
    Loading,

    /// The list is complete and live.
    Loaded,

    /// The build failed; no list is shown. Distinct from an empty `Loaded` list.
    Failed(ConversationError),

    Closed,
}

/// Summary of one conversation for the supervisor's overview
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Channel this summary describes
    pub channel: ChannelId,

    /// The counterpart of a direct conversation (None for the shared channel)
    pub counterpart: Option<ParticipantId>,

    /// Human-readable label from the roster
    pub counterpart_label: String,

    /// When the last message was sent (None if no messages)
    pub last_message_at: Option<DateTime<Utc>>,

    /// Truncated content of the last message (None if no messages)
    pub last_message_preview: Option<String>,

    /// Id of the last message, used to drop repeated deliveries
    pub last_message_id: Option<MessageId>,

    /// Author of the last message
    pub last_sender: Option<ParticipantId>,

    /// Messages from others since the conversation was last selected
    pub unread_count: usize,

    /// Ids already applied at `last_message_at`; anything older is refused
    /// by timestamp alone.
    #[serde(skip)]
    latest_ids: HashSet<MessageId>,
}

impl ConversationSummary {
    /// A summary with no messages yet; sorts after every summary with activity.
    pub fn seeded(
        channel: ChannelId,
        counterpart: Option<ParticipantId>,
        counterpart_label: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            counterpart,
            counterpart_label: counterpart_label.into(),
            last_message_at: None,
            last_message_preview: None,
            last_message_id: None,
            last_sender: None,
            unread_count: 0,
            latest_ids: HashSet::new(),
        }
    }

    pub fn has_messages(&self) -> bool {
        self.last_message_id.is_some()
    }

    /// The preview, or the "no messages" placeholder.
    pub fn preview(&self) -> &str {
        self.last_message_preview
            .as_deref()
            .unwrap_or(NO_MESSAGES_PREVIEW)
    }

    /// Records `message` as the latest activity unless it is older than the
    /// current one or was already applied. Returns whether it did.
    pub(crate) fn record(&mut self, message: &Message, preview_chars: usize) -> bool {
        match self.last_message_at {
            Some(last) if message.created_at < last => return false,
            Some(last) if message.created_at == last => {
                if self.latest_ids.contains(&message.id) {
                    return false;
                }
            }
            _ => self.latest_ids.clear(),
        }
        self.latest_ids.insert(message.id.clone());
        self.last_message_at = Some(message.created_at);
        self.last_message_preview = Some(truncate_preview(&message.content, preview_chars));
        self.last_message_id = Some(message.id.clone());
        self.last_sender = Some(message.sender.clone());
        true
    }

    /// Notes a message that is not newer than the recorded one, so a later
    /// delivery of it cannot replace the preview.
    pub(crate) fn mark_seen(&mut self, message: &Message) {
        if self.last_message_at == Some(message.created_at) {
            self.latest_ids.insert(message.id.clone());
        }
    }
}

/// What a live delivery did to the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AggregatorUpdate {
    /// The summary for this channel changed and the list was re-sorted.
    SummaryUpdated(ChannelId),

    /// Repeated or older message for a known channel; nothing changed.
    Unchanged(ChannelId),

    /// The channel is not in the seeded set; no summary was created.
    UnknownChannel(ChannelId),

    /// The subscription was lost; the list stops updating until `reload`.
    LivePaused(ConversationError),
}

/// Cuts `content` to at most `max_chars` characters, ending with "…" when cut.
pub fn truncate_preview(content: &str, max_chars: usize) -> String {
    let content = content.trim();
    if content.chars().count() <= max_chars {
        return content.to_string();
    }
    let kept: String = content.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", kept.trim_end())
}
