//! Chat Session Module
//!
//! One open conversation as seen by one viewer: history load, live append,
//! optimistic send with the draft restored on failure. Every error is kept as
//! session state; nothing here fails the host application.

mod timeline;

#[cfg(test)]
mod tests;

use timeline::MessageTimeline;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::messaging::channels::{ChannelFilter, ChannelId, ChannelSpec, ParticipantId};
use crate::messaging::collaborators::IdentityProvider;
use crate::messaging::error::{ConversationError, MessagingError};
use crate::messaging::message_store::{Message, MessageId, MessageStore};
use crate::messaging::message_streaming::{
    LiveStatus, RealtimeBus, Subscription, SubscriptionLost,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Resolving identity or history; the view shows a placeholder.
    Loading,
    Ready,
    /// An append is in flight.
    Sending,
    Closed,
}

/// What a live delivery did to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    /// A new message was appended to the timeline.
    MessageAppended(Message),

    /// The message was already in the timeline.
    DuplicateIgnored(MessageId),

    /// The subscription was lost; live updates stop until `retry_load`.
    LivePaused(ConversationError),
}

pub struct ChatSession {
    spec: ChannelSpec,
    viewer: Option<ParticipantId>,
    channel: Option<ChannelId>,
    state: SessionState,
    live: LiveStatus,
    timeline: MessageTimeline,
    draft: String,
    error: Option<ConversationError>,
    subscription: Option<Subscription>,
    store: Arc<dyn MessageStore>,
    bus: Arc<dyn RealtimeBus>,
    identity: Arc<dyn IdentityProvider>,
    history_limit: usize,
}

impl ChatSession {
    /// Opens a session and performs the initial load.
    ///
    /// A failed load leaves the session in `Loading` with the error recorded;
    /// call [`ChatSession::retry_load`] to try again.
    pub async fn open(
        spec: ChannelSpec,
        viewer: Option<ParticipantId>,
        store: Arc<dyn MessageStore>,
        bus: Arc<dyn RealtimeBus>,
        identity: Arc<dyn IdentityProvider>,
        history_limit: usize,
    ) -> Self {
        let mut session = Self {
            spec,
            viewer,
            channel: None,
            state: SessionState::Loading,
            live: LiveStatus::Idle,
            timeline: MessageTimeline::new(),
            draft: String::new(),
            error: None,
            subscription: None,
            store,
            bus,
            identity,
            history_limit,
        };
        // Failure is recorded on the session.
        let _ = session.load().await;
        session
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn live_status(&self) -> LiveStatus {
        self.live
    }

    pub fn channel(&self) -> Option<&ChannelId> {
        self.channel.as_ref()
    }

    pub fn viewer(&self) -> Option<&ParticipantId> {
        self.viewer.as_ref()
    }

    /// Messages in display order, oldest first.
    pub fn messages(&self) -> impl DoubleEndedIterator<Item = &Message> {
        self.timeline.iter()
    }

    pub fn message_count(&self) -> usize {
        self.timeline.len()
    }

    /// The message the view should keep scrolled into view (the newest).
    pub fn scroll_target(&self) -> Option<&MessageId> {
        self.timeline.last().map(|m| &m.id)
    }

    pub fn draft(&self) -> &str {
        &self.draft
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    pub fn error(&self) -> Option<&ConversationError> {
        self.error.as_ref()
    }

    /// Sends `content` as the viewer.
    ///
    /// Whitespace-only content is a no-op (`Ok(None)`, nothing stored, no
    /// error). Otherwise the draft is cleared before the append; if the
    /// append fails the draft is set back to `content` exactly as given.
    /// After a successful append any pending deliveries are applied, the
    /// message's own echo included.
    pub async fn send(&mut self, content: &str) -> Result<Option<Message>, ConversationError> {
        let text = content.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let (channel, viewer) = match (self.state, &self.channel, &self.viewer) {
            (SessionState::Ready, Some(channel), Some(viewer)) => (channel.clone(), viewer.clone()),
            (SessionState::Closed, _, _) => return Err(ConversationError::Closed),
            (_, _, None) => return Err(self.record(ConversationError::IdentityPending)),
            _ => {
                return Err(self.record(ConversationError::LoadFailed(
                    "conversation is not loaded".to_string(),
                )));
            }
        };

        self.draft.clear();
        self.state = SessionState::Sending;
        let result = self.store.append(&channel, &viewer, text).await;
        self.state = SessionState::Ready;

        match result {
            Ok(message) => {
                self.timeline.insert(message.clone());
                if matches!(
                    self.error,
                    Some(ConversationError::SendFailed(_) | ConversationError::ValidationRejected)
                ) {
                    self.error = None;
                }
                // Drain the echo now so a sender that never polls cannot lag
                // its own subscription.
                self.apply_pending();
                Ok(Some(message))
            }
            Err(e) => {
                tracing::warn!(
                    target: "aula_messaging::chat_session",
                    "Failed to send message on {}: {}",
                    channel,
                    e
                );
                self.draft = content.to_string();
                let error = match e {
                    MessagingError::Rejected(_) => ConversationError::ValidationRejected,
                    other => ConversationError::SendFailed(other.to_string()),
                };
                Err(self.record(error))
            }
        }
    }

    /// Manual recovery after `LoadFailed`, `IdentityPending` or
    /// `SubscriptionLost`. History is merged into the current timeline.
    pub async fn retry_load(&mut self) -> Result<(), ConversationError> {
        tracing::debug!(
            target: "aula_messaging::chat_session",
            "Retrying load for {:?}",
            self.spec
        );
        self.load().await
    }

    /// Waits for the next live delivery and applies it.
    ///
    /// Returns `None` when there is no open subscription (not loaded,
    /// paused, or closed).
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        let received = self.subscription.as_mut()?.recv().await;
        Some(self.apply_received(received))
    }

    /// Applies every delivery that has already arrived, without waiting.
    pub fn apply_pending(&mut self) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        while let Some(received) = self.subscription.as_mut().and_then(|s| s.try_recv()) {
            updates.push(self.apply_received(received));
        }
        updates
    }

    /// Cancels the subscription and discards in-memory state.
    pub fn close(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
        }
        self.timeline.clear();
        self.draft.clear();
        self.error = None;
        self.live = LiveStatus::Idle;
        self.state = SessionState::Closed;
        tracing::debug!(
            target: "aula_messaging::chat_session",
            "Closed session for {:?}",
            self.channel
        );
    }

    async fn load(&mut self) -> Result<(), ConversationError> {
        if self.state == SessionState::Closed {
            return Err(ConversationError::Closed);
        }

        let viewer = match self.resolve_viewer().await {
            Ok(viewer) => viewer,
            Err(error) => return Err(self.record(error)),
        };
        let channel = match self.spec.resolve(Some(&viewer)) {
            Ok(channel) => channel,
            Err(e) => return Err(self.record(ConversationError::LoadFailed(e.to_string()))),
        };

        // Subscribe before reading history so nothing inserted in between
        // is missed; the overlap is dropped by id.
        if !self.subscription.as_ref().is_some_and(Subscription::is_active) {
            self.subscription = Some(self.bus.subscribe(ChannelFilter::Exact(channel.clone())));
        }

        let history = match self.store.history(&channel, self.history_limit).await {
            Ok(history) => history,
            Err(e) => {
                tracing::warn!(
                    target: "aula_messaging::chat_session",
                    "Failed to load history for {}: {}",
                    channel,
                    e
                );
                if let Some(mut subscription) = self.subscription.take() {
                    subscription.cancel();
                }
                self.live = LiveStatus::Idle;
                return Err(self.record(ConversationError::LoadFailed(e.to_string())));
            }
        };

        let loaded = self.timeline.extend(history);
        self.channel = Some(channel);
        self.state = SessionState::Ready;
        self.live = LiveStatus::Live;
        self.error = None;
        self.apply_pending();

        tracing::debug!(
            target: "aula_messaging::chat_session",
            "Loaded {} messages for {:?}",
            loaded,
            self.channel
        );
        Ok(())
    }

    /// The viewer, resolved from the identity provider at most once.
    async fn resolve_viewer(&mut self) -> Result<ParticipantId, ConversationError> {
        if let Some(viewer) = &self.viewer {
            return Ok(viewer.clone());
        }
        match self.identity.current_viewer_id().await {
            Ok(Some(viewer)) => {
                self.viewer = Some(viewer.clone());
                Ok(viewer)
            }
            Ok(None) => Err(ConversationError::IdentityPending),
            Err(e) => Err(ConversationError::LoadFailed(e.to_string())),
        }
    }

    fn apply_received(&mut self, received: Result<Message, SubscriptionLost>) -> SessionUpdate {
        match received {
            Ok(message) => {
                if self.timeline.insert(message.clone()) {
                    SessionUpdate::MessageAppended(message)
                } else {
                    SessionUpdate::DuplicateIgnored(message.id)
                }
            }
            Err(lost) => {
                tracing::warn!(
                    target: "aula_messaging::chat_session",
                    "Live updates paused for {:?}: {}",
                    self.channel,
                    lost
                );
                if let Some(mut subscription) = self.subscription.take() {
                    subscription.cancel();
                }
                self.live = LiveStatus::Paused;
                SessionUpdate::LivePaused(
                    self.record(ConversationError::SubscriptionLost(lost.to_string())),
                )
            }
        }
    }

    fn record(&mut self, error: ConversationError) -> ConversationError {
        self.error = Some(error.clone());
        error
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("spec", &self.spec)
            .field("viewer", &self.viewer)
            .field("channel", &self.channel)
            .field("state", &self.state)
            .field("live", &self.live)
            .field("messages", &self.timeline.len())
            .field("error", &self.error)
            .finish()
    }
}
