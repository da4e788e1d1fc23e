//! Thread Aggregator Module
//!
//! The supervisor's overview: one summary for the shared channel and one per
//! active counterpart, kept current from the realtime bus. The shared channel
//! is always first; the rest are ordered by most recent activity.

mod types;


pub use types::{
    AggregatorConfig, AggregatorState, AggregatorUpdate, ConversationSummary, NO_MESSAGES_PREVIEW,
    truncate_preview,
};

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::messaging::channels::{ChannelFilter, ChannelId, ParticipantId};
use crate::messaging::collaborators::{Counterpart, RosterProvider};
use crate::messaging::error::ConversationError;
use crate::messaging::message_store::{Message, MessageStore};
use crate::messaging::message_streaming::{
    LiveStatus, RealtimeBus, Subscription, SubscriptionLost,
};

/// Orders channels for display: `general` first, then newest activity
/// first, with conversations that have no messages last.
///
/// The sort is stable, so channels with equal activity keep their relative
/// order.
pub fn sort_summaries(
    order: &mut [ChannelId],
    summaries: &HashMap<ChannelId, ConversationSummary>,
    general: &ChannelId,
) {
    order.sort_by(|a, b| match (a == general, b == general) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => {
            let a_at = summaries.get(a).and_then(|s| s.last_message_at);
            let b_at = summaries.get(b).and_then(|s| s.last_message_at);
            // None < Some, so comparing b to a puts None last.
            b_at.cmp(&a_at)
        }
    });
}

pub struct ThreadAggregator {
    supervisor: ParticipantId,
    config: AggregatorConfig,
    state: AggregatorState,
    live: LiveStatus,
    summaries: HashMap<ChannelId, ConversationSummary>,
    order: Vec<ChannelId>,
    selected: Option<ChannelId>,
    subscription: Option<Subscription>,
    store: Arc<dyn MessageStore>,
    bus: Arc<dyn RealtimeBus>,
    roster: Arc<dyn RosterProvider>,
}

impl ThreadAggregator {
    /// Opens the overview for `supervisor` and builds it. A failed build is
    /// recorded as [`AggregatorState::Failed`].
    pub async fn open(
        supervisor: ParticipantId,
        store: Arc<dyn MessageStore>,
        bus: Arc<dyn RealtimeBus>,
        roster: Arc<dyn RosterProvider>,
        config: AggregatorConfig,
    ) -> Self {
        let mut aggregator = Self {
            supervisor,
            config,
            state: AggregatorState::Loading,
            live: LiveStatus::Idle,
            summaries: HashMap::new(),
            order: Vec::new(),
            selected: None,
            subscription: None,
            store,
            bus,
            roster,
        };
        let _ = aggregator.load().await;
        aggregator
    }

    pub fn supervisor(&self) -> &ParticipantId {
        &self.supervisor
    }

    pub fn state(&self) -> &AggregatorState {
        &self.state
    }

    pub fn live_status(&self) -> LiveStatus {
        self.live
    }

    /// Summaries in display order. Empty unless the list is `Loaded`.
    pub fn summaries(&self) -> Vec<&ConversationSummary> {
        if self.state != AggregatorState::Loaded {
            return Vec::new();
        }
        self.order
            .iter()
            .filter_map(|channel| self.summaries.get(channel))
            .collect()
    }

    pub fn summary(&self, channel: &ChannelId) -> Option<&ConversationSummary> {
        self.summaries.get(channel)
    }

    pub fn selected_channel(&self) -> Option<&ChannelId> {
        self.selected.as_ref()
    }

    pub fn total_unread(&self) -> usize {
        self.summaries.values().map(|s| s.unread_count).sum()
    }

    /// Marks `channel` as the one being viewed and resets its unread count.
    /// Returns `None` for a channel that is not listed.
    pub fn select_channel(&mut self, channel: &ChannelId) -> Option<&ConversationSummary> {
        let summary = self.summaries.get_mut(channel)?;
        summary.unread_count = 0;
        self.selected = Some(channel.clone());
        Some(summary)
    }

    /// Rebuilds the list from the roster and the store.
    ///
    /// Counterparts no longer active are dropped; surviving conversations
    /// keep their unread counts and the current selection.
    pub async fn reload(&mut self) -> Result<(), ConversationError> {
        self.load().await
    }

    /// Waits for the next live delivery and applies it.
    pub async fn next_update(&mut self) -> Option<AggregatorUpdate> {
        let received = self.subscription.as_mut()?.recv().await;
        Some(self.apply_received(received))
    }

    /// Applies every delivery that has already arrived, without waiting.
    pub fn apply_pending(&mut self) -> Vec<AggregatorUpdate> {
        let mut updates = Vec::new();
        while let Some(received) = self.subscription.as_mut().and_then(|s| s.try_recv()) {
            updates.push(self.apply_received(received));
        }
        updates
    }

    pub fn close(&mut self) {
        if let Some(mut subscription) = self.subscription.take() {
            subscription.cancel();
        }
        self.summaries.clear();
        self.order.clear();
        self.selected = None;
        self.live = LiveStatus::Idle;
        self.state = AggregatorState::Closed;
        tracing::debug!(
            target: "aula_messaging::thread_aggregator",
            "Closed thread aggregator for {}",
            self.supervisor
        );
    }

    fn live_filter(&self) -> ChannelFilter {
        ChannelFilter::AnyOf(vec![
            ChannelFilter::Exact(self.config.general_channel.clone()),
            ChannelFilter::DirectWith(self.supervisor.clone()),
        ])
    }

    async fn load(&mut self) -> Result<(), ConversationError> {
        if self.state == AggregatorState::Closed {
            return Err(ConversationError::Closed);
        }
        self.state = AggregatorState::Loading;

        // Subscribe before reading so activity during the build is not lost;
        // anything already counted is dropped by id or timestamp.
        if let Some(mut previous) = self.subscription.take() {
            previous.cancel();
        }
        let subscription = self.bus.subscribe(self.live_filter());

        let counterparts = match self.roster.active_counterparts_for(&self.supervisor).await {
            Ok(counterparts) => counterparts,
            Err(e) => {
                tracing::warn!(
                    target: "aula_messaging::thread_aggregator",
                    "Failed to fetch roster for {}: {}",
                    self.supervisor,
                    e
                );
                return Err(self.fail(ConversationError::LoadFailed(e.to_string())));
            }
        };

        let (mut summaries, mut order) = self.seed(&counterparts);

        let recent = match self
            .store
            .recent_across(&order, self.config.aggregate_limit)
            .await
        {
            Ok(recent) => recent,
            Err(e) => {
                tracing::warn!(
                    target: "aula_messaging::thread_aggregator",
                    "Failed to fetch recent messages for {}: {}",
                    self.supervisor,
                    e
                );
                return Err(self.fail(ConversationError::LoadFailed(e.to_string())));
            }
        };

        // Newest first: the first message seen for a channel is its latest.
        for message in &recent {
            if let Some(summary) = summaries.get_mut(&message.channel) {
                if summary.has_messages() {
                    summary.mark_seen(message);
                } else {
                    summary.record(message, self.config.preview_chars);
                }
            }
        }

        for (channel, summary) in summaries.iter_mut() {
            if let Some(previous) = self.summaries.get(channel) {
                summary.unread_count = previous.unread_count;
            }
        }
        if self
            .selected
            .as_ref()
            .is_some_and(|selected| !summaries.contains_key(selected))
        {
            self.selected = None;
        }

        sort_summaries(&mut order, &summaries, &self.config.general_channel);
        self.summaries = summaries;
        self.order = order;
        self.subscription = Some(subscription);
        self.live = LiveStatus::Live;
        self.state = AggregatorState::Loaded;
        self.apply_pending();

        tracing::debug!(
            target: "aula_messaging::thread_aggregator",
            "Built {} conversation summaries for {} from {} recent messages",
            self.order.len(),
            self.supervisor,
            recent.len()
        );
        Ok(())
    }

    /// One summary for the shared channel, then one per counterpart, in
    /// roster order.
    fn seed(
        &self,
        counterparts: &[Counterpart],
    ) -> (HashMap<ChannelId, ConversationSummary>, Vec<ChannelId>) {
        let general = self.config.general_channel.clone();
        let mut summaries = HashMap::with_capacity(counterparts.len() + 1);
        let mut order = Vec::with_capacity(counterparts.len() + 1);

        summaries.insert(
            general.clone(),
            ConversationSummary::seeded(general.clone(), None, self.config.general_label.clone()),
        );
        order.push(general);

        for counterpart in counterparts {
            let channel = ChannelId::direct(&self.supervisor, &counterpart.id);
            if summaries.contains_key(&channel) {
                continue;
            }
            summaries.insert(
                channel.clone(),
                ConversationSummary::seeded(
                    channel.clone(),
                    Some(counterpart.id.clone()),
                    counterpart.display_name.clone(),
                ),
            );
            order.push(channel);
        }
        (summaries, order)
    }

    fn fail(&mut self, error: ConversationError) -> ConversationError {
        self.summaries.clear();
        self.order.clear();
        self.live = LiveStatus::Idle;
        self.state = AggregatorState::Failed(error.clone());
        error
    }

    fn apply_received(&mut self, received: Result<Message, SubscriptionLost>) -> AggregatorUpdate {
        match received {
            Ok(message) => self.apply_message(message),
            Err(lost) => {
                tracing::warn!(
                    target: "aula_messaging::thread_aggregator",
                    "Live updates paused for {}: {}",
                    self.supervisor,
                    lost
                );
                if let Some(mut subscription) = self.subscription.take() {
                    subscription.cancel();
                }
                self.live = LiveStatus::Paused;
                AggregatorUpdate::LivePaused(ConversationError::SubscriptionLost(lost.to_string()))
            }
        }
    }

    fn apply_message(&mut self, message: Message) -> AggregatorUpdate {
        let Some(summary) = self.summaries.get_mut(&message.channel) else {
            tracing::debug!(
                target: "aula_messaging::thread_aggregator",
                "Ignoring message on unlisted channel {}",
                message.channel
            );
            return AggregatorUpdate::UnknownChannel(message.channel);
        };

        if !summary.record(&message, self.config.preview_chars) {
            return AggregatorUpdate::Unchanged(message.channel);
        }
        if message.sender != self.supervisor && self.selected.as_ref() != Some(&message.channel) {
            summary.unread_count += 1;
        }

        sort_summaries(&mut self.order, &self.summaries, &self.config.general_channel);
        AggregatorUpdate::SummaryUpdated(message.channel)
    }
}

impl std::fmt::Debug for ThreadAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadAggregator")
            .field("supervisor", &self.supervisor)
            .field("state", &self.state)
            .field("live", &self.live)
            .field("summaries", &self.order.len())
            .field("selected", &self.selected)
            .finish()
    }
}
