//! In-process realtime bus backed by broadcast channels.
//!
//! Subscriptions with the same filter share one broadcast sender, created
//! lazily on subscribe and removed once all of its receivers are gone.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::RealtimeBus;
use super::types::Subscription;
use crate::messaging::channels::ChannelFilter;
use crate::messaging::message_store::Message;

const BUFFER_SIZE: usize = 100;

pub struct MessageBus {
    streams: Arc<DashMap<ChannelFilter, broadcast::Sender<Message>>>,
    buffer_size: usize,
}

impl MessageBus {
    pub fn new() -> Self {
        Self::with_buffer_size(BUFFER_SIZE)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            streams: Arc::new(DashMap::new()),
            buffer_size: buffer_size.max(1),
        }
    }

    /// Delivers `message` to every subscription whose filter matches its
    /// channel. Returns the number of filters it was delivered to.
    pub fn emit(&self, message: &Message) -> usize {
        let mut delivered = 0;
        self.streams.retain(|filter, sender| {
            if !filter.matches(&message.channel) {
                return true;
            }
            match sender.send(message.clone()) {
                Ok(_) => {
                    delivered += 1;
                    true
                }
                // All receivers dropped, clean up
                Err(_) => sender.receiver_count() > 0,
            }
        });
        delivered
    }

    /// Number of open subscription handles across all filters.
    pub fn active_subscriptions(&self) -> usize {
        self.streams
            .iter()
            .map(|entry| entry.value().receiver_count())
            .sum()
    }
}

impl RealtimeBus for MessageBus {
    fn subscribe(&self, filter: ChannelFilter) -> Subscription {
        let receiver = self
            .streams
            .entry(filter.clone())
            .or_insert_with(|| broadcast::channel(self.buffer_size).0)
            .subscribe();

        tracing::debug!(
            target: "aula_messaging::message_streaming",
            "Opened subscription for {:?}",
            filter
        );

        let streams = Arc::downgrade(&self.streams);
        let key = filter.clone();
        Subscription::new(filter, receiver, move || {
            if let Some(streams) = streams.upgrade() {
                streams.remove_if(&key, |_, sender| sender.receiver_count() == 0);
            }
            tracing::debug!(
                target: "aula_messaging::message_streaming",
                "Released subscription for {:?}",
                key
            );
        })
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
