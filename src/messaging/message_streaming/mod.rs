//! Message Streaming Module
//!
//! Realtime delivery of newly inserted messages to subscribers, as they are
//! persisted, without polling. Delivery is at-least-once from the consumer's
//! point of view; consumers dedup by message id.

mod manager;
mod types;

pub use manager::MessageBus;
pub use types::{LiveStatus, Subscription, SubscriptionLost};

use crate::messaging::channels::ChannelFilter;

/// Push delivery of inserts matching a filter.
pub trait RealtimeBus: Send + Sync {
    /// Opens a subscription. The caller owns the handle and must cancel or
    /// drop it when it stops caring about the filter.
    fn subscribe(&self, filter: ChannelFilter) -> Subscription;
}
