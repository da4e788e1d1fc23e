//! Types for the realtime message bus.
//!
//! A [`Subscription`] is an owned handle: whoever opens it releases it, either
//! explicitly with [`Subscription::cancel`] or by dropping it.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::messaging::channels::ChannelFilter;
use crate::messaging::message_store::Message;

type Release = Box<dyn FnOnce() + Send + Sync>;

/// Why a subscription stopped delivering.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionLost {
    /// The receiver fell behind and the bus discarded updates for it.
    #[error("missed {0} live updates")]
    Lagged(u64),

    /// The bus side of the subscription went away.
    #[error("realtime bus closed the subscription")]
    Closed,

    /// The handle was already cancelled by its owner.
    #[error("subscription was cancelled")]
    Cancelled,
}

/// Whether a component is currently receiving live updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LiveStatus {
    /// No subscription is open (not loaded yet, or closed).
    Idle,

    /// Updates are flowing.
    Live,

    /// The subscription was lost; the view should show "live updates paused".
    Paused,
}

/// A cancellable subscription to inserts matching a [`ChannelFilter`].
pub struct Subscription {
    filter: ChannelFilter,
    updates: Option<broadcast::Receiver<Message>>,
    release: Option<Release>,
}

impl Subscription {
    pub fn new(
        filter: ChannelFilter,
        updates: broadcast::Receiver<Message>,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            filter,
            updates: Some(updates),
            release: Some(Box::new(release)),
        }
    }

    pub fn filter(&self) -> &ChannelFilter {
        &self.filter
    }

    pub fn is_active(&self) -> bool {
        self.updates.is_some()
    }

    /// Waits for the next matching insert.
    pub async fn recv(&mut self) -> Result<Message, SubscriptionLost> {
        let Some(updates) = self.updates.as_mut() else {
            return Err(SubscriptionLost::Cancelled);
        };
        match updates.recv().await {
            Ok(message) => Ok(message),
            Err(RecvError::Lagged(missed)) => Err(SubscriptionLost::Lagged(missed)),
            Err(RecvError::Closed) => Err(SubscriptionLost::Closed),
        }
    }

    /// Returns an already-delivered insert without waiting, if there is one.
    pub fn try_recv(&mut self) -> Option<Result<Message, SubscriptionLost>> {
        let Some(updates) = self.updates.as_mut() else {
            return Some(Err(SubscriptionLost::Cancelled));
        };
        match updates.try_recv() {
            Ok(message) => Some(Ok(message)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Lagged(missed)) => Some(Err(SubscriptionLost::Lagged(missed))),
            Err(TryRecvError::Closed) => Some(Err(SubscriptionLost::Closed)),
        }
    }

    /// Stops delivery and releases the bus side. Idempotent.
    pub fn cancel(&mut self) {
        // Receiver must be gone before release checks the receiver count.
        drop(self.updates.take());
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("filter", &self.filter)
            .field("active", &self.is_active())
            .finish()
    }
}
