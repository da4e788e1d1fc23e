use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use crate::messaging::message_store::{Message, MessageId};

/// Position of a message: creation time, then arrival order.
type OrderKey = (DateTime<Utc>, u64);

/// A conversation's messages as a set keyed by id, ordered by `created_at`.
///
/// Inserting a message that is already present is a no-op, so repeated
/// delivery of the same message can never duplicate it.
#[derive(Debug, Default)]
pub(crate) struct MessageTimeline {
    ordered: BTreeMap<OrderKey, Message>,
    positions: HashMap<MessageId, OrderKey>,
    next_arrival: u64,
}

impl MessageTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a message. Returns false if one with the same id was already present.
    pub fn insert(&mut self, message: Message) -> bool {
        if self.positions.contains_key(&message.id) {
            return false;
        }
        let key = (message.created_at, self.next_arrival);
        self.next_arrival += 1;
        self.positions.insert(message.id.clone(), key);
        self.ordered.insert(key, message);
        true
    }

    /// Inserts every message, in the given order. Returns how many were new.
    pub fn extend(&mut self, messages: impl IntoIterator<Item = Message>) -> usize {
        messages
            .into_iter()
            .map(|message| self.insert(message))
            .filter(|inserted| *inserted)
            .count()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Message> {
        self.ordered.values()
    }

    pub fn last(&self) -> Option<&Message> {
        self.ordered.values().next_back()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn clear(&mut self) {
        self.ordered.clear();
        self.positions.clear();
        self.next_arrival = 0;
    }
}
