//! Bounded record of sent messages.
//!
//! The server reports undeliverable messages by id only, so the signaling
//! engine keeps the most recent sends around to find out who the recipient
//! was.

use std::collections::{HashMap, VecDeque};

use crate::nonce::MessageId;

/// Default number of sent messages remembered per connection.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Fixed-capacity FIFO map from [`MessageId`] to a sent message.
#[derive(Debug, Clone)]
pub struct MessageHistory<T> {
    capacity: usize,
    order: VecDeque<MessageId>,
    entries: HashMap<MessageId, T>,
}

impl<T> MessageHistory<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            entries: HashMap::with_capacity(capacity),
        }
    }

    /// Remember `message` under `id`.
    ///
    /// An existing entry with the same id is overwritten and keeps its
    /// position. Otherwise the oldest entry is evicted when full.
    pub fn store(&mut self, id: MessageId, message: T) {
        if self.capacity == 0 {
            return;
        }

        if let Some(existing) = self.entries.get_mut(&id) {
            *existing = message;
            return;
        }

        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }

        self.order.push_back(id);
        self.entries.insert(id, message);
    }

    pub fn find(&self, id: &MessageId) -> Option<&T> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.order.clear();
        self.entries.clear();
    }
}

impl<T> Default for MessageHistory<T> {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
