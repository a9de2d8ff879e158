//! The message record consumed by the containers.
//!
//! Messages are produced by an upstream provider and shared with the
//! containers through `Arc`, so a container never owns message content.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// A single log message as delivered by a provider.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Offset of the message within its source; non-decreasing per feed
    pub position: u64,
    /// Timestamp used for chronological ordering
    pub time: DateTime<Utc>,
    /// Raw message text
    pub text: String,
}

impl Message {
    pub fn new(position: u64, time: DateTime<Utc>, text: impl Into<String>) -> Self {
        Self {
            position,
            time,
            text: text.into(),
        }
    }

    /// Wrap into the shared handle the containers store.
    pub fn shared(self) -> Arc<Message> {
        Arc::new(self)
    }

    /// Hash of the message content used for tail-overwrite comparison.
    ///
    /// The position is never part of the hash: two deliveries are compared
    /// only when they share a position.
    pub fn content_hash(&self, ignore_time: bool) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.text.hash(&mut hasher);
        if !ignore_time {
            self.time.hash(&mut hasher);
        }
        hasher.finish()
    }
}

/// Anything that can be placed on a timeline.
pub trait Timestamped {
    fn timestamp(&self) -> DateTime<Utc>;
}

impl Timestamped for Message {
    fn timestamp(&self) -> DateTime<Utc> {
        self.time
    }
}

impl<T: Timestamped + ?Sized> Timestamped for &T {
    fn timestamp(&self) -> DateTime<Utc> {
        (**self).timestamp()
    }
}

impl<T: Timestamped + ?Sized> Timestamped for Arc<T> {
    fn timestamp(&self) -> DateTime<Utc> {
        (**self).timestamp()
    }
}

/// A message projected together with its index in some collection.
///
/// Produced by traversal, never stored.
#[derive(Clone, Copy, Debug)]
pub struct IndexedMessage<'a> {
    pub index: usize,
    pub message: &'a Arc<Message>,
}

impl<'a> IndexedMessage<'a> {
    pub fn new(index: usize, message: &'a Arc<Message>) -> Self {
        Self { index, message }
    }

    /// Same message, shifted into another index space.
    pub fn reindexed(self, index: usize) -> Self {
        Self { index, ..self }
    }
}

impl Timestamped for IndexedMessage<'_> {
    fn timestamp(&self) -> DateTime<Utc> {
        self.message.time
    }
}
