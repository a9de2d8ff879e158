//! K-way merge of already available, time-ordered message streams.
//!
//! Unlike [`MergingCollection`](super::MergingCollection) this works on plain
//! iterators, e.g. the per-source outputs of a postprocessor. A source is
//! dropped as soon as it is exhausted, and dropping the merge drops every
//! source still pending, so any resource held by a source is released even
//! when the consumer stops early.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

use crate::message::Timestamped;

/// Merge `sources` into one ascending-time stream. Ties keep source order.
pub fn merge_by_time<I>(sources: impl IntoIterator<Item = I>) -> MergeByTime<I>
where
    I: Iterator,
    I::Item: Timestamped,
{
    let mut heap = BinaryHeap::new();
    for (ordinal, mut rest) in sources.into_iter().enumerate() {
        if let Some(item) = rest.next() {
            heap.push(Head::new(item.timestamp(), ordinal, item, rest));
        }
    }
    MergeByTime { heap }
}

/// Like [`merge_by_time`] for fallible sources.
///
/// The first error is yielded as-is and ends the merge; all sources are
/// dropped at that point.
pub fn try_merge_by_time<I, T, E>(sources: impl IntoIterator<Item = I>) -> TryMergeByTime<I, T, E>
where
    I: Iterator<Item = Result<T, E>>,
    T: Timestamped,
{
    TryMergeByTime {
        unseeded: Some(sources.into_iter().collect()),
        heap: BinaryHeap::new(),
        pending_error: None,
    }
}

struct Head<I, T> {
    time: DateTime<Utc>,
    ordinal: usize,
    item: T,
    rest: I,
}

impl<I, T> Head<I, T> {
    fn new(time: DateTime<Utc>, ordinal: usize, item: T, rest: I) -> Self {
        Self {
            time,
            ordinal,
            item,
            rest,
        }
    }
}

impl<I, T> Ord for Head<I, T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (other.time, other.ordinal).cmp(&(self.time, self.ordinal))
    }
}

impl<I, T> PartialOrd for Head<I, T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<I, T> PartialEq for Head<I, T> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl<I, T> Eq for Head<I, T> {}

pub struct MergeByTime<I: Iterator> {
    heap: BinaryHeap<Head<I, I::Item>>,
}

impl<I: Iterator> MergeByTime<I> {
    /// Number of sources not yet exhausted.
    pub fn live_sources(&self) -> usize {
        self.heap.len()
    }
}

impl<I> Iterator for MergeByTime<I>
where
    I: Iterator,
    I::Item: Timestamped,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        let head = self.heap.pop()?;
        let Head {
            ordinal,
            item,
            mut rest,
            ..
        } = head;
        if let Some(next) = rest.next() {
            self.heap.push(Head::new(next.timestamp(), ordinal, next, rest));
        }
        Some(item)
    }
}

pub struct TryMergeByTime<I, T, E> {
    unseeded: Option<Vec<I>>,
    heap: BinaryHeap<Head<I, T>>,
    /// Error met while advancing a source, reported after the item popped with it
    pending_error: Option<E>,
}

impl<I, T, E> TryMergeByTime<I, T, E> {
    /// Number of sources not yet exhausted.
    pub fn live_sources(&self) -> usize {
        self.unseeded.as_ref().map_or(0, Vec::len) + self.heap.len()
    }

    fn abort(&mut self) {
        self.unseeded = None;
        self.heap.clear();
    }
}

impl<I, T, E> Iterator for TryMergeByTime<I, T, E>
where
    I: Iterator<Item = Result<T, E>>,
    T: Timestamped,
{
    type Item = Result<T, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.pending_error.take() {
            return Some(Err(err));
        }

        if let Some(sources) = self.unseeded.take() {
            for (ordinal, mut rest) in sources.into_iter().enumerate() {
                match rest.next() {
                    Some(Ok(item)) => self.heap.push(Head::new(item.timestamp(), ordinal, item, rest)),
                    Some(Err(err)) => {
                        self.abort();
                        return Some(Err(err));
                    }
                    None => {}
                }
            }
        }

        let Head {
            ordinal,
            item,
            mut rest,
            ..
        } = self.heap.pop()?;
        match rest.next() {
            Some(Ok(next)) => self.heap.push(Head::new(next.timestamp(), ordinal, next, rest)),
            Some(Err(err)) => {
                drop(rest);
                self.abort();
                self.pending_error = Some(err);
            }
            None => {}
        }
        Some(Ok(item))
    }
}
