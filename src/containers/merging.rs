//! Online merge-by-timestamp over several independently ordered collections.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::{MessagesCollection, MessagesIter, clamp_forward, clamp_reverse};
use crate::message::IndexedMessage;

/// A merged message plus where it came from.
#[derive(Clone, Copy, Debug)]
pub struct MergingCollectionEntry<'a> {
    /// The message, indexed in the merged sequence
    pub message: IndexedMessage<'a>,
    /// Ordinal of the source collection in [`MergingCollection::sources`]
    pub source: usize,
    /// Index of the message inside its source collection
    pub source_index: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Direction {
    Forward,
    Reverse,
}

/// A chronological view over several message collections.
///
/// Implementors supply the sources; the merge itself is provided. `lock` and
/// `unlock` bracket every merge pass: `lock` runs before the sources are
/// queried and `unlock` when the returned sequence is dropped. They do nothing
/// by default.
pub trait MergingCollection {
    fn sources(&self) -> Vec<&dyn MessagesCollection>;

    fn lock(&self) {}

    fn unlock(&self) {}

    fn merged_count(&self) -> usize {
        self.sources().iter().map(|s| s.count()).sum()
    }

    /// Entries `begin..end` of the merged sequence in ascending time order.
    fn forward_entries(&self, begin: usize, end: usize) -> MergedEntries<'_, Self> {
        MergedEntries::new(self, Direction::Forward, |total| {
            let span = clamp_forward(total, begin, end);
            (span.start, span.end)
        })
    }

    /// Entries from `begin` down to, but excluding, `end` in descending time order.
    fn reverse_entries(&self, begin: isize, end: isize) -> MergedEntries<'_, Self> {
        MergedEntries::new(self, Direction::Reverse, |total| {
            let span = clamp_reverse(total, begin, end);
            (span.start, span.end)
        })
    }
}

/// One source's position in a multi-source merge, keyed by its current head.
struct Cursor<'a> {
    source: usize,
    head: IndexedMessage<'a>,
    rest: MessagesIter<'a>,
    direction: Direction,
}

impl Cursor<'_> {
    fn key(&self) -> (chrono::DateTime<chrono::Utc>, usize, usize) {
        (self.head.message.time, self.source, self.head.index)
    }
}

impl Ord for Cursor<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the greatest element: invert for ascending order.
        match self.direction {
            Direction::Forward => other.key().cmp(&self.key()),
            Direction::Reverse => self.key().cmp(&other.key()),
        }
    }
}

impl PartialOrd for Cursor<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Cursor<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cursor<'_> {}

/// How a merge pass produces its elements.
enum MergePlan<'a> {
    /// One input: its own windowed traversal, no queue.
    Single { source: usize, iter: MessagesIter<'a> },
    /// Several inputs: priority queue of cursors; `skip` elements precede the window.
    Multi {
        heap: BinaryHeap<Cursor<'a>>,
        skip: usize,
    },
}

impl<'a> MergePlan<'a> {
    fn build(
        sources: Vec<&'a dyn MessagesCollection>,
        direction: Direction,
        total: usize,
        (lo, hi): (usize, usize),
    ) -> Self {
        let mut non_empty: Vec<(usize, &'a dyn MessagesCollection)> = sources
            .into_iter()
            .enumerate()
            .filter(|(_, s)| s.count() > 0)
            .collect();

        if non_empty.len() == 1 {
            let (source, collection) = non_empty.remove(0);
            let iter = match direction {
                Direction::Forward => collection.forward(lo, hi),
                Direction::Reverse => collection.reverse(hi as isize - 1, lo as isize - 1),
            };
            return MergePlan::Single { source, iter };
        }

        let mut heap = BinaryHeap::with_capacity(non_empty.len());
        for (source, collection) in non_empty {
            let mut rest = match direction {
                Direction::Forward => collection.forward(0, usize::MAX),
                Direction::Reverse => collection.reverse(isize::MAX, -1),
            };
            if let Some(head) = rest.next() {
                heap.push(Cursor {
                    source,
                    head,
                    rest,
                    direction,
                });
            }
        }
        let skip = match direction {
            Direction::Forward => lo,
            Direction::Reverse => total - hi,
        };
        MergePlan::Multi { heap, skip }
    }

    fn next(&mut self) -> Option<(usize, IndexedMessage<'a>)> {
        match self {
            MergePlan::Single { source, iter } => iter.next().map(|m| (*source, m)),
            MergePlan::Multi { heap, skip } => {
                while *skip > 0 {
                    pop_cursor(heap)?;
                    *skip -= 1;
                }
                pop_cursor(heap)
            }
        }
    }
}

fn pop_cursor<'a>(heap: &mut BinaryHeap<Cursor<'a>>) -> Option<(usize, IndexedMessage<'a>)> {
    let mut cursor = heap.pop()?;
    let source = cursor.source;
    let head = cursor.head;
    if let Some(next) = cursor.rest.next() {
        cursor.head = next;
        heap.push(cursor);
    }
    Some((source, head))
}

/// A lazily merged window of a [`MergingCollection`].
///
/// Holds the collection's lock for as long as it is alive.
pub struct MergedEntries<'a, C: MergingCollection + ?Sized> {
    owner: &'a C,
    plan: MergePlan<'a>,
    direction: Direction,
    next_index: usize,
    remaining: usize,
}

impl<'a, C: MergingCollection + ?Sized> MergedEntries<'a, C> {
    fn new(owner: &'a C, direction: Direction, window: impl FnOnce(usize) -> (usize, usize)) -> Self {
        owner.lock();
        let sources = owner.sources();
        let total = sources.iter().map(|s| s.count()).sum();
        let (lo, hi) = window(total);
        let next_index = match direction {
            Direction::Forward => lo,
            Direction::Reverse => hi.saturating_sub(1),
        };
        Self {
            owner,
            plan: MergePlan::build(sources, direction, total, (lo, hi)),
            direction,
            next_index,
            remaining: hi - lo,
        }
    }
}

impl<'a, C: MergingCollection + ?Sized> Iterator for MergedEntries<'a, C> {
    type Item = MergingCollectionEntry<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let (source, message) = self.plan.next()?;
        let index = self.next_index;
        self.remaining -= 1;
        self.next_index = match self.direction {
            Direction::Forward => index + 1,
            Direction::Reverse => index.saturating_sub(1),
        };
        Some(MergingCollectionEntry {
            message: message.reindexed(index),
            source,
            source_index: message.index,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

impl<C: MergingCollection + ?Sized> Drop for MergedEntries<'_, C> {
    fn drop(&mut self) {
        self.owner.unlock();
    }
}

/// Merging collection over an explicit list of borrowed sources.
pub struct SimpleMergingCollection<'a> {
    sources: Vec<&'a dyn MessagesCollection>,
}

impl<'a> SimpleMergingCollection<'a> {
    pub fn new(sources: Vec<&'a dyn MessagesCollection>) -> Self {
        Self { sources }
    }
}

impl MergingCollection for SimpleMergingCollection<'_> {
    fn sources(&self) -> Vec<&dyn MessagesCollection> {
        self.sources.clone()
    }
}

impl MessagesCollection for SimpleMergingCollection<'_> {
    fn count(&self) -> usize {
        self.merged_count()
    }

    fn forward(&self, begin: usize, end: usize) -> MessagesIter<'_> {
        Box::new(self.forward_entries(begin, end).map(|e| e.message))
    }

    fn reverse(&self, begin: isize, end: isize) -> MessagesIter<'_> {
        Box::new(self.reverse_entries(begin, end).map(|e| e.message))
    }
}
