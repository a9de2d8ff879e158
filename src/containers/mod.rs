//! In-memory containers for log messages.
//!
//! Provides the uniform read contract [`MessagesCollection`] and its
//! implementations:
//! - [`Chunk`]: fixed-capacity leaf storage
//! - [`MessagesRange`]: a chain of chunks covering one position span
//! - [`RangesManagingCollection`]: a set of ranges reshaped by an active window
//! - [`SimpleMergingCollection`]: a chronological merge of several collections
//!
//! None of the containers are internally synchronised. A traversal borrows the
//! container it walks, so the borrow checker rules out trimming or splicing
//! the same container while a `forward`/`reverse` sequence is alive.

pub mod chunk;
pub mod concat;
pub mod merge;
pub mod merging;
pub mod position;
pub mod range;
pub mod ranges;

pub use chunk::{CHUNK_CAPACITY, Chunk};
pub use concat::ConcatenatingCollection;
pub use merging::{MergingCollection, MergingCollectionEntry, SimpleMergingCollection};
pub use position::PositionRange;
pub use range::{AddOutcome, MessagesRange, RangeFill, RangeHost, RangeId};
pub use ranges::RangesManagingCollection;

use std::ops::Range;

use crate::message::IndexedMessage;

/// Lazily produced, finite sequence of indexed messages.
pub type MessagesIter<'a> = Box<dyn Iterator<Item = IndexedMessage<'a>> + 'a>;

/// Read contract shared by every container.
///
/// `forward(begin, end)` walks indices `begin..end` upwards. `reverse(begin, end)`
/// walks from `begin` down to, but excluding, `end`; `-1` stands for "before the
/// first element". Bounds are clamped into the collection, and every call replays
/// the sequence from scratch.
pub trait MessagesCollection {
    fn count(&self) -> usize;

    fn forward(&self, begin: usize, end: usize) -> MessagesIter<'_>;

    fn reverse(&self, begin: isize, end: isize) -> MessagesIter<'_>;

    fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

/// Clamp forward bounds into `0..count`.
pub(crate) fn clamp_forward(count: usize, begin: usize, end: usize) -> Range<usize> {
    let begin = begin.min(count);
    let end = end.clamp(begin, count);
    begin..end
}

/// Clamp reverse bounds and return the ascending index span they cover.
pub(crate) fn clamp_reverse(count: usize, begin: isize, end: isize) -> Range<usize> {
    let last = count as isize - 1;
    let begin = begin.clamp(-1, last);
    let end = end.clamp(-1, begin);
    ((end + 1) as usize)..((begin + 1) as usize)
}

#[cfg(test)]
pub(crate) mod test_utils {
    use std::sync::Arc;

    use super::*;
    use crate::message::Message;

    /// Plain vector-backed collection for exercising merges and concatenation.
    pub struct VecCollection(pub Vec<Arc<Message>>);

    impl MessagesCollection for VecCollection {
        fn count(&self) -> usize {
            self.0.len()
        }

        fn forward(&self, begin: usize, end: usize) -> MessagesIter<'_> {
            let span = clamp_forward(self.0.len(), begin, end);
            let start = span.start;
            Box::new(
                self.0[span]
                    .iter()
                    .enumerate()
                    .map(move |(i, m)| IndexedMessage::new(start + i, m)),
            )
        }

        fn reverse(&self, begin: isize, end: isize) -> MessagesIter<'_> {
            let span = clamp_reverse(self.0.len(), begin, end);
            let start = span.start;
            Box::new(
                self.0[span]
                    .iter()
                    .enumerate()
                    .rev()
                    .map(move |(i, m)| IndexedMessage::new(start + i, m)),
            )
        }
    }

    pub fn positions(iter: MessagesIter<'_>) -> Vec<u64> {
        iter.map(|m| m.message.position).collect()
    }

    pub fn indices(iter: MessagesIter<'_>) -> Vec<usize> {
        iter.map(|m| m.index).collect()
    }
}
