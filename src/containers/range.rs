//! A contiguous, partially loadable span of a source held as a chain of chunks.
//!
//! A range goes through `open -> add* -> complete -> close`. Only an open range
//! accepts messages; trimming, splicing and re-prioritising require it closed.
//! When a range is managed by a [`RangeHost`], it is filled through a
//! [`RangeFill`] lease and closing the lease hands control back to the host.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{trace, warn};

use super::chunk::{ChunkArena, ChunkId};
use super::concat::ConcatenatingCollection;
use super::position::PositionRange;
use super::{Chunk, MessagesCollection, MessagesIter};
use crate::error::{ContainerError, Result};
use crate::message::Message;

static NEXT_RANGE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`MessagesRange`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RangeId(u64);

impl RangeId {
    fn next() -> Self {
        Self(NEXT_RANGE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Which branch `MessagesRange::add` took.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AddOutcome {
    /// Stored as a new last message
    Appended,
    /// Same position as the last message, different content: replaced in place
    Replaced,
    /// Same position and content as the last message
    Unchanged,
    /// Before the last read position or past the desirable end
    Ignored,
}

#[derive(Debug)]
pub struct MessagesRange {
    id: RangeId,
    arena: ChunkArena,
    first: Option<ChunkId>,
    last: Option<ChunkId>,
    desirable: PositionRange,
    last_read_position: u64,
    is_complete: bool,
    is_open: bool,
}

impl MessagesRange {
    /// A closed, empty range that wants to cover `desirable`.
    pub fn new(desirable: PositionRange) -> Self {
        Self {
            id: RangeId::next(),
            arena: ChunkArena::new(),
            first: None,
            last: None,
            desirable,
            last_read_position: desirable.begin,
            is_complete: false,
            is_open: false,
        }
    }

    pub fn id(&self) -> RangeId {
        self.id
    }

    pub fn desirable_range(&self) -> PositionRange {
        self.desirable
    }

    pub fn priority(&self) -> i32 {
        self.desirable.priority
    }

    pub fn is_complete(&self) -> bool {
        self.is_complete
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Position of the last message read so far, `begin` before the first read.
    pub fn last_read_position(&self) -> u64 {
        self.last_read_position
    }

    /// `[begin, last read position)` until complete, then the desirable range.
    pub fn loaded_range(&self) -> PositionRange {
        if self.is_complete {
            self.desirable
        } else {
            PositionRange::new(
                self.desirable.begin,
                self.last_read_position,
                self.desirable.priority,
            )
        }
    }

    /// Whether anything at all was read into this range.
    pub fn has_loaded(&self) -> bool {
        self.is_complete || self.first.is_some() || self.last_read_position > self.desirable.begin
    }

    pub fn chunks_count(&self) -> usize {
        self.arena.len()
    }

    pub fn first_message(&self) -> Option<&Arc<Message>> {
        self.first
            .and_then(|id| self.arena.get(id))
            .and_then(Chunk::first)
    }

    pub fn last_message(&self) -> Option<&Arc<Message>> {
        self.last.and_then(|id| self.arena.get(id)).and_then(Chunk::last)
    }

    pub fn open(&mut self) -> Result<()> {
        if self.is_open {
            return Err(ContainerError::InvalidState("range is already open"));
        }
        self.is_open = true;
        Ok(())
    }

    /// Close the range without involving a host.
    pub fn close(&mut self) -> Result<()> {
        if !self.is_open {
            return Err(ContainerError::InvalidState("range is not open"));
        }
        self.is_open = false;
        Ok(())
    }

    /// Store the next message of the feed.
    ///
    /// A message at the last read position is a re-delivery of the tail: it
    /// replaces the stored message only when its content hash differs.
    pub fn add(&mut self, message: Arc<Message>, ignore_message_time_for_hash: bool) -> Result<AddOutcome> {
        if !self.is_open {
            return Err(ContainerError::InvalidState("add to a range that is not open"));
        }
        if self.is_complete {
            return Err(ContainerError::InvalidState("add to a complete range"));
        }

        let position = message.position;
        if position < self.last_read_position || position >= self.desirable.end {
            trace!(position, last_read = self.last_read_position, "ignoring message outside of the unread span");
            return Ok(AddOutcome::Ignored);
        }

        if let Some(last) = self.last_message().filter(|m| m.position == position) {
            if last.content_hash(ignore_message_time_for_hash)
                == message.content_hash(ignore_message_time_for_hash)
            {
                return Ok(AddOutcome::Unchanged);
            }
            trace!(position, "overwriting re-delivered tail message");
            let tail = self.tail_chunk_mut()?;
            tail.set_last(message)?;
            return Ok(AddOutcome::Replaced);
        }

        if let Some(last) = self.last_message() {
            if message.time < last.time {
                return Err(ContainerError::TimeConstraint {
                    last: Arc::clone(last),
                    offending: message,
                });
            }
        }

        let needs_chunk = match self.last.and_then(|id| self.arena.get(id)) {
            Some(chunk) => chunk.is_full(),
            None => true,
        };
        if needs_chunk {
            let id = self.arena.push_after(self.last);
            self.first.get_or_insert(id);
            self.last = Some(id);
        }
        self.tail_chunk_mut()?.add(message)?;
        self.last_read_position = position;
        Ok(AddOutcome::Appended)
    }

    /// Mark the whole desirable range as read. Only valid while open.
    pub fn complete(&mut self) -> Result<()> {
        if !self.is_open {
            return Err(ContainerError::InvalidState("complete on a range that is not open"));
        }
        self.is_complete = true;
        Ok(())
    }

    pub fn set_priority(&mut self, priority: i32) -> Result<()> {
        if self.is_open {
            return Err(ContainerError::InvalidState("cannot change the priority of an open range"));
        }
        self.desirable.priority = priority;
        Ok(())
    }

    /// Move the desirable begin to `new_begin`, dropping messages before it.
    pub fn trim_left(&mut self, new_begin: u64) -> Result<()> {
        self.check_trim(new_begin)?;

        while let Some(id) = self.first {
            let Some(chunk) = self.arena.get_mut(id) else {
                break;
            };
            let keep_from = chunk.lower_bound(new_begin);
            if keep_from < chunk.size() {
                chunk.trim_left(keep_from);
                break;
            }
            let (_, next) = self.arena.remove(id);
            self.first = next;
        }
        if self.first.is_none() {
            self.last = None;
        }

        self.desirable.begin = new_begin;
        self.last_read_position = self.last_read_position.max(new_begin);
        self.check_integrity();
        Ok(())
    }

    /// Move the desirable end to `new_end`, dropping messages at or after it.
    ///
    /// A range that already read up to `new_end` becomes complete.
    pub fn trim_right(&mut self, new_end: u64) -> Result<()> {
        self.check_trim(new_end)?;

        while let Some(id) = self.last {
            let Some(chunk) = self.arena.get_mut(id) else {
                break;
            };
            let keep_to = chunk.lower_bound(new_end);
            if keep_to > 0 {
                chunk.trim_right(keep_to);
                break;
            }
            let (prev, _) = self.arena.remove(id);
            self.last = prev;
        }
        if self.last.is_none() {
            self.first = None;
        }

        self.desirable.end = new_end;
        if !self.is_complete && self.last_read_position >= new_end {
            self.is_complete = true;
        }
        self.last_read_position = self.last_read_position.min(new_end);
        self.check_integrity();
        Ok(())
    }

    /// Splice `other`, which must directly follow this range, onto the tail.
    ///
    /// When this range is complete the result takes over the fill state and
    /// priority of `other`; otherwise `other` must not have loaded anything.
    pub fn append_to_end(&mut self, mut other: MessagesRange) -> Result<()> {
        if self.is_open || other.is_open {
            return Err(ContainerError::InvalidState("cannot splice an open range"));
        }
        if other.desirable.begin != self.desirable.end {
            return Err(ContainerError::InvalidState("spliced range does not follow this range"));
        }
        if !self.is_complete && other.has_loaded() {
            return Err(ContainerError::InvalidState("cannot splice loaded messages after an incomplete range"));
        }
        if let (Some(mine), Some(theirs)) = (self.last_message(), other.first_message()) {
            debug_assert!(mine.time <= theirs.time, "spliced ranges are out of time order");
        }

        if let Some((head, tail)) = self.arena.adopt_chain(self.last, &mut other.arena, other.first) {
            self.first.get_or_insert(head);
            self.last = Some(tail);
        }
        self.desirable.end = other.desirable.end;
        if self.is_complete {
            self.is_complete = other.is_complete;
            self.last_read_position = other.last_read_position;
            self.desirable.priority = other.desirable.priority;
        }
        self.check_integrity();
        Ok(())
    }

    fn check_trim(&self, bound: u64) -> Result<()> {
        if self.is_open {
            return Err(ContainerError::InvalidState("cannot trim an open range"));
        }
        if !self.desirable.contains_bound(bound) {
            return Err(ContainerError::OutOfRange {
                value: bound,
                begin: self.desirable.begin,
                end: self.desirable.end,
            });
        }
        Ok(())
    }

    fn tail_chunk_mut(&mut self) -> Result<&mut Chunk> {
        self.last
            .and_then(|id| self.arena.get_mut(id))
            .ok_or(ContainerError::InvalidState("range has no tail chunk"))
    }

    #[cfg(debug_assertions)]
    pub(crate) fn check_integrity(&self) {
        let forward: Vec<ChunkId> = self.arena.iter_from(self.first).map(|(id, _)| id).collect();
        let mut backward: Vec<ChunkId> = self.arena.iter_back_from(self.last).map(|(id, _)| id).collect();
        backward.reverse();
        debug_assert_eq!(forward, backward, "chunk chain links disagree");
        debug_assert_eq!(forward.len(), self.arena.len(), "unreachable chunks in arena");

        let mut prev: Option<&Arc<Message>> = None;
        for m in self.concat_forward(0, usize::MAX) {
            let m = m.message;
            debug_assert!(
                self.desirable.begin <= m.position && m.position < self.desirable.end,
                "message at {} outside of [{}, {})",
                m.position,
                self.desirable.begin,
                self.desirable.end
            );
            if let Some(p) = prev {
                debug_assert!(p.position <= m.position && p.time <= m.time, "messages out of order");
            }
            prev = Some(m);
        }
    }

    #[cfg(not(debug_assertions))]
    pub(crate) fn check_integrity(&self) {}
}

impl ConcatenatingCollection for MessagesRange {
    type Part = Chunk;

    fn parts(&self) -> Vec<&Chunk> {
        self.arena.iter_from(self.first).map(|(_, c)| c).collect()
    }

    fn parts_reversed(&self) -> Vec<&Chunk> {
        self.arena.iter_back_from(self.last).map(|(_, c)| c).collect()
    }
}

impl MessagesCollection for MessagesRange {
    fn count(&self) -> usize {
        self.concat_count()
    }

    fn forward(&self, begin: usize, end: usize) -> MessagesIter<'_> {
        self.concat_forward(begin, end)
    }

    fn reverse(&self, begin: isize, end: isize) -> MessagesIter<'_> {
        self.concat_reverse(begin, end)
    }
}

/// The owner a [`RangeFill`] reports back to when filling is over.
pub trait RangeHost {
    fn range(&self, id: RangeId) -> Option<&MessagesRange>;

    fn range_mut(&mut self, id: RangeId) -> Option<&mut MessagesRange>;

    /// Called exactly once when a lease on `id` ends; closes the range.
    fn dispose_range(&mut self, id: RangeId) -> Result<()>;
}

/// Exclusive lease on an open range of a [`RangeHost`].
///
/// Dropping the lease disposes it; call [`RangeFill::dispose`] to observe the
/// host's result instead.
pub struct RangeFill<'h, H: RangeHost + ?Sized> {
    host: &'h mut H,
    id: RangeId,
    disposed: bool,
}

impl<'h, H: RangeHost + ?Sized> RangeFill<'h, H> {
    /// Lease on `id`, which the caller has already opened.
    pub fn new(host: &'h mut H, id: RangeId) -> Self {
        Self {
            host,
            id,
            disposed: false,
        }
    }

    pub fn id(&self) -> RangeId {
        self.id
    }

    pub fn add(&mut self, message: Arc<Message>, ignore_message_time_for_hash: bool) -> Result<AddOutcome> {
        self.range_mut()?.add(message, ignore_message_time_for_hash)
    }

    pub fn complete(&mut self) -> Result<()> {
        self.range_mut()?.complete()
    }

    pub fn desirable_range(&self) -> Result<PositionRange> {
        self.range().map(MessagesRange::desirable_range)
    }

    pub fn loaded_range(&self) -> Result<PositionRange> {
        self.range().map(MessagesRange::loaded_range)
    }

    pub fn last_read_position(&self) -> Result<u64> {
        self.range().map(MessagesRange::last_read_position)
    }

    pub fn last_message(&self) -> Result<Option<&Arc<Message>>> {
        self.range().map(MessagesRange::last_message)
    }

    /// End the lease and let the host close (and possibly splice) the range.
    pub fn dispose(mut self) -> Result<()> {
        self.disposed = true;
        self.host.dispose_range(self.id)
    }

    fn range(&self) -> Result<&MessagesRange> {
        self.host
            .range(self.id)
            .ok_or(ContainerError::InvalidState("leased range is no longer managed"))
    }

    fn range_mut(&mut self) -> Result<&mut MessagesRange> {
        self.host
            .range_mut(self.id)
            .ok_or(ContainerError::InvalidState("leased range is no longer managed"))
    }
}

impl<H: RangeHost + ?Sized> fmt::Debug for RangeFill<'_, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RangeFill")
            .field("id", &self.id)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

impl<H: RangeHost + ?Sized> Drop for RangeFill<'_, H> {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        if let Err(err) = self.host.dispose_range(self.id) {
            warn!(range = ?self.id, %err, "failed to dispose range lease");
        }
    }
}
