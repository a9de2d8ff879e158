//! Fixed-capacity leaf storage and the arena that links chunks into chains.

use std::sync::Arc;

use super::{MessagesCollection, MessagesIter, clamp_forward, clamp_reverse};
use crate::error::{ContainerError, Result};
use crate::message::{IndexedMessage, Message};

/// Maximum number of messages held by one chunk.
pub const CHUNK_CAPACITY: usize = 256;

/// Handle of a chunk inside a [`ChunkArena`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkId(usize);

/// Up to [`CHUNK_CAPACITY`] position-ordered messages, linked to its siblings.
#[derive(Debug)]
pub struct Chunk {
    messages: Vec<Arc<Message>>,
    prev: Option<ChunkId>,
    next: Option<ChunkId>,
}

impl Default for Chunk {
    fn default() -> Self {
        Self::new()
    }
}

impl Chunk {
    pub fn new() -> Self {
        Self {
            messages: Vec::with_capacity(CHUNK_CAPACITY),
            prev: None,
            next: None,
        }
    }

    pub fn size(&self) -> usize {
        self.messages.len()
    }

    pub fn is_full(&self) -> bool {
        self.messages.len() >= CHUNK_CAPACITY
    }

    pub fn first(&self) -> Option<&Arc<Message>> {
        self.messages.first()
    }

    pub fn last(&self) -> Option<&Arc<Message>> {
        self.messages.last()
    }

    pub fn prev(&self) -> Option<ChunkId> {
        self.prev
    }

    pub fn next(&self) -> Option<ChunkId> {
        self.next
    }

    /// Append at the end. Fails with [`ContainerError::ChunkFull`] at capacity.
    pub fn add(&mut self, message: Arc<Message>) -> Result<()> {
        if self.is_full() {
            return Err(ContainerError::ChunkFull);
        }
        self.messages.push(message);
        Ok(())
    }

    /// Drop every element before index `pos`.
    pub fn trim_left(&mut self, pos: usize) {
        let pos = pos.min(self.messages.len());
        self.messages.drain(..pos);
    }

    /// Drop every element from index `pos` onwards.
    pub fn trim_right(&mut self, pos: usize) {
        self.messages.truncate(pos);
    }

    /// Replace the last stored message in place.
    pub fn set_last(&mut self, message: Arc<Message>) -> Result<()> {
        match self.messages.last_mut() {
            Some(last) => {
                *last = message;
                Ok(())
            }
            None => Err(ContainerError::InvalidState("set_last on an empty chunk")),
        }
    }

    /// Index of the first message whose position is `>= position`.
    pub fn lower_bound(&self, position: u64) -> usize {
        self.messages.partition_point(|m| m.position < position)
    }
}

impl MessagesCollection for Chunk {
    fn count(&self) -> usize {
        self.messages.len()
    }

    fn forward(&self, begin: usize, end: usize) -> MessagesIter<'_> {
        let span = clamp_forward(self.messages.len(), begin, end);
        let start = span.start;
        Box::new(
            self.messages[span]
                .iter()
                .enumerate()
                .map(move |(i, m)| IndexedMessage::new(start + i, m)),
        )
    }

    fn reverse(&self, begin: isize, end: isize) -> MessagesIter<'_> {
        let span = clamp_reverse(self.messages.len(), begin, end);
        let start = span.start;
        Box::new(
            self.messages[span]
                .iter()
                .enumerate()
                .rev()
                .map(move |(i, m)| IndexedMessage::new(start + i, m)),
        )
    }
}

/// Slab of chunks addressed by [`ChunkId`].
///
/// Chains are expressed through the `prev`/`next` handles stored in each chunk,
/// which keeps the doubly linked structure free of shared ownership.
#[derive(Debug, Default)]
pub struct ChunkArena {
    slots: Vec<Option<Chunk>>,
    free: Vec<usize>,
}

impl ChunkArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: ChunkId) -> Option<&Chunk> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, id: ChunkId) -> Option<&mut Chunk> {
        self.slots.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Number of live chunks.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocate an empty chunk linked after `prev` (which must be a chain tail).
    pub fn push_after(&mut self, prev: Option<ChunkId>) -> ChunkId {
        let mut chunk = Chunk::new();
        chunk.prev = prev;
        let id = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(chunk);
                ChunkId(slot)
            }
            None => {
                self.slots.push(Some(chunk));
                ChunkId(self.slots.len() - 1)
            }
        };
        if let Some(prev) = prev.and_then(|p| self.get_mut(p)) {
            debug_assert!(prev.next.is_none(), "push_after on a non-tail chunk");
            prev.next = Some(id);
        }
        id
    }

    /// Unlink and free a chunk, returning its former neighbours.
    pub fn remove(&mut self, id: ChunkId) -> (Option<ChunkId>, Option<ChunkId>) {
        let Some(chunk) = self.slots.get_mut(id.0).and_then(Option::take) else {
            return (None, None);
        };
        self.free.push(id.0);
        if let Some(prev) = chunk.prev.and_then(|p| self.get_mut(p)) {
            prev.next = chunk.next;
        }
        if let Some(next) = chunk.next.and_then(|n| self.get_mut(n)) {
            next.prev = chunk.prev;
        }
        (chunk.prev, chunk.next)
    }

    /// Chain starting at `first`, following `next` links.
    pub fn iter_from(&self, first: Option<ChunkId>) -> ChainIter<'_> {
        ChainIter {
            arena: self,
            cur: first,
            backwards: false,
        }
    }

    /// Chain starting at `last`, following `prev` links.
    pub fn iter_back_from(&self, last: Option<ChunkId>) -> ChainIter<'_> {
        ChainIter {
            arena: self,
            cur: last,
            backwards: true,
        }
    }

    /// Move every chunk of the chain starting at `first` out of `other` and link
    /// it after `tail`. Returns the handles of the first and last moved chunks.
    pub fn adopt_chain(
        &mut self,
        tail: Option<ChunkId>,
        other: &mut ChunkArena,
        first: Option<ChunkId>,
    ) -> Option<(ChunkId, ChunkId)> {
        let mut new_head = None;
        let mut new_tail = None;
        let mut cur = first;
        while let Some(id) = cur {
            let Some(mut moved) = other.slots.get_mut(id.0).and_then(Option::take) else {
                break;
            };
            other.free.push(id.0);
            cur = moved.next;
            let link_after = new_tail.or(tail);
            let fresh = self.push_after(link_after);
            if let Some(slot) = self.get_mut(fresh) {
                slot.messages = std::mem::take(&mut moved.messages);
            }
            new_head.get_or_insert(fresh);
            new_tail = Some(fresh);
        }
        new_head.zip(new_tail)
    }
}

/// Walks a chunk chain in one direction.
pub struct ChainIter<'a> {
    arena: &'a ChunkArena,
    cur: Option<ChunkId>,
    backwards: bool,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = (ChunkId, &'a Chunk);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cur?;
        let chunk = self.arena.get(id)?;
        self.cur = if self.backwards { chunk.prev } else { chunk.next };
        Some((id, chunk))
    }
}
