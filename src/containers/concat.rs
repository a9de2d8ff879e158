//! Traversal of an ordered list of collections as one contiguous sequence.

use super::{MessagesCollection, MessagesIter, clamp_forward, clamp_reverse};
use crate::message::IndexedMessage;

/// A collection made of sub-collections laid end to end.
///
/// Implementors only list their parts; counting and windowed traversal in both
/// directions come from the provided methods.
pub trait ConcatenatingCollection {
    type Part: MessagesCollection;

    /// Parts in forward order.
    fn parts(&self) -> Vec<&Self::Part>;

    /// Parts in reverse order.
    fn parts_reversed(&self) -> Vec<&Self::Part> {
        let mut parts = self.parts();
        parts.reverse();
        parts
    }

    fn concat_count(&self) -> usize {
        self.parts().iter().map(|p| p.count()).sum()
    }

    fn concat_forward(&self, begin: usize, end: usize) -> MessagesIter<'_> {
        forward(self.parts(), begin, end)
    }

    fn concat_reverse(&self, begin: isize, end: isize) -> MessagesIter<'_> {
        let total = self.concat_count();
        reverse(self.parts_reversed(), total, begin, end)
    }
}

/// Forward walk over `parts`, remapping local indices into the global window.
pub fn forward<'a, P>(parts: Vec<&'a P>, begin: usize, end: usize) -> MessagesIter<'a>
where
    P: MessagesCollection + ?Sized,
{
    Box::new(ConcatForward {
        parts: parts.into_iter(),
        base: 0,
        begin,
        end,
        current: None,
    })
}

/// Reverse walk over `parts` (already in reverse order) whose counts sum to `total`.
pub fn reverse<'a, P>(parts: Vec<&'a P>, total: usize, begin: isize, end: isize) -> MessagesIter<'a>
where
    P: MessagesCollection + ?Sized,
{
    let span = clamp_reverse(total, begin, end);
    Box::new(ConcatReverse {
        parts: parts.into_iter(),
        top: total,
        span,
        current: None,
    })
}

struct ConcatForward<'a, P: ?Sized> {
    parts: std::vec::IntoIter<&'a P>,
    /// Global index of the first element of the next part
    base: usize,
    begin: usize,
    end: usize,
    current: Option<(usize, MessagesIter<'a>)>,
}

impl<'a, P> Iterator for ConcatForward<'a, P>
where
    P: MessagesCollection + ?Sized,
{
    type Item = IndexedMessage<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((offset, inner)) = self.current.as_mut() {
                if let Some(m) = inner.next() {
                    let index = m.index + *offset;
                    return Some(m.reindexed(index));
                }
                self.current = None;
            }
            if self.base >= self.end {
                return None;
            }
            let part = self.parts.next()?;
            let count = part.count();
            if count == 0 {
                continue;
            }
            let offset = self.base;
            self.base += count;
            let local = clamp_forward(count, self.begin.saturating_sub(offset), self.end - offset);
            if !local.is_empty() {
                self.current = Some((offset, part.forward(local.start, local.end)));
            }
        }
    }
}

struct ConcatReverse<'a, P: ?Sized> {
    parts: std::vec::IntoIter<&'a P>,
    /// Global index one past the last element of the next part
    top: usize,
    /// Ascending global span still to be produced
    span: std::ops::Range<usize>,
    current: Option<(usize, MessagesIter<'a>)>,
}

impl<'a, P> Iterator for ConcatReverse<'a, P>
where
    P: MessagesCollection + ?Sized,
{
    type Item = IndexedMessage<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((offset, inner)) = self.current.as_mut() {
                if let Some(m) = inner.next() {
                    let index = m.index + *offset;
                    return Some(m.reindexed(index));
                }
                self.current = None;
            }
            if self.top <= self.span.start {
                return None;
            }
            let part = self.parts.next()?;
            let count = part.count();
            if count == 0 {
                continue;
            }
            let offset = self.top.saturating_sub(count);
            self.top = offset;
            let lo = self.span.start.max(offset);
            let hi = self.span.end.min(offset + count);
            if lo < hi {
                let local_begin = (hi - offset) as isize - 1;
                let local_end = (lo - offset) as isize - 1;
                self.current = Some((offset, part.reverse(local_begin, local_end)));
            }
        }
    }
}
