//! Set of disjoint, contiguous ranges reshaped by the window a reader wants.

use tracing::debug;

use super::concat::ConcatenatingCollection;
use super::position::{PositionRange, Relation};
use super::range::{MessagesRange, RangeFill, RangeHost, RangeId};
use super::{MessagesCollection, MessagesIter};
use crate::error::{ContainerError, Result};

/// Priority given to windows declared without an explicit one.
pub const DEFAULT_ACTIVE_PRIORITY: i32 = 1;

/// Owns the loaded ranges of one source and decides what to fill next.
///
/// Ranges are kept ordered by position with `ranges[i].end == ranges[i + 1].begin`,
/// so reading the collection front to back yields messages in position order.
/// At most one range is open at a time; it is filled through the [`RangeFill`]
/// lease returned by [`get_next_range_to_fill`](Self::get_next_range_to_fill).
#[derive(Debug)]
pub struct RangesManagingCollection {
    ranges: Vec<MessagesRange>,
    open_range: Option<RangeId>,
    active: Option<PositionRange>,
    active_priority: i32,
}

impl Default for RangesManagingCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl RangesManagingCollection {
    pub fn new() -> Self {
        Self::with_priority(DEFAULT_ACTIVE_PRIORITY)
    }

    /// Collection whose `set_active_range` windows get `active_priority`.
    pub fn with_priority(active_priority: i32) -> Self {
        Self {
            ranges: Vec::new(),
            open_range: None,
            active: None,
            active_priority,
        }
    }

    pub fn ranges(&self) -> &[MessagesRange] {
        &self.ranges
    }

    pub fn active_range(&self) -> Option<PositionRange> {
        self.active
    }

    pub fn open_range(&self) -> Option<RangeId> {
        self.open_range
    }

    /// Whether every managed range is complete.
    pub fn is_fully_loaded(&self) -> bool {
        self.ranges.iter().all(MessagesRange::is_complete)
    }

    /// Declare the window `[p1, p2)` that should be loaded.
    ///
    /// Ranges outside the window are dropped, overlapping ones are trimmed to
    /// it and re-prioritised, and uncovered parts become new empty ranges.
    /// Returns whether the range set changed.
    pub fn set_active_range(&mut self, p1: u64, p2: u64) -> Result<bool> {
        self.set_active_range_with_priority(p1, p2, self.active_priority)
    }

    pub fn set_active_range_with_priority(&mut self, p1: u64, p2: u64, priority: i32) -> Result<bool> {
        if p1 > p2 {
            return Err(ContainerError::OutOfRange {
                value: p1,
                begin: 0,
                end: p2,
            });
        }
        if self.open_range.is_some() {
            return Err(ContainerError::InvalidState("cannot reshape while a range is open"));
        }

        let window = PositionRange::new(p1, p2, priority);
        self.active = Some(window);
        let mut changed = false;

        if window.is_empty() {
            changed = !self.ranges.is_empty();
            self.ranges.clear();
            return Ok(changed);
        }

        let mut i = 0;
        while i < self.ranges.len() {
            let range = &mut self.ranges[i];
            let current = range.desirable_range();
            match current.relate(&window) {
                Relation::Before | Relation::After => {
                    debug!(begin = current.begin, end = current.end, "dropping range outside of the active window");
                    self.ranges.remove(i);
                    changed = true;
                    continue;
                }
                Relation::Overlaps { begin, end } => {
                    if current.begin < begin {
                        range.trim_left(begin)?;
                        changed = true;
                    }
                    if current.end > end {
                        range.trim_right(end)?;
                        changed = true;
                    }
                    if current.priority != priority {
                        range.set_priority(priority)?;
                        changed = true;
                    }
                }
            }
            i += 1;
        }

        let covered = self
            .ranges
            .first()
            .zip(self.ranges.last())
            .map(|(first, last)| (first.desirable_range().begin, last.desirable_range().end));
        match covered {
            None => {
                self.ranges.push(MessagesRange::new(window));
                changed = true;
            }
            Some((begin, end)) => {
                if window.begin < begin {
                    self.ranges
                        .insert(0, MessagesRange::new(PositionRange::new(window.begin, begin, priority)));
                    changed = true;
                }
                if end < window.end {
                    self.ranges
                        .push(MessagesRange::new(PositionRange::new(end, window.end, priority)));
                    changed = true;
                }
            }
        }

        changed |= self.merge()?;
        debug!(begin = p1, end = p2, priority, changed, ranges = self.ranges.len(), "active range set");
        self.check_integrity();
        Ok(changed)
    }

    /// Coalesce adjacent ranges of equal priority and drop empty ones.
    ///
    /// Two neighbours are merged when the left one is complete or the right
    /// one has not loaded anything yet.
    fn merge(&mut self) -> Result<bool> {
        let before = self.ranges.len();
        self.ranges
            .retain(|r| r.is_open() || !r.desirable_range().is_empty());
        let mut changed = self.ranges.len() != before;

        let mut i = 0;
        while i + 1 < self.ranges.len() {
            let (left, right) = (&self.ranges[i], &self.ranges[i + 1]);
            let mergeable = left.priority() == right.priority()
                && !left.is_open()
                && !right.is_open()
                && (left.is_complete() || !right.has_loaded());
            if mergeable {
                let right = self.ranges.remove(i + 1);
                self.ranges[i].append_to_end(right)?;
                changed = true;
            } else {
                i += 1;
            }
        }
        Ok(changed)
    }

    /// Open and lease the incomplete range with the highest priority.
    ///
    /// Ties go to the range nearest the start. Returns `None` when everything
    /// is loaded.
    pub fn get_next_range_to_fill(&mut self) -> Result<Option<RangeFill<'_, Self>>> {
        if self.open_range.is_some() {
            return Err(ContainerError::InvalidState("another range is already open"));
        }
        let best = self
            .ranges
            .iter()
            .filter(|r| !r.is_complete())
            .fold(None::<&MessagesRange>, |best, r| match best {
                Some(b) if b.priority() >= r.priority() => Some(b),
                _ => Some(r),
            })
            .map(MessagesRange::id);
        let Some(id) = best else {
            return Ok(None);
        };

        if let Some(range) = self.range_mut(id) {
            range.open()?;
        }
        self.open_range = Some(id);
        Ok(Some(RangeFill::new(self, id)))
    }

    /// Replace all ranges with one fresh range spanning the active window.
    pub fn invalidate_messages(&mut self) -> Result<()> {
        if self.open_range.is_some() {
            return Err(ContainerError::InvalidState("cannot invalidate while a range is open"));
        }
        self.ranges.clear();
        if let Some(active) = self.active.filter(|a| !a.is_empty()) {
            self.ranges.push(MessagesRange::new(active));
        }
        debug!(active = ?self.active, "messages invalidated");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn from_ranges(ranges: Vec<MessagesRange>) -> Self {
        let mut collection = Self::new();
        collection.ranges = ranges;
        collection.check_integrity();
        collection
    }

    #[cfg(debug_assertions)]
    fn check_integrity(&self) {
        let open: Vec<RangeId> = self
            .ranges
            .iter()
            .filter(|r| r.is_open())
            .map(MessagesRange::id)
            .collect();
        debug_assert!(open.len() <= 1, "more than one open range");
        debug_assert_eq!(open.first().copied(), self.open_range, "open range bookkeeping is stale");

        for pair in self.ranges.windows(2) {
            let (left, right) = (&pair[0], &pair[1]);
            debug_assert_eq!(
                left.desirable_range().end,
                right.desirable_range().begin,
                "ranges are not contiguous"
            );
            if let (Some(a), Some(b)) = (left.last_message(), right.first_message()) {
                debug_assert!(a.position < b.position && a.time <= b.time, "ranges out of order");
            }
        }
        for range in &self.ranges {
            range.check_integrity();
        }
    }

    #[cfg(not(debug_assertions))]
    fn check_integrity(&self) {}
}

impl RangeHost for RangesManagingCollection {
    fn range(&self, id: RangeId) -> Option<&MessagesRange> {
        self.ranges.iter().find(|r| r.id() == id)
    }

    fn range_mut(&mut self, id: RangeId) -> Option<&mut MessagesRange> {
        self.ranges.iter_mut().find(|r| r.id() == id)
    }

    /// Close `id`; a complete range then swallows its direct successor.
    fn dispose_range(&mut self, id: RangeId) -> Result<()> {
        let index = self
            .ranges
            .iter()
            .position(|r| r.id() == id)
            .ok_or(ContainerError::InvalidState("disposed range is not managed here"))?;
        if self.open_range == Some(id) {
            self.open_range = None;
        }
        self.ranges[index].close()?;

        if self.ranges[index].is_complete() && index + 1 < self.ranges.len() {
            let next = self.ranges.remove(index + 1);
            debug!(
                range = ?id,
                successor_begin = next.desirable_range().begin,
                successor_end = next.desirable_range().end,
                "splicing successor onto completed range"
            );
            self.ranges[index].append_to_end(next)?;
        }
        self.check_integrity();
        Ok(())
    }
}

impl ConcatenatingCollection for RangesManagingCollection {
    type Part = MessagesRange;

    fn parts(&self) -> Vec<&MessagesRange> {
        self.ranges.iter().collect()
    }
}

impl MessagesCollection for RangesManagingCollection {
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

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::containers::AddOutcome;
    use crate::containers::test_utils::{indices, positions};
    use crate::message::test_utils::msg;

    fn bounds(collection: &RangesManagingCollection) -> Vec<(u64, u64)> {
        collection
            .ranges()
            .iter()
            .map(|r| (r.desirable_range().begin, r.desirable_range().end))
            .collect()
    }

    /// Fill the next range with `positions` and optionally complete it.
    fn fill_next(collection: &mut RangesManagingCollection, positions: &[u64], complete: bool) -> PositionRange {
        let mut fill = collection.get_next_range_to_fill().unwrap().unwrap();
        let desirable = fill.desirable_range().unwrap();
        for &p in positions {
            fill.add(msg(p), false).unwrap();
        }
        if complete {
            fill.complete().unwrap();
        }
        fill.dispose().unwrap();
        desirable
    }

    fn closed(begin: u64, end: u64, priority: i32, positions: &[u64], complete: bool) -> MessagesRange {
        let mut range = MessagesRange::new(PositionRange::new(begin, end, priority));
        range.open().unwrap();
        for &p in positions {
            range.add(msg(p), false).unwrap();
        }
        if complete {
            range.complete().unwrap();
        }
        range.close().unwrap();
        range
    }

    #[test]
    fn test_set_active_range_is_idempotent() {
        let mut collection = RangesManagingCollection::new();
        assert!(collection.set_active_range(0, 100).unwrap());
        assert!(!collection.set_active_range(0, 100).unwrap());
        assert_eq!(bounds(&collection), vec![(0, 100)]);
    }

    #[test]
    fn test_set_active_range_rejects_inverted_window() {
        let mut collection = RangesManagingCollection::new();
        assert!(matches!(
            collection.set_active_range(10, 5),
            Err(ContainerError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_concrete_single_range_completes() {
        let mut collection = RangesManagingCollection::new();
        collection.set_active_range(100, 500).unwrap();
        let mut fill = collection.get_next_range_to_fill().unwrap().unwrap();
        for p in [100, 150, 200] {
            assert_eq!(fill.add(msg(p), false).unwrap(), AddOutcome::Appended);
        }
        fill.complete().unwrap();
        assert_eq!(fill.loaded_range().unwrap(), PositionRange::new(100, 500, 1));
        fill.dispose().unwrap();

        assert_eq!(collection.count(), 3);
        assert!(collection.is_fully_loaded());
        assert!(collection.get_next_range_to_fill().unwrap().is_none());
    }

    #[test]
    fn test_dispose_of_complete_range_splices_successor() {
        let mut collection = RangesManagingCollection::from_ranges(vec![
            closed(0, 200, 1, &[], false),
            closed(200, 400, 1, &[], false),
        ]);
        fill_next(&mut collection, &[0, 100], true);

        assert_eq!(bounds(&collection), vec![(0, 400)]);
        let range = &collection.ranges()[0];
        assert!(!range.is_complete());
        assert_eq!(range.last_read_position(), 200);
        assert!(collection.open_range().is_none());
    }

    #[test]
    fn test_dispose_of_incomplete_range_keeps_successor() {
        let mut collection = RangesManagingCollection::from_ranges(vec![
            closed(0, 200, 1, &[], false),
            closed(200, 400, 1, &[], false),
        ]);
        fill_next(&mut collection, &[0, 100], false);
        assert_eq!(bounds(&collection), vec![(0, 200), (200, 400)]);
    }

    #[test]
    fn test_priority_refill_order() {
        let mut collection = RangesManagingCollection::from_ranges(vec![
            closed(0, 100, 1, &[], false),
            closed(100, 200, 3, &[], false),
            closed(200, 300, 2, &[], false),
        ]);

        let order: Vec<i32> = std::iter::from_fn(|| {
            let mut fill = collection.get_next_range_to_fill().unwrap()?;
            let priority = fill.desirable_range().unwrap().priority;
            fill.complete().unwrap();
            Some(priority)
        })
        .collect();

        assert_eq!(order, vec![3, 2, 1]);
        assert_eq!(bounds(&collection), vec![(0, 300)]);
        assert!(collection.is_fully_loaded());
    }

    #[test]
    fn test_only_one_range_open_at_a_time() {
        let mut collection = RangesManagingCollection::new();
        collection.set_active_range(0, 100).unwrap();
        let fill = collection.get_next_range_to_fill().unwrap().unwrap();
        assert!(format!("{fill:?}").contains("disposed: false"));
        std::mem::forget(fill);

        assert!(collection.get_next_range_to_fill().unwrap_err().is_invalid_state());
        assert!(collection.set_active_range(0, 50).unwrap_err().is_invalid_state());
        let id = collection.open_range().unwrap();
        collection.dispose_range(id).unwrap();
        assert!(collection.get_next_range_to_fill().unwrap().is_some());
    }

    #[test]
    fn test_dropping_lease_disposes() {
        let mut collection = RangesManagingCollection::new();
        collection.set_active_range(0, 100).unwrap();
        {
            let mut fill = collection.get_next_range_to_fill().unwrap().unwrap();
            fill.add(msg(10), false).unwrap();
        }
        assert!(collection.open_range().is_none());
        assert!(!collection.ranges()[0].is_open());
    }

    #[test]
    fn test_moving_window_trims_and_extends() {
        let mut collection = RangesManagingCollection::new();
        collection.set_active_range(0, 100).unwrap();
        fill_next(&mut collection, &[0, 20, 40, 60, 80], true);

        assert!(collection.set_active_range(50, 150).unwrap());
        assert_eq!(bounds(&collection), vec![(50, 150)]);
        assert_eq!(positions(collection.forward(0, 10)), vec![60, 80]);

        let desirable = fill_next(&mut collection, &[100, 120], true);
        assert_eq!((desirable.begin, desirable.end), (50, 150));
        assert_eq!(positions(collection.forward(0, 10)), vec![60, 80, 100, 120]);
    }

    #[test]
    fn test_window_before_loaded_range_prepends() {
        let mut collection = RangesManagingCollection::new();
        collection.set_active_range(100, 200).unwrap();
        fill_next(&mut collection, &[100, 150], true);

        assert!(collection.set_active_range(50, 200).unwrap());
        assert_eq!(bounds(&collection), vec![(50, 100), (100, 200)]);

        let desirable = fill_next(&mut collection, &[60], true);
        assert_eq!((desirable.begin, desirable.end), (50, 100));
        assert_eq!(bounds(&collection), vec![(50, 200)]);
        assert_eq!(positions(collection.forward(0, 10)), vec![60, 100, 150]);
        assert_eq!(positions(collection.reverse(10, -1)), vec![150, 100, 60]);
    }

    #[test]
    fn test_disjoint_window_drops_everything() {
        let mut collection = RangesManagingCollection::new();
        collection.set_active_range(0, 100).unwrap();
        fill_next(&mut collection, &[10], true);

        assert!(collection.set_active_range(500, 600).unwrap());
        assert_eq!(bounds(&collection), vec![(500, 600)]);
        assert_eq!(collection.count(), 0);
    }

    #[test]
    fn test_priority_change_is_a_change() {
        let mut collection = RangesManagingCollection::new();
        collection.set_active_range(0, 100).unwrap();
        assert!(collection.set_active_range_with_priority(0, 100, 4).unwrap());
        assert_eq!(collection.ranges()[0].priority(), 4);
        assert!(!collection.set_active_range_with_priority(0, 100, 4).unwrap());
    }

    #[test]
    fn test_empty_window_clears_ranges() {
        let mut collection = RangesManagingCollection::new();
        collection.set_active_range(0, 100).unwrap();
        assert!(collection.set_active_range(40, 40).unwrap());
        assert!(collection.ranges().is_empty());
        assert!(!collection.set_active_range(40, 40).unwrap());
    }

    #[test]
    fn test_invalidate_messages_resets_to_active_window() {
        let mut collection = RangesManagingCollection::new();
        collection.set_active_range(0, 100).unwrap();
        fill_next(&mut collection, &[0, 50], true);
        collection.set_active_range(0, 200).unwrap();

        collection.invalidate_messages().unwrap();
        assert_eq!(bounds(&collection), vec![(0, 200)]);
        assert_eq!(collection.count(), 0);
        assert!(!collection.is_fully_loaded());
    }

    #[test]
    fn test_partial_fill_resumes_from_last_read() {
        let mut collection = RangesManagingCollection::new();
        collection.set_active_range(0, 100).unwrap();
        fill_next(&mut collection, &[0, 10, 20], false);

        let mut fill = collection.get_next_range_to_fill().unwrap().unwrap();
        assert_eq!(fill.last_read_position().unwrap(), 20);
        assert_eq!(fill.add(msg(10), false).unwrap(), AddOutcome::Ignored);
        assert_eq!(fill.add(msg(20), false).unwrap(), AddOutcome::Unchanged);
        assert_eq!(fill.add(msg(30), false).unwrap(), AddOutcome::Appended);
        fill.complete().unwrap();
        fill.dispose().unwrap();

        assert_eq!(indices(collection.forward(0, 10)), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_concatenation_across_ranges() {
        let collection = RangesManagingCollection::from_ranges(vec![
            closed(0, 100, 1, &[0, 50], true),
            closed(100, 200, 2, &[], true),
            closed(200, 300, 1, &[210, 220, 230], false),
        ]);
        assert_eq!(collection.count(), 5);
        assert_eq!(positions(collection.forward(1, 4)), vec![50, 210, 220]);
        assert_eq!(indices(collection.reverse(3, 0)), vec![3, 2, 1]);
    }
}
