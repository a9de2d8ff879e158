/// A half-open `[begin, end)` span of source positions tagged with a fill priority.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PositionRange {
    pub begin: u64,
    pub end: u64,
    pub priority: i32,
}

impl PositionRange {
    pub fn new(begin: u64, end: u64, priority: i32) -> Self {
        debug_assert!(begin <= end, "inverted range [{begin}, {end})");
        Self {
            begin,
            end,
            priority,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.begin)
    }

    /// Whether `value` may serve as a trim bound, i.e. lies in `[begin, end]`.
    pub fn contains_bound(&self, value: u64) -> bool {
        value >= self.begin && value <= self.end
    }

    pub fn with_priority(self, priority: i32) -> Self {
        Self { priority, ..self }
    }

    /// Where `self` sits relative to `other`.
    pub fn relate(&self, other: &PositionRange) -> Relation {
        if self.end <= other.begin {
            Relation::Before
        } else if self.begin >= other.end {
            Relation::After
        } else {
            Relation::Overlaps {
                begin: self.begin.max(other.begin),
                end: self.end.min(other.end),
            }
        }
    }
}

/// Positional relation of one range to another.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relation {
    /// Entirely to the left, touching allowed
    Before,
    /// Entirely to the right, touching allowed
    After,
    /// Non-empty intersection `[begin, end)`
    Overlaps { begin: u64, end: u64 },
}
