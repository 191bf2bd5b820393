use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use propmarket_core::{DomainError, DomainResult, ValueObject};

/// Half-open interval `[start, end)` with `end > start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeSlot {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl ValueObject for TimeSlot {}

impl TimeSlot {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> DomainResult<Self> {
        if end <= start {
            return Err(DomainError::validation("end time must be after start time"));
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Touching intervals (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && other.start < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 3, hour, minute, 0).unwrap()
    }

    #[test]
    fn empty_or_inverted_ranges_are_rejected() {
        assert!(TimeSlot::new(at(10, 0), at(10, 0)).is_err());
        assert!(TimeSlot::new(at(11, 0), at(10, 0)).is_err());
    }

    #[test]
    fn partial_overlap_and_adjacency() {
        let first = TimeSlot::new(at(10, 0), at(11, 0)).unwrap();
        let overlapping = TimeSlot::new(at(10, 30), at(11, 30)).unwrap();
        let adjacent = TimeSlot::new(at(11, 0), at(12, 0)).unwrap();

        assert!(first.overlaps(&overlapping));
        assert!(!first.overlaps(&adjacent));
        assert!(!adjacent.overlaps(&first));
    }

    fn slot() -> impl Strategy<Value = TimeSlot> {
        (0i64..1_000, 1i64..240).prop_map(|(offset, len)| {
            let start = at(0, 0) + Duration::minutes(offset);
            TimeSlot::new(start, start + Duration::minutes(len)).unwrap()
        })
    }

    proptest! {
        #[test]
        fn overlap_is_symmetric(a in slot(), b in slot()) {
            prop_assert_eq!(a.overlaps(&b), b.overlaps(&a));
        }

        #[test]
        fn every_slot_overlaps_itself(a in slot()) {
            prop_assert!(a.overlaps(&a));
        }

        #[test]
        fn overlap_matches_shared_minute(a in slot(), b in slot()) {
            let shared = a.start().max(b.start()) < a.end().min(b.end());
            prop_assert_eq!(a.overlaps(&b), shared);
        }
    }
}
