use std::fmt;

use serde::{Deserialize, Serialize};

/// Position of a media item in a playlist: media sequence number plus part index.
///
/// Full segments use [`SequenceNumber::FULL_SEGMENT`] as their part index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SequenceNumber {
    pub msn: u64,
    pub part: i64,
}

/// How [`SequenceNumber::greater_or_equal`] compares two positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SequenceOrdering {
    /// `msn` greater, or same `msn` with `part` greater or equal.
    #[default]
    Lexicographic,
    /// Both components compared independently and joined with AND.
    ///
    /// Reproduces the check of the first latencer release: `(12, 0)` is *not*
    /// considered at least `(11, 2)`.
    Legacy,
}

impl SequenceNumber {
    pub const FULL_SEGMENT: i64 = -1;

    pub const fn new(msn: u64, part: i64) -> Self {
        Self { msn, part }
    }

    pub const fn segment(msn: u64) -> Self {
        Self {
            msn,
            part: Self::FULL_SEGMENT,
        }
    }

    pub fn is_full_segment(&self) -> bool {
        self.part == Self::FULL_SEGMENT
    }

    pub fn greater_or_equal(&self, other: &SequenceNumber, ordering: SequenceOrdering) -> bool {
        match ordering {
            SequenceOrdering::Lexicographic => {
                self.msn > other.msn || (self.msn == other.msn && self.part >= other.part)
            }
            SequenceOrdering::Legacy => self.msn >= other.msn && self.part >= other.part,
        }
    }
}

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_full_segment() {
            write!(f, "msn {}", self.msn)
        } else {
            write!(f, "msn {} part {}", self.msn, self.part)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case((11, 2), (11, 2), true, true)]
    #[case((11, 3), (11, 2), true, true)]
    #[case((11, 1), (11, 2), false, false)]
    #[case((12, 0), (11, 2), true, false)]
    #[case((10, 5), (11, 0), false, false)]
    #[case((12, 5), (11, 0), true, true)]
    fn greater_or_equal_by_ordering(
        #[case] a: (u64, i64),
        #[case] b: (u64, i64),
        #[case] lexicographic: bool,
        #[case] legacy: bool,
    ) {
        let a = SequenceNumber::new(a.0, a.1);
        let b = SequenceNumber::new(b.0, b.1);

        assert_eq!(
            a.greater_or_equal(&b, SequenceOrdering::Lexicographic),
            lexicographic
        );
        assert_eq!(a.greater_or_equal(&b, SequenceOrdering::Legacy), legacy);
    }

    #[test]
    fn display_distinguishes_segments_from_parts() {
        assert_eq!(SequenceNumber::segment(7).to_string(), "msn 7");
        assert_eq!(SequenceNumber::new(7, 2).to_string(), "msn 7 part 2");
    }
}
