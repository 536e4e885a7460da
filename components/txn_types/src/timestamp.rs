// Copyright 2024 RangeKV Project Authors. Licensed under Apache-2.0.

use std::fmt;

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct TimeStamp(u64);

const PHYSICAL_SHIFT_BITS: u64 = 18;

impl TimeStamp {
    /// Create a time stamp from physical and logical components.
    pub fn compose(physical: u64, logical: u64) -> TimeStamp {
        TimeStamp((physical << PHYSICAL_SHIFT_BITS) + logical)
    }

    pub const fn zero() -> TimeStamp {
        TimeStamp(0)
    }

    pub const fn max() -> TimeStamp {
        TimeStamp(u64::MAX)
    }

    pub const fn new(ts: u64) -> TimeStamp {
        TimeStamp(ts)
    }

    /// Extracts physical part of a timestamp, in milliseconds.
    pub fn physical(self) -> u64 {
        self.0 >> PHYSICAL_SHIFT_BITS
    }

    /// Extracts logical part of a timestamp.
    pub fn logical(self) -> u64 {
        self.0 & ((1 << PHYSICAL_SHIFT_BITS) - 1)
    }

    #[must_use]
    pub fn next(self) -> TimeStamp {
        assert!(self.0 < u64::MAX);
        TimeStamp(self.0 + 1)
    }

    #[must_use]
    pub fn prev(self) -> TimeStamp {
        assert!(self.0 > 0);
        TimeStamp(self.0 - 1)
    }

    /// Advances to `other` if `other` is larger. Returns whether the
    /// timestamp moved.
    pub fn forward(&mut self, other: TimeStamp) -> bool {
        if *self < other {
            *self = other;
            return true;
        }
        false
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_max(self) -> bool {
        self.0 == u64::MAX
    }

    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl From<u64> for TimeStamp {
    fn from(ts: u64) -> TimeStamp {
        TimeStamp(ts)
    }
}

impl From<&u64> for TimeStamp {
    fn from(ts: &u64) -> TimeStamp {
        TimeStamp(*ts)
    }
}

impl fmt::Display for TimeStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

// Timestamps are persisted on their own in a few range-metadata slots
// (GC thresholds, last-replica-GC timestamp).
impl codec::Record for TimeStamp {
    fn to_bytes(&self) -> Vec<u8> {
        self.0.to_be_bytes().to_vec()
    }

    fn parse(buf: &[u8]) -> codec::Result<TimeStamp> {
        use codec::prelude::*;
        let mut b = buf;
        Ok(TimeStamp(b.decode_u64()?))
    }
}

impl slog::Value for TimeStamp {
    fn serialize(
        &self,
        record: &slog::Record<'_>,
        key: slog::Key,
        serializer: &mut dyn slog::Serializer,
    ) -> slog::Result {
        slog::Value::serialize(&self.0, record, key, serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compose() {
        let ts = TimeStamp::compose(100, 5);
        assert_eq!(ts.physical(), 100);
        assert_eq!(ts.logical(), 5);
        assert!(ts > TimeStamp::compose(100, 4));
        assert!(ts < TimeStamp::compose(101, 0));
    }

    #[test]
    fn test_forward() {
        let mut ts = TimeStamp::new(5);
        assert!(!ts.forward(3.into()));
        assert_eq!(ts, 5.into());
        assert!(ts.forward(8.into()));
        assert_eq!(ts, 8.into());
        assert!(!ts.forward(8.into()));
    }
}
