//! Store-assigned record identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Identifier of a record within a stream.
///
/// Rendered as `<millis>-<seq>`. Ids are strictly increasing within a stream
/// and ordered lexicographically on `(millis, seq)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct RecordId {
    /// Milliseconds component (wall-clock time at append for generated ids).
    pub millis: u64,
    /// Sequence within the same millisecond.
    pub seq: u64,
}

impl RecordId {
    /// The smallest id; used as the "from the beginning" cursor.
    pub const MIN: Self = Self { millis: 0, seq: 0 };

    /// The largest id; used as an open upper bound.
    pub const MAX: Self = Self {
        millis: u64::MAX,
        seq: u64::MAX,
    };

    #[must_use]
    pub const fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    /// Next generated id after `last` at wall-clock time `now_ms`.
    ///
    /// Never goes backwards, even if the clock does.
    #[must_use]
    pub fn next_after(last: Self, now_ms: u64) -> Self {
        if now_ms > last.millis {
            Self::new(now_ms, 0)
        } else if last.seq == u64::MAX {
            Self::new(last.millis.saturating_add(1), 0)
        } else {
            Self::new(last.millis, last.seq + 1)
        }
    }

    /// Whether `self` may follow `last` as an explicitly requested id.
    #[must_use]
    pub fn can_follow(self, last: Self) -> bool {
        self != Self::MIN && self > last
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for RecordId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidId(s.to_string());
        let (millis, seq) = match s.split_once('-') {
            Some((millis, seq)) => (millis, Some(seq)),
            None => (s, None),
        };
        let millis = millis.trim().parse::<u64>().map_err(|_| invalid())?;
        let seq = match seq {
            Some(seq) => seq.trim().parse::<u64>().map_err(|_| invalid())?,
            None => 0,
        };
        Ok(Self::new(millis, seq))
    }
}

impl Serialize for RecordId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
