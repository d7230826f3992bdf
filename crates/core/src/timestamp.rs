// SPDX-FileCopyrightText: © 2025 FrameKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Logical stream time.
//!
//! A [`Timestamp`] is a totally ordered 64-bit value. The extreme ends of the
//! `i64` range are reserved for sentinels:
//!
//! ```text
//! UNSET < UNSTARTED < PRE_STREAM < MIN ..= MAX < POST_STREAM < ONE_OVER_POST_STREAM < DONE
//! ```
//!
//! Only range values (`MIN..=MAX`), `PRE_STREAM` and `POST_STREAM` may be
//! attached to packets. The remaining sentinels appear only as stream bounds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};
use std::str::FromStr;

/// Signed difference between two timestamps.
pub type TimestampDiff = i64;

/// A point in logical stream time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const UNSET: Self = Self(i64::MIN);
    pub const UNSTARTED: Self = Self(i64::MIN + 1);
    pub const PRE_STREAM: Self = Self(i64::MIN + 2);
    pub const MIN: Self = Self(i64::MIN + 3);
    pub const MAX: Self = Self(i64::MAX - 3);
    pub const POST_STREAM: Self = Self(i64::MAX - 2);
    pub const ONE_OVER_POST_STREAM: Self = Self(i64::MAX - 1);
    pub const DONE: Self = Self(i64::MAX);

    const NAMED: [(Self, &'static str); 8] = [
        (Self::UNSET, "Unset"),
        (Self::UNSTARTED, "Unstarted"),
        (Self::PRE_STREAM, "PreStream"),
        (Self::MIN, "Min"),
        (Self::MAX, "Max"),
        (Self::POST_STREAM, "PostStream"),
        (Self::ONE_OVER_POST_STREAM, "OneOverPostStream"),
        (Self::DONE, "Done"),
    ];

    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> i64 {
        self.0
    }

    /// Creates a timestamp from seconds, rounding to the nearest microsecond.
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_seconds(seconds: f64) -> Self {
        Self((seconds * 1_000_000.0).round() as i64)
    }

    /// Interprets the value as microseconds and returns seconds.
    #[allow(clippy::cast_precision_loss)]
    pub fn seconds(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub const fn microseconds(self) -> i64 {
        self.0
    }

    /// True for every sentinel, including `MIN` and `MAX`.
    pub const fn is_special_value(self) -> bool {
        self.0 <= Self::MIN.0 || self.0 >= Self::MAX.0
    }

    /// True for values in `MIN..=MAX`.
    pub const fn is_range_value(self) -> bool {
        self.0 >= Self::MIN.0 && self.0 <= Self::MAX.0
    }

    /// True if a packet may carry this timestamp.
    pub const fn is_allowed_in_stream(self) -> bool {
        self.is_range_value() || self.0 == Self::PRE_STREAM.0 || self.0 == Self::POST_STREAM.0
    }

    /// Smallest timestamp that may follow a packet at `self` on the same stream.
    ///
    /// `PRE_STREAM` and `POST_STREAM` packets close the stream, as does
    /// anything at or beyond `MAX`.
    pub const fn next_allowed_in_stream(self) -> Self {
        if self.0 >= Self::MAX.0 || self.0 == Self::PRE_STREAM.0 {
            Self::ONE_OVER_POST_STREAM
        } else if self.0 < Self::MIN.0 {
            Self::MIN
        } else {
            Self(self.0 + 1)
        }
    }

    /// Largest timestamp that may precede a packet at `self` on the same stream.
    pub const fn previous_allowed_in_stream(self) -> Self {
        if self.0 <= Self::MIN.0 || self.0 == Self::POST_STREAM.0 {
            Self::UNSTARTED
        } else if self.0 > Self::MAX.0 {
            Self::MAX
        } else {
            Self(self.0 - 1)
        }
    }

    pub const fn checked_add(self, diff: TimestampDiff) -> Option<Self> {
        match self.0.checked_add(diff) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    fn name(self) -> Option<&'static str> {
        Self::NAMED.iter().find(|(ts, _)| *ts == self).map(|(_, name)| *name)
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::UNSET
    }
}

impl From<i64> for Timestamp {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

impl Add<TimestampDiff> for Timestamp {
    type Output = Self;

    fn add(self, rhs: TimestampDiff) -> Self {
        Self(self.0.saturating_add(rhs))
    }
}

impl AddAssign<TimestampDiff> for Timestamp {
    fn add_assign(&mut self, rhs: TimestampDiff) {
        *self = *self + rhs;
    }
}

impl Sub<TimestampDiff> for Timestamp {
    type Output = Self;

    fn sub(self, rhs: TimestampDiff) -> Self {
        Self(self.0.saturating_sub(rhs))
    }
}

impl SubAssign<TimestampDiff> for Timestamp {
    fn sub_assign(&mut self, rhs: TimestampDiff) {
        *self = *self - rhs;
    }
}

impl Sub for Timestamp {
    type Output = TimestampDiff;

    fn sub(self, rhs: Self) -> TimestampDiff {
        self.0.saturating_sub(rhs.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Error returned when parsing a [`Timestamp`] fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid timestamp '{0}'")]
pub struct ParseTimestampError(String);

impl FromStr for Timestamp {
    type Err = ParseTimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Some((ts, _)) = Self::NAMED.iter().find(|(_, name)| *name == trimmed) {
            return Ok(*ts);
        }
        trimmed.parse::<i64>().map(Self).map_err(|_| ParseTimestampError(s.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_ordered() {
        let ordered = [
            Timestamp::UNSET,
            Timestamp::UNSTARTED,
            Timestamp::PRE_STREAM,
            Timestamp::MIN,
            Timestamp::new(0),
            Timestamp::MAX,
            Timestamp::POST_STREAM,
            Timestamp::ONE_OVER_POST_STREAM,
            Timestamp::DONE,
        ];
        assert!(ordered.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn classification() {
        assert!(Timestamp::new(10).is_range_value());
        assert!(!Timestamp::new(10).is_special_value());
        assert!(Timestamp::MIN.is_special_value());
        assert!(Timestamp::MIN.is_range_value());
        assert!(!Timestamp::DONE.is_range_value());
        assert!(Timestamp::PRE_STREAM.is_allowed_in_stream());
        assert!(Timestamp::POST_STREAM.is_allowed_in_stream());
        assert!(!Timestamp::UNSET.is_allowed_in_stream());
        assert!(!Timestamp::ONE_OVER_POST_STREAM.is_allowed_in_stream());
    }

    #[test]
    fn next_and_previous_allowed() {
        assert_eq!(Timestamp::new(4).next_allowed_in_stream(), Timestamp::new(5));
        assert_eq!(Timestamp::MAX.next_allowed_in_stream(), Timestamp::ONE_OVER_POST_STREAM);
        assert_eq!(Timestamp::PRE_STREAM.next_allowed_in_stream(), Timestamp::ONE_OVER_POST_STREAM);
        assert_eq!(Timestamp::UNSET.next_allowed_in_stream(), Timestamp::MIN);

        assert_eq!(Timestamp::new(4).previous_allowed_in_stream(), Timestamp::new(3));
        assert_eq!(Timestamp::MIN.previous_allowed_in_stream(), Timestamp::UNSTARTED);
        assert_eq!(Timestamp::POST_STREAM.previous_allowed_in_stream(), Timestamp::UNSTARTED);
        assert_eq!(Timestamp::DONE.previous_allowed_in_stream(), Timestamp::MAX);
    }

    #[test]
    fn arithmetic_saturates() {
        let mut ts = Timestamp::new(41);
        ts += 1;
        assert_eq!(ts, Timestamp::new(42));
        assert_eq!(ts - Timestamp::new(40), 2);
        assert_eq!(Timestamp::DONE + 5, Timestamp::DONE);
        assert_eq!(Timestamp::UNSET - 5, Timestamp::UNSET);
        assert_eq!(Timestamp::DONE.checked_add(1), None);
    }

    #[test]
    fn display_and_parse() {
        assert_eq!(Timestamp::new(-7).to_string(), "-7");
        assert_eq!(Timestamp::POST_STREAM.to_string(), "PostStream");
        assert_eq!("Done".parse::<Timestamp>().unwrap(), Timestamp::DONE);
        assert_eq!(" 123 ".parse::<Timestamp>().unwrap(), Timestamp::new(123));
        assert!("soon".parse::<Timestamp>().is_err());
    }

    #[test]
    fn seconds_round_trip() {
        let ts = Timestamp::from_seconds(1.5);
        assert_eq!(ts.microseconds(), 1_500_000);
        assert!((ts.seconds() - 1.5).abs() < f64::EPSILON);
    }
}
