// SPDX-FileCopyrightText: © 2025 FrameKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Stored track results.
//!
//! A [`Path`] maps each checkpoint (the time a track was started at) to the
//! [`PathSegment`] tracked forward and backward from it.

use crate::motion::MotionBoxState;
use crate::timed_box::TimedBox;
use std::collections::BTreeMap;

/// How far past the first or last stored box a query may still be answered.
pub const MAX_EXTRAPOLATION_MSEC: i64 = 67;

#[derive(Debug, Clone, PartialEq)]
pub struct PathEntry {
    pub timed_box: TimedBox,
    /// Only kept when the tracker records path states.
    pub state: Option<MotionBoxState>,
}

/// Boxes of one checkpoint, keyed by time.
#[derive(Debug, Clone, Default)]
pub struct PathSegment {
    entries: BTreeMap<i64, PathEntry>,
}

impl PathSegment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `entry` unless a box already exists at its time.
    pub fn insert(&mut self, entry: PathEntry) -> bool {
        match self.entries.entry(entry.timed_box.time_msec) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            },
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first_time(&self) -> Option<i64> {
        self.entries.keys().next().copied()
    }

    pub fn last_time(&self) -> Option<i64> {
        self.entries.keys().next_back().copied()
    }

    pub fn boxes(&self) -> Vec<TimedBox> {
        self.entries.values().map(|entry| entry.timed_box.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathEntry> {
        self.entries.values()
    }

    /// The box at `time_msec`: stored, interpolated between the two stored
    /// neighbours, or the nearest boundary box when the query lies at most
    /// [`MAX_EXTRAPOLATION_MSEC`] outside the segment.
    #[allow(clippy::cast_precision_loss)]
    pub fn box_at(&self, time_msec: i64) -> Option<(TimedBox, Option<MotionBoxState>)> {
        let before = self.entries.range(..=time_msec).next_back();
        let after = self.entries.range(time_msec..).next();

        match (before, after) {
            (Some((&t0, lower)), Some((&t1, upper))) => {
                if t0 == t1 {
                    return Some((lower.timed_box.clone(), lower.state.clone()));
                }
                let alpha = (time_msec - t0) as f64 / (t1 - t0) as f64;
                let mut timed_box = lower.timed_box.blend(&upper.timed_box, alpha);
                timed_box.time_msec = time_msec;
                let state = if alpha < 0.5 { lower.state.clone() } else { upper.state.clone() };
                Some((timed_box, state))
            },
            (Some((&t0, entry)), None) if time_msec - t0 <= MAX_EXTRAPOLATION_MSEC => {
                Some(extrapolated(entry, time_msec))
            },
            (None, Some((&t1, entry))) if t1 - time_msec <= MAX_EXTRAPOLATION_MSEC => {
                Some(extrapolated(entry, time_msec))
            },
            _ => None,
        }
    }
}

fn extrapolated(entry: &PathEntry, time_msec: i64) -> (TimedBox, Option<MotionBoxState>) {
    let mut timed_box = entry.timed_box.clone();
    timed_box.time_msec = time_msec;
    (timed_box, entry.state.clone())
}

/// All segments of one object id, keyed by checkpoint.
#[derive(Debug, Clone, Default)]
pub struct Path {
    segments: BTreeMap<i64, PathSegment>,
}

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn segment(&self, checkpoint: i64) -> Option<&PathSegment> {
        self.segments.get(&checkpoint)
    }

    /// The segment for `checkpoint`, created empty if missing.
    pub fn segment_mut(&mut self, checkpoint: i64) -> &mut PathSegment {
        self.segments.entry(checkpoint).or_default()
    }

    pub fn remove(&mut self, checkpoint: i64) -> Option<PathSegment> {
        self.segments.remove(&checkpoint)
    }

    pub fn checkpoints(&self) -> Vec<i64> {
        self.segments.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Position at `time_msec`, blending the segments of the checkpoints
    /// bracketing it by their distance to the query.
    #[allow(clippy::cast_precision_loss)]
    pub fn timed_position(&self, time_msec: i64) -> Option<(TimedBox, Option<MotionBoxState>)> {
        let before = self.segments.range(..=time_msec).next_back();
        let after = self.segments.range(time_msec.saturating_add(1)..).next();

        match (before, after) {
            (Some((&c0, lower)), Some((&c1, upper))) => {
                match (lower.box_at(time_msec), upper.box_at(time_msec)) {
                    (Some((box0, state0)), Some((box1, state1))) => {
                        let alpha = (time_msec - c0) as f64 / (c1 - c0) as f64;
                        let mut timed_box = box0.blend(&box1, alpha);
                        timed_box.time_msec = time_msec;
                        Some((timed_box, if alpha < 0.5 { state0 } else { state1 }))
                    },
                    (Some(side), None) | (None, Some(side)) => Some(side),
                    (None, None) => None,
                }
            },
            (Some((_, segment)), None) | (None, Some((_, segment))) => segment.box_at(time_msec),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn entry(time_msec: i64, left: f32) -> PathEntry {
        PathEntry { timed_box: TimedBox::new(time_msec, 0.0, left, 0.1, left + 0.1), state: None }
    }

    fn segment(points: &[(i64, f32)]) -> PathSegment {
        let mut segment = PathSegment::new();
        for &(t, left) in points {
            segment.insert(entry(t, left));
        }
        segment
    }

    #[test]
    fn duplicate_insert_is_noop() {
        let mut segment = segment(&[(0, 0.1)]);
        assert!(!segment.insert(entry(0, 0.9)));
        assert_eq!(segment.len(), 1);
        assert!((segment.boxes()[0].left - 0.1).abs() < 1e-6);
    }

    #[test]
    fn box_at_interpolates_and_extrapolates() {
        let segment = segment(&[(100, 0.1), (200, 0.3)]);
        let (exact, _) = segment.box_at(200).unwrap();
        assert!((exact.left - 0.3).abs() < 1e-6);

        let (mid, _) = segment.box_at(150).unwrap();
        assert_eq!(mid.time_msec, 150);
        assert!((mid.left - 0.2).abs() < 1e-6);

        let (late, _) = segment.box_at(267).unwrap();
        assert_eq!(late.time_msec, 267);
        assert!((late.left - 0.3).abs() < 1e-6);
        assert!(segment.box_at(268).is_none());

        assert!(segment.box_at(33).is_some());
        assert!(segment.box_at(32).is_none());
        assert!(PathSegment::new().box_at(0).is_none());
    }

    #[test]
    fn path_blends_between_checkpoints() {
        let mut path = Path::new();
        *path.segment_mut(0) = segment(&[(0, 0.0), (100, 0.2)]);
        *path.segment_mut(100) = segment(&[(0, 0.4), (100, 0.6)]);

        // alpha = 0.25 between 0.05 (first checkpoint) and 0.45 (second).
        let (timed, _) = path.timed_position(25).unwrap();
        assert!((timed.left - 0.15).abs() < 1e-6);

        let (at_checkpoint, _) = path.timed_position(100).unwrap();
        assert!((at_checkpoint.left - 0.6).abs() < 1e-6);
        assert_eq!(path.checkpoints(), vec![0, 100]);
    }

    #[test]
    fn path_uses_the_side_that_has_a_box() {
        let mut path = Path::new();
        *path.segment_mut(0) = segment(&[(0, 0.0), (50, 0.1)]);
        *path.segment_mut(1000) = segment(&[(900, 0.5), (1000, 0.6)]);

        let (early, _) = path.timed_position(40).unwrap();
        assert!((early.left - 0.08).abs() < 1e-6);
        let (late, _) = path.timed_position(950).unwrap();
        assert!((late.left - 0.55).abs() < 1e-6);
        assert!(path.timed_position(500).is_none());
        assert!(path.timed_position(2000).is_none());

        path.remove(0);
        assert!(path.timed_position(40).is_none());
        assert!(Path::new().timed_position(0).is_none());
    }
}
