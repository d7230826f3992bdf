// SPDX-FileCopyrightText: © 2025 FrameKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use crate::motion::MotionBoxState;
use serde::{Deserialize, Serialize};

/// Four corners as `[x0, y0, x1, y1, x2, y2, x3, y3]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quad {
    pub vertices: [f32; 8],
}

impl Quad {
    #[must_use]
    pub fn translated(&self, dx: f32, dy: f32) -> Self {
        let mut vertices = self.vertices;
        for pair in vertices.chunks_exact_mut(2) {
            pair[0] += dx;
            pair[1] += dy;
        }
        Self { vertices }
    }

    fn weighted(&self, alpha: f32, other: &Self, beta: f32) -> Self {
        let mut vertices = [0.0; 8];
        for (i, v) in vertices.iter_mut().enumerate() {
            *v = self.vertices[i].mul_add(alpha, other.vertices[i] * beta);
        }
        Self { vertices }
    }
}

/// A tracked box at one point in time, in normalized frame coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedBox {
    pub time_msec: i64,
    pub id: i32,
    pub top: f32,
    pub left: f32,
    pub bottom: f32,
    pub right: f32,
    /// Radians, clockwise.
    #[serde(default)]
    pub rotation: f32,
    /// Width over height in pixels; non-positive when unknown.
    #[serde(default)]
    pub aspect_ratio: f32,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub quad: Option<Quad>,
    /// The box was re-acquired after being lost.
    #[serde(default)]
    pub reacquisition: bool,
}

const fn default_confidence() -> f32 {
    1.0
}

impl Default for TimedBox {
    fn default() -> Self {
        Self {
            time_msec: 0,
            id: -1,
            top: 0.0,
            left: 0.0,
            bottom: 0.0,
            right: 0.0,
            rotation: 0.0,
            aspect_ratio: -1.0,
            confidence: default_confidence(),
            quad: None,
            reacquisition: false,
        }
    }
}

impl TimedBox {
    pub fn new(time_msec: i64, top: f32, left: f32, bottom: f32, right: f32) -> Self {
        Self { time_msec, top, left, bottom, right, ..Self::default() }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn from_state(state: &MotionBoxState, time_msec: i64, id: i32) -> Self {
        Self {
            time_msec,
            id,
            top: state.top,
            left: state.left,
            bottom: state.top + state.height,
            right: state.left + state.width,
            rotation: state.rotation,
            aspect_ratio: state.aspect_ratio,
            confidence: state.confidence,
            quad: state.quad,
            reacquisition: false,
        }
    }

    pub fn to_state(&self) -> MotionBoxState {
        MotionBoxState {
            top: self.top,
            left: self.left,
            width: self.width(),
            height: self.height(),
            rotation: self.rotation,
            aspect_ratio: self.aspect_ratio,
            dx: 0.0,
            dy: 0.0,
            confidence: self.confidence,
            quad: self.quad,
        }
    }

    /// `self * alpha + other * beta`, field by field. The time is blended
    /// the same way and rounded; the id is taken from `self`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn blend_weighted(&self, other: &Self, alpha: f64, beta: f64) -> Self {
        let a = alpha as f32;
        let b = beta as f32;
        let mix = |x: f32, y: f32| x.mul_add(a, y * b);
        let time = (self.time_msec as f64).mul_add(alpha, other.time_msec as f64 * beta);
        Self {
            time_msec: time.round() as i64,
            id: self.id,
            top: mix(self.top, other.top),
            left: mix(self.left, other.left),
            bottom: mix(self.bottom, other.bottom),
            right: mix(self.right, other.right),
            rotation: mix(self.rotation, other.rotation),
            aspect_ratio: mix(self.aspect_ratio, other.aspect_ratio),
            confidence: mix(self.confidence, other.confidence),
            quad: match (&self.quad, &other.quad) {
                (Some(q1), Some(q2)) => Some(q1.weighted(a, q2, b)),
                _ => None,
            },
            reacquisition: self.reacquisition || other.reacquisition,
        }
    }

    /// Linear interpolation: `alpha = 0` gives `self`, `alpha = 1` gives `other`.
    #[must_use]
    pub fn blend(&self, other: &Self, alpha: f64) -> Self {
        self.blend_weighted(other, 1.0 - alpha, alpha)
    }
}
