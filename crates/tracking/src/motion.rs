// SPDX-FileCopyrightText: © 2025 FrameKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! The per-frame tracking primitive.

use crate::chunk::FrameMotion;
use crate::options::TrackStepOptions;
use crate::timed_box::Quad;
use serde::{Deserialize, Serialize};

/// Tracking state carried from frame to frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionBoxState {
    pub top: f32,
    pub left: f32,
    pub width: f32,
    pub height: f32,
    pub rotation: f32,
    pub aspect_ratio: f32,
    /// Displacement applied by the last step.
    pub dx: f32,
    pub dy: f32,
    pub confidence: f32,
    pub quad: Option<Quad>,
}

impl MotionBoxState {
    fn contains(&self, x: f32, y: f32) -> bool {
        x >= self.left && x <= self.left + self.width && y >= self.top && y <= self.top + self.height
    }

    fn is_visible(&self) -> bool {
        self.left < 1.0 && self.left + self.width > 0.0 && self.top < 1.0 && self.top + self.height > 0.0
    }
}

/// Advances a box by one frame of motion. `None` means the track is lost.
pub trait TrackStep: Send + Sync {
    fn track_step(&self, state: &MotionBoxState, motion: &FrameMotion) -> Option<MotionBoxState>;
}

/// Moves the box by the mean displacement of the vectors starting inside it,
/// or by the global motion when too few do.
#[derive(Debug, Clone, Default)]
pub struct TranslationTracker {
    options: TrackStepOptions,
}

impl TranslationTracker {
    pub const fn new(options: TrackStepOptions) -> Self {
        Self { options }
    }
}

impl TrackStep for TranslationTracker {
    #[allow(clippy::cast_precision_loss)]
    fn track_step(&self, state: &MotionBoxState, motion: &FrameMotion) -> Option<MotionBoxState> {
        let (sum_dx, sum_dy, count) = motion
            .vectors
            .iter()
            .filter(|v| state.contains(v.x, v.y))
            .fold((0.0_f32, 0.0_f32, 0_usize), |(sx, sy, n), v| (sx + v.dx, sy + v.dy, n + 1));

        let (dx, dy, decay) = if count > 0 && count >= self.options.min_vectors_in_box {
            (sum_dx / count as f32, sum_dy / count as f32, self.options.confidence_decay)
        } else {
            (
                motion.global_dx,
                motion.global_dy,
                self.options.confidence_decay * self.options.global_motion_penalty,
            )
        };

        let next = MotionBoxState {
            top: state.top + dy,
            left: state.left + dx,
            dx,
            dy,
            confidence: state.confidence * decay,
            quad: state.quad.map(|q| q.translated(dx, dy)),
            ..state.clone()
        };
        (next.confidence >= self.options.min_confidence && next.is_visible()).then_some(next)
    }
}
