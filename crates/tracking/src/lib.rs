// SPDX-FileCopyrightText: © 2025 FrameKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! FrameKit Tracking - multi-object box tracking over cached motion data.
//!
//! ## Modules
//!
//! - [`box_tracker`]: The tracker, its checkpoints and cancellation
//! - [`chunk`]: Tracking data chunks and their cache files
//! - [`path`]: Stored boxes per object and position queries
//! - [`motion`]: The per-frame track step
//! - [`thread_pool`]: Worker threads running tracking jobs
//! - [`options`]: Tracker configuration

pub mod backoff;
pub mod box_tracker;
pub mod chunk;
pub mod error;
pub mod motion;
pub mod options;
pub mod path;
pub mod thread_pool;
pub mod timed_box;

pub use box_tracker::{BoxTracker, ChunkSource, INIT_CHECKPOINT, SNAP_DISTANCE_MSEC};
pub use chunk::{
    ChunkCodec, ChunkHandle, ChunkItem, FrameMotion, JsonChunkCodec, MotionVector,
    TrackingDataChunk,
};
pub use error::{Result, TrackerError};
pub use motion::{MotionBoxState, TrackStep, TranslationTracker};
pub use options::{BoxTrackerOptions, TrackStepOptions};
pub use path::{Path, PathEntry, PathSegment, MAX_EXTRAPOLATION_MSEC};
pub use thread_pool::ThreadPool;
pub use timed_box::{Quad, TimedBox};
