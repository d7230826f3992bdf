// SPDX-FileCopyrightText: © 2025 FrameKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Cached tracking data.
//!
//! A chunk covers `caching_chunk_size_msec` of video and holds one
//! [`ChunkItem`] per frame. Each item's motion maps positions in its own frame
//! to positions in the previous frame, so backward tracking uses it directly
//! and forward tracking uses its inverse.

use crate::error::{Result, TrackerError};
use serde::{Deserialize, Serialize};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One displacement sample at `(x, y)`, in normalized frame coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionVector {
    pub x: f32,
    pub y: f32,
    pub dx: f32,
    pub dy: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameMotion {
    /// Camera motion, used where no local vector is available.
    pub global_dx: f32,
    pub global_dy: f32,
    #[serde(default)]
    pub vectors: Vec<MotionVector>,
}

impl FrameMotion {
    /// The same field expressed in the opposite direction: every vector
    /// starts where it used to end and points back.
    #[must_use]
    pub fn inverted(&self) -> Self {
        Self {
            global_dx: -self.global_dx,
            global_dy: -self.global_dy,
            vectors: self
                .vectors
                .iter()
                .map(|v| MotionVector { x: v.x + v.dx, y: v.y + v.dy, dx: -v.dx, dy: -v.dy })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkItem {
    pub timestamp_usec: i64,
    /// Motion from this frame to the previous one.
    pub motion: FrameMotion,
}

impl ChunkItem {
    pub const fn time_msec(&self) -> i64 {
        self.timestamp_usec / 1000
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackingDataChunk {
    pub items: Vec<ChunkItem>,
    /// No chunk precedes this one.
    #[serde(default)]
    pub first_chunk: bool,
    /// No chunk follows this one.
    #[serde(default)]
    pub last_chunk: bool,
}

impl TrackingDataChunk {
    pub fn time_msec(&self, frame: usize) -> Option<i64> {
        self.items.get(frame).map(ChunkItem::time_msec)
    }

    /// Index of the frame closest in time to `time_msec`. Ties go to the
    /// earlier frame.
    pub fn closest_frame_index(&self, time_msec: i64) -> Option<usize> {
        if self.items.is_empty() {
            return None;
        }
        let upper = self.items.partition_point(|item| item.time_msec() < time_msec);
        if upper == 0 {
            return Some(0);
        }
        if upper == self.items.len() {
            return Some(upper - 1);
        }
        let before = time_msec - self.items[upper - 1].time_msec();
        let after = self.items[upper].time_msec() - time_msec;
        Some(if after < before { upper } else { upper - 1 })
    }
}

/// Serialization of chunk files.
pub trait ChunkCodec: Send + Sync {
    /// # Errors
    ///
    /// `TrackerError::Decode` for bytes that are not a chunk.
    fn decode(&self, bytes: &[u8]) -> Result<TrackingDataChunk>;

    /// # Errors
    ///
    /// `TrackerError::Decode` if the chunk cannot be represented.
    fn encode(&self, chunk: &TrackingDataChunk) -> Result<Vec<u8>>;
}

/// Chunks stored as JSON documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonChunkCodec;

impl ChunkCodec for JsonChunkCodec {
    fn decode(&self, bytes: &[u8]) -> Result<TrackingDataChunk> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn encode(&self, chunk: &TrackingDataChunk) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(chunk)?)
    }
}

/// A chunk as held by a tracking job.
///
/// Owned chunks belong to the job and are copied when another job needs
/// them; external chunks were supplied by the caller and are only shared.
#[derive(Debug, Clone)]
pub enum ChunkHandle {
    Owned(Box<TrackingDataChunk>),
    External(Arc<TrackingDataChunk>),
}

impl ChunkHandle {
    pub const fn owns_data(&self) -> bool {
        matches!(self, Self::Owned(_))
    }

    /// A handle for another job: owned data is deep-copied, external data is shared.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        match self {
            Self::Owned(chunk) => Self::Owned(chunk.clone()),
            Self::External(chunk) => Self::External(Arc::clone(chunk)),
        }
    }
}

impl Deref for ChunkHandle {
    type Target = TrackingDataChunk;

    fn deref(&self) -> &TrackingDataChunk {
        match self {
            Self::Owned(chunk) => &**chunk,
            Self::External(chunk) => &**chunk,
        }
    }
}

/// Chunk holding `time_msec`. Negative times land in negative chunks.
pub const fn chunk_index_for_msec(time_msec: i64, chunk_size_msec: i64) -> i64 {
    time_msec.div_euclid(chunk_size_msec)
}

enum FormatPiece<'a> {
    Literal(&'a str),
    Percent,
    Integer { zero_pad: bool, width: usize },
}

fn parse_format(format: &str) -> Result<Vec<FormatPiece<'_>>> {
    let invalid = || TrackerError::InvalidFormat(format.to_string());
    let mut pieces = Vec::new();
    let mut rest = format;
    while let Some(pos) = rest.find('%') {
        if pos > 0 {
            pieces.push(FormatPiece::Literal(&rest[..pos]));
        }
        let spec = &rest[pos + 1..];
        if let Some(after) = spec.strip_prefix('%') {
            pieces.push(FormatPiece::Percent);
            rest = after;
            continue;
        }
        let zero_pad = spec.starts_with('0');
        let digits = spec.bytes().take_while(u8::is_ascii_digit).count();
        let width = if digits == 0 { 0 } else { spec[..digits].parse().map_err(|_| invalid())? };
        match spec[digits..].chars().next() {
            Some('d' | 'i') => {
                pieces.push(FormatPiece::Integer { zero_pad, width });
                rest = &spec[digits + 1..];
            },
            _ => return Err(invalid()),
        }
    }
    if !rest.is_empty() {
        pieces.push(FormatPiece::Literal(rest));
    }
    Ok(pieces)
}

/// Checks that `format` has exactly one integer conversion.
///
/// # Errors
///
/// `TrackerError::InvalidFormat` otherwise.
pub fn validate_file_format(format: &str) -> Result<()> {
    let conversions = parse_format(format)?
        .iter()
        .filter(|piece| matches!(piece, FormatPiece::Integer { .. }))
        .count();
    if conversions == 1 {
        Ok(())
    } else {
        Err(TrackerError::InvalidFormat(format.to_string()))
    }
}

/// Expands a printf-style pattern (`%d`, `%i`, `%Nd`, `%0Nd`, `%%`) with `index`.
///
/// # Errors
///
/// `TrackerError::InvalidFormat` for unsupported conversions or a pattern
/// without exactly one integer conversion.
pub fn format_chunk_file_name(format: &str, index: i64) -> Result<String> {
    validate_file_format(format)?;
    let mut name = String::with_capacity(format.len() + 8);
    for piece in parse_format(format)? {
        match piece {
            FormatPiece::Literal(text) => name.push_str(text),
            FormatPiece::Percent => name.push('%'),
            FormatPiece::Integer { zero_pad: true, width } => {
                name.push_str(&format!("{index:0width$}"));
            },
            FormatPiece::Integer { zero_pad: false, width } => {
                name.push_str(&format!("{index:width$}"));
            },
        }
    }
    Ok(name)
}

/// # Errors
///
/// `TrackerError::InvalidFormat` for a bad pattern.
pub fn chunk_file_path(cache_dir: &Path, format: &str, index: i64) -> Result<PathBuf> {
    Ok(cache_dir.join(format_chunk_file_name(format, index)?))
}

/// # Errors
///
/// I/O and decode failures.
pub fn read_chunk_file(path: &Path, codec: &dyn ChunkCodec) -> Result<TrackingDataChunk> {
    let bytes = std::fs::read(path)?;
    codec.decode(&bytes)
}

/// Writes a chunk so that readers never observe a partial file: the data
/// goes to a temporary name first and is renamed into place.
///
/// # Errors
///
/// I/O, encode and format failures.
pub fn write_chunk_file(
    cache_dir: &Path,
    format: &str,
    index: i64,
    chunk: &TrackingDataChunk,
    codec: &dyn ChunkCodec,
) -> Result<PathBuf> {
    let path = chunk_file_path(cache_dir, format, index)?;
    let mut tmp_name = path.file_name().map(std::ffi::OsStr::to_os_string).unwrap_or_default();
    tmp_name.push(".partial");
    let tmp_path = path.with_file_name(tmp_name);

    std::fs::write(&tmp_path, codec.encode(chunk)?)?;
    std::fs::rename(&tmp_path, &path)?;
    tracing::trace!(chunk_idx = index, path = %path.display(), "Wrote tracking chunk");
    Ok(path)
}
