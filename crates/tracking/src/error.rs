// SPDX-FileCopyrightText: © 2025 FrameKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use thiserror::Error;

/// Errors raised while loading tracking data or configuring a tracker.
///
/// Background tracking jobs never hand these back to the caller; they are
/// logged and the affected direction stops.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode tracking data: {0}")]
    Decode(String),

    #[error("Invalid cache file format '{0}'")]
    InvalidFormat(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(String),
}

impl From<serde_json::Error> for TrackerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

impl From<framekit_core::FrameKitError> for TrackerError {
    fn from(err: framekit_core::FrameKitError) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
