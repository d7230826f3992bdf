// SPDX-FileCopyrightText: © 2025 FrameKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Structured error types for FrameKit.
//!
//! [`FrameKitError`] is the error surfaced by calculators and graph-building
//! code. [`PacketError`] is the narrower error produced by typed packet
//! access, which fails closed instead of guessing.

use crate::timestamp::Timestamp;
use thiserror::Error;

/// Main error type for FrameKit operations.
#[derive(Debug, Error)]
pub enum FrameKitError {
    /// Configuration or parameter validation error.
    ///
    /// Examples:
    /// - Malformed node parameters
    /// - Unknown node kind in the registry
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Port contract violation detected while constructing a calculator.
    ///
    /// Examples:
    /// - Missing ITERABLE/ITEM/BATCH_END tag
    /// - CLONE input count differs from CLONE output count
    #[error("Contract error: {0}")]
    Contract(String),

    /// Runtime processing error during normal operation.
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Broken runtime invariant. Signals a wiring or programming defect,
    /// e.g. a shared non-copyable item reaching an aggregator.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Typed packet access failed.
    #[error("Packet error: {0}")]
    Packet(#[from] PacketError),

    /// A packet was published below the bound already promised on its stream.
    #[error("Timestamp {timestamp} on output '{port}' is not above the current bound {bound}")]
    TimestampBound { port: String, timestamp: Timestamp, bound: Timestamp },

    /// I/O error (file operations, device access).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from typed access to a [`Packet`](crate::types::Packet) payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("packet is empty")]
    Empty,

    #[error("type mismatch: expected {expected}, packet holds {actual}")]
    TypeMismatch { expected: &'static str, actual: &'static str },

    /// Ownership was requested but other holders still reference the payload.
    #[error("payload of type {type_name} is shared and cannot be taken")]
    NotExclusive { type_name: &'static str },

    /// Ownership was requested from a packet that only views another packet's payload.
    #[error("payload of type {type_name} is a view and cannot be taken")]
    NotOwned { type_name: &'static str },
}

/// Convenience type alias for Results using `FrameKitError`.
pub type Result<T> = std::result::Result<T, FrameKitError>;

impl From<FrameKitError> for String {
    fn from(err: FrameKitError) -> Self {
        err.to_string()
    }
}

// Generic string errors default to Runtime
impl From<String> for FrameKitError {
    fn from(s: String) -> Self {
        Self::Runtime(s)
    }
}

impl From<&str> for FrameKitError {
    fn from(s: &str) -> Self {
        Self::Runtime(s.to_string())
    }
}
