// SPDX-FileCopyrightText: © 2025 FrameKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Core data types that flow through FrameKit graphs.
//!
//! - [`Packet`]: Immutable, type-erased payload bound to one [`Timestamp`]
//! - [`PayloadView`]: Zero-copy alias into another packet's payload
//! - [`PacketType`]: Type descriptor for pre-flight contract checks

use crate::error::PacketError;
use crate::timestamp::Timestamp;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Describes the *type* of data carried on a port, used for contract validation.
#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize, JsonSchema)]
pub enum PacketType {
    /// Accepts or produces any payload.
    Any,
    /// A [`Timestamp`] payload (e.g. BATCH_END markers).
    Timestamp,
    /// A concrete Rust type, identified by its type name.
    Typed { type_name: String },
}

impl PacketType {
    pub fn of<T: 'static>() -> Self {
        if TypeId::of::<T>() == TypeId::of::<Timestamp>() {
            Self::Timestamp
        } else {
            Self::Typed { type_name: type_name::<T>().to_string() }
        }
    }
}

/// A read-only window onto a value owned elsewhere.
///
/// A view keeps whatever owns the value alive for as long as the view
/// itself lives; the typical implementation holds a clone of a batch
/// [`Packet`] together with an element index.
pub trait PayloadView: Send + Sync {
    /// The viewed value, or `None` if the owner no longer contains it.
    fn value(&self) -> Option<&(dyn Any + Send + Sync)>;

    fn type_name(&self) -> &'static str;
}

#[derive(Clone)]
enum Payload {
    Owned { data: Arc<dyn Any + Send + Sync>, type_name: &'static str },
    View(Arc<dyn PayloadView>),
}

/// One immutable value tagged with exactly one timestamp.
///
/// Cloning is cheap: the payload is reference counted. [`Packet::at`]
/// rebinds a packet to another timestamp without adding a holder, so
/// `Packet::new(value).at(ts)` stays the sole owner of `value`.
#[derive(Clone)]
pub struct Packet {
    payload: Option<Payload>,
    timestamp: Timestamp,
}

impl Packet {
    /// Adopts `value` as the payload. The timestamp starts as `UNSET`.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            payload: Some(Payload::Owned { data: Arc::new(value), type_name: type_name::<T>() }),
            timestamp: Timestamp::UNSET,
        }
    }

    /// A packet without payload. Absent inputs are presented as empty packets.
    pub const fn empty() -> Self {
        Self { payload: None, timestamp: Timestamp::UNSET }
    }

    pub fn from_view(view: Arc<dyn PayloadView>) -> Self {
        Self { payload: Some(Payload::View(view)), timestamp: Timestamp::UNSET }
    }

    /// Moves this payload to `timestamp`. Clone first to keep the original.
    #[must_use]
    pub fn at(self, timestamp: Timestamp) -> Self {
        Self { payload: self.payload, timestamp }
    }

    pub const fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub const fn is_empty(&self) -> bool {
        self.payload.is_none()
    }

    /// Name of the payload type, `None` for empty packets.
    pub fn type_name(&self) -> Option<&'static str> {
        match &self.payload {
            None => None,
            Some(Payload::Owned { type_name, .. }) => Some(*type_name),
            Some(Payload::View(view)) => Some(view.type_name()),
        }
    }

    /// True if the payload is owned by this packet and no other packet shares it.
    pub fn is_exclusive(&self) -> bool {
        matches!(&self.payload, Some(Payload::Owned { data, .. }) if Arc::strong_count(data) == 1)
    }

    /// Borrows the payload as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`PacketError::Empty`] for empty packets and
    /// [`PacketError::TypeMismatch`] if the payload is not a `T`.
    pub fn get<T: Any>(&self) -> Result<&T, PacketError> {
        let (value, actual): (Option<&(dyn Any + Send + Sync)>, &'static str) =
            match &self.payload {
                None => return Err(PacketError::Empty),
                Some(Payload::Owned { data, type_name }) => (Some(&**data), *type_name),
                Some(Payload::View(view)) => (view.value(), view.type_name()),
            };
        value
            .and_then(|v| v.downcast_ref::<T>())
            .ok_or(PacketError::TypeMismatch { expected: type_name::<T>(), actual })
    }

    /// Takes ownership of the payload.
    ///
    /// Succeeds only when this packet owns a `T` that no other packet shares.
    ///
    /// # Errors
    ///
    /// - [`PacketError::Empty`] for empty packets
    /// - [`PacketError::NotOwned`] for view packets
    /// - [`PacketError::TypeMismatch`] if the payload is not a `T`
    /// - [`PacketError::NotExclusive`] if another holder still references it
    pub fn consume<T: Any + Send + Sync>(self) -> Result<T, PacketError> {
        match self.payload {
            None => Err(PacketError::Empty),
            Some(Payload::View(view)) => Err(PacketError::NotOwned { type_name: view.type_name() }),
            Some(Payload::Owned { data, type_name: actual }) => {
                let typed = data.downcast::<T>().map_err(|_| PacketError::TypeMismatch {
                    expected: type_name::<T>(),
                    actual,
                })?;
                Arc::try_unwrap(typed).map_err(|_| PacketError::NotExclusive { type_name: actual })
            },
        }
    }
}

impl Default for Packet {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Packet")
            .field("type", &self.type_name().unwrap_or("<empty>"))
            .field("timestamp", &self.timestamp)
            .finish()
    }
}
