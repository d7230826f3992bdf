// SPDX-FileCopyrightText: © 2025 FrameKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Element transfer between a batch packet and per-item packets.
//!
//! [`LoopCollection`] describes the container flowing on ITERABLE ports;
//! [`LoopElement`] decides how each element crosses into its own ITEM packet
//! and back. Three policies are provided, selected per element type with a
//! macro:
//!
//! - [`copied_loop_element!`]: fundamental types. Each item packet owns a
//!   copy; the aggregator copies it back.
//! - [`viewed_loop_element!`]: clonable structured types. Each item packet
//!   is a view `(batch packet, index)` into the original container, which
//!   stays alive until the last view is dropped. The aggregator clones.
//! - [`moved_loop_element!`]: non-copyable types. The batch must be held
//!   exclusively; elements are moved out into their own packets and the
//!   aggregator takes them back by ownership.

use std::any::{type_name, Any};
use std::marker::PhantomData;
use std::sync::Arc;

pub use framekit_core::{FrameKitError, Packet, PacketError, PayloadView};

/// A container that can be fanned out item by item.
pub trait LoopCollection: Default + Send + Sync + 'static {
    type Item: LoopElement;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn item(&self, index: usize) -> Option<&Self::Item>;

    fn push_item(&mut self, item: Self::Item);

    fn into_items(self) -> Vec<Self::Item>;
}

impl<T: LoopElement> LoopCollection for Vec<T> {
    type Item = T;

    fn len(&self) -> usize {
        Self::len(self)
    }

    fn item(&self, index: usize) -> Option<&T> {
        self.get(index)
    }

    fn push_item(&mut self, item: T) {
        self.push(item);
    }

    fn into_items(self) -> Vec<T> {
        self
    }
}

/// How one element type travels through a begin/end loop pair.
pub trait LoopElement: Sized + Send + Sync + 'static {
    /// Splits `batch`, which must hold a `C`, into one untimed packet per element.
    ///
    /// # Errors
    ///
    /// Packet errors when `batch` is not a `C`; `FrameKitError::Internal`
    /// when the policy needs ownership and the batch is shared.
    fn scatter<C>(batch: Packet) -> Result<Vec<Packet>, FrameKitError>
    where
        C: LoopCollection<Item = Self>;

    /// Recovers an owned element from an item packet.
    ///
    /// # Errors
    ///
    /// Packet errors on type mismatch; `FrameKitError::Internal` when the
    /// policy needs ownership and the item is shared.
    fn gather(item: Packet) -> Result<Self, FrameKitError>;
}

/// Item packet payload aliasing element `index` of a batch packet.
struct ElementView<C> {
    batch: Packet,
    index: usize,
    _collection: PhantomData<fn() -> C>,
}

impl<C: LoopCollection> PayloadView for ElementView<C> {
    fn value(&self) -> Option<&(dyn Any + Send + Sync)> {
        let collection = self.batch.get::<C>().ok()?;
        collection.item(self.index).map(|item| item as &(dyn Any + Send + Sync))
    }

    fn type_name(&self) -> &'static str {
        type_name::<C::Item>()
    }
}

fn ownership_error(err: PacketError, what: &str) -> FrameKitError {
    match err {
        PacketError::NotExclusive { type_name } | PacketError::NotOwned { type_name } => {
            FrameKitError::Internal(format!(
                "cannot take ownership of {what} of non-copyable type {type_name}: \
                 it is still referenced elsewhere"
            ))
        },
        other => other.into(),
    }
}

/// Copies every element into a fresh packet.
///
/// # Errors
///
/// Packet errors when `batch` is not a `C`.
pub fn scatter_copied<C>(batch: &Packet) -> Result<Vec<Packet>, FrameKitError>
where
    C: LoopCollection,
    C::Item: Clone,
{
    let collection = batch.get::<C>()?;
    Ok((0..collection.len())
        .filter_map(|index| collection.item(index))
        .map(|item| Packet::new(item.clone()))
        .collect())
}

/// Exposes every element as a zero-copy view that keeps `batch` alive.
///
/// # Errors
///
/// Packet errors when `batch` is not a `C`.
pub fn scatter_viewed<C: LoopCollection>(batch: &Packet) -> Result<Vec<Packet>, FrameKitError> {
    let len = batch.get::<C>()?.len();
    Ok((0..len)
        .map(|index| {
            Packet::from_view(Arc::new(ElementView::<C> {
                batch: batch.clone(),
                index,
                _collection: PhantomData,
            }))
        })
        .collect())
}

/// Takes the container out of `batch` and moves each element into its own packet.
///
/// # Errors
///
/// `FrameKitError::Internal` if `batch` is shared.
pub fn scatter_moved<C: LoopCollection>(batch: Packet) -> Result<Vec<Packet>, FrameKitError> {
    let collection = batch.consume::<C>().map_err(|e| ownership_error(e, "batch"))?;
    Ok(collection.into_items().into_iter().map(Packet::new).collect())
}

/// # Errors
///
/// Packet errors on type mismatch.
pub fn gather_cloned<T: Any + Clone>(item: &Packet) -> Result<T, FrameKitError> {
    Ok(item.get::<T>()?.clone())
}

/// # Errors
///
/// `FrameKitError::Internal` if `item` is shared or a view.
pub fn gather_moved<T: Any + Send + Sync>(item: Packet) -> Result<T, FrameKitError> {
    item.consume::<T>().map_err(|e| ownership_error(e, "item"))
}

/// Implements [`LoopElement`] by copying.
#[macro_export]
macro_rules! copied_loop_element {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::core::loop_element::LoopElement for $ty {
            fn scatter<C>(
                batch: $crate::core::loop_element::Packet,
            ) -> ::std::result::Result<
                ::std::vec::Vec<$crate::core::loop_element::Packet>,
                $crate::core::loop_element::FrameKitError,
            >
            where
                C: $crate::core::loop_element::LoopCollection<Item = Self>,
            {
                $crate::core::loop_element::scatter_copied::<C>(&batch)
            }

            fn gather(
                item: $crate::core::loop_element::Packet,
            ) -> ::std::result::Result<Self, $crate::core::loop_element::FrameKitError> {
                $crate::core::loop_element::gather_cloned::<Self>(&item)
            }
        }
    )+};
}

/// Implements [`LoopElement`] with zero-copy views into the batch.
#[macro_export]
macro_rules! viewed_loop_element {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::core::loop_element::LoopElement for $ty {
            fn scatter<C>(
                batch: $crate::core::loop_element::Packet,
            ) -> ::std::result::Result<
                ::std::vec::Vec<$crate::core::loop_element::Packet>,
                $crate::core::loop_element::FrameKitError,
            >
            where
                C: $crate::core::loop_element::LoopCollection<Item = Self>,
            {
                $crate::core::loop_element::scatter_viewed::<C>(&batch)
            }

            fn gather(
                item: $crate::core::loop_element::Packet,
            ) -> ::std::result::Result<Self, $crate::core::loop_element::FrameKitError> {
                $crate::core::loop_element::gather_cloned::<Self>(&item)
            }
        }
    )+};
}

/// Implements [`LoopElement`] by moving elements in and out of packets.
#[macro_export]
macro_rules! moved_loop_element {
    ($($ty:ty),+ $(,)?) => {$(
        impl $crate::core::loop_element::LoopElement for $ty {
            fn scatter<C>(
                batch: $crate::core::loop_element::Packet,
            ) -> ::std::result::Result<
                ::std::vec::Vec<$crate::core::loop_element::Packet>,
                $crate::core::loop_element::FrameKitError,
            >
            where
                C: $crate::core::loop_element::LoopCollection<Item = Self>,
            {
                $crate::core::loop_element::scatter_moved::<C>(batch)
            }

            fn gather(
                item: $crate::core::loop_element::Packet,
            ) -> ::std::result::Result<Self, $crate::core::loop_element::FrameKitError> {
                $crate::core::loop_element::gather_moved::<Self>(item)
            }
        }
    )+};
}

copied_loop_element!(
    i8,
    i16,
    i32,
    i64,
    isize,
    u8,
    u16,
    u32,
    u64,
    usize,
    f32,
    f64,
    bool,
    char,
    framekit_core::Timestamp
);

viewed_loop_element!(String);

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Handle(Box<u32>);

    crate::moved_loop_element!(Handle);

    #[test]
    fn copied_items_are_independent() {
        let batch = Packet::new(vec![1_i32, 2, 3]);
        let items = <i32 as LoopElement>::scatter::<Vec<i32>>(batch.clone()).unwrap();
        assert_eq!(items.len(), 3);
        assert!(items.iter().all(Packet::is_exclusive));
        assert_eq!(<i32 as LoopElement>::gather(items[2].clone()).unwrap(), 3);
    }

    #[test]
    fn viewed_items_alias_the_batch() {
        let batch = Packet::new(vec!["left".to_string(), "right".to_string()]);
        let items = <String as LoopElement>::scatter::<Vec<String>>(batch.clone()).unwrap();

        let original = &batch.get::<Vec<String>>().unwrap()[1];
        assert!(std::ptr::eq(items[1].get::<String>().unwrap(), original));

        drop(batch);
        assert_eq!(items[0].get::<String>().unwrap(), "left");
        assert_eq!(<String as LoopElement>::gather(items[1].clone()).unwrap(), "right");
    }

    #[test]
    fn moved_batch_requires_exclusive_owner() {
        let batch = Packet::new(vec![Handle(Box::new(1)), Handle(Box::new(2))]);
        let keep = batch.clone();
        let err = <Handle as LoopElement>::scatter::<Vec<Handle>>(batch).unwrap_err();
        assert!(matches!(err, FrameKitError::Internal(_)));

        let items = <Handle as LoopElement>::scatter::<Vec<Handle>>(keep).unwrap();
        assert_eq!(items.len(), 2);
        let first = items.into_iter().next().unwrap();
        assert_eq!(<Handle as LoopElement>::gather(first).unwrap(), Handle(Box::new(1)));
    }

    #[test]
    fn moved_item_shared_is_internal_error() {
        let item = Packet::new(Handle(Box::new(7)));
        let _other_holder = item.clone();
        let err = <Handle as LoopElement>::gather(item).unwrap_err();
        assert!(matches!(err, FrameKitError::Internal(_)));
    }

    #[test]
    fn wrong_batch_type_is_packet_error() {
        let batch = Packet::new(vec![1_u8]);
        let err = <i32 as LoopElement>::scatter::<Vec<i32>>(batch).unwrap_err();
        assert!(matches!(err, FrameKitError::Packet(PacketError::TypeMismatch { .. })));
    }
}
