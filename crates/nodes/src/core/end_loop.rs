// SPDX-FileCopyrightText: © 2025 FrameKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Folds per-item packets back into one collection.
//!
//! Items are accumulated until a BATCH_END packet arrives. Its payload is the
//! external timestamp of the batch: the collection is emitted on ITERABLE at
//! that timestamp. A batch with no items produces no packet at all, only a
//! bound of `payload + 1` on ITERABLE. An empty collection is never
//! fabricated.

use super::loop_element::{LoopCollection, LoopElement};
use super::parse_ports;
use framekit_core::pins::tags;
use framekit_core::{
    config_helpers, Calculator, CalculatorContext, CalculatorContract, FrameKitError, NodeFactory,
    Packet, PacketType, PortId, Timestamp,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;

/// Ports connected to an end-loop node.
#[derive(Deserialize, Debug, Clone, JsonSchema)]
#[serde(default)]
pub struct EndLoopConfig {
    /// `ITEM` and `BATCH_END`.
    pub inputs: Vec<String>,
    /// `ITERABLE`.
    pub outputs: Vec<String>,
}

impl Default for EndLoopConfig {
    fn default() -> Self {
        Self {
            inputs: vec![tags::ITEM.to_string(), tags::BATCH_END.to_string()],
            outputs: vec![tags::ITERABLE.to_string()],
        }
    }
}

pub struct EndLoopNode<C: LoopCollection> {
    contract: CalculatorContract,
    item_port: PortId,
    batch_end_port: PortId,
    iterable_port: PortId,
    accumulator: Option<C>,
}

impl<C: LoopCollection> EndLoopNode<C> {
    /// # Errors
    ///
    /// `FrameKitError::Contract` for missing ITEM/BATCH_END/ITERABLE ports or unknown tags.
    pub fn new(config: &EndLoopConfig) -> Result<Self, FrameKitError> {
        let mut contract = CalculatorContract::new();
        for port in parse_ports(&config.inputs)? {
            match (port.tag.as_str(), port.index) {
                (tags::ITEM, 0) => contract = contract.input(port, PacketType::of::<C::Item>()),
                (tags::BATCH_END, 0) => contract = contract.input(port, PacketType::Timestamp),
                _ => {
                    return Err(FrameKitError::Contract(format!(
                        "end loop: unexpected input '{port}'"
                    )))
                },
            }
        }
        for port in parse_ports(&config.outputs)? {
            match (port.tag.as_str(), port.index) {
                (tags::ITERABLE, 0) => contract = contract.output(port, PacketType::of::<C>()),
                _ => {
                    return Err(FrameKitError::Contract(format!(
                        "end loop: unexpected output '{port}'"
                    )))
                },
            }
        }

        contract.validate()?;
        contract.require_input(tags::ITEM)?;
        contract.require_input(tags::BATCH_END)?;
        contract.require_output(tags::ITERABLE)?;

        Ok(Self {
            contract,
            item_port: PortId::tag(tags::ITEM),
            batch_end_port: PortId::tag(tags::BATCH_END),
            iterable_port: PortId::tag(tags::ITERABLE),
            accumulator: None,
        })
    }

    pub fn factory() -> NodeFactory {
        Arc::new(|params| {
            let config: EndLoopConfig = config_helpers::parse_config_optional(params)?;
            Ok(Box::new(Self::new(&config)?))
        })
    }

    /// Number of items collected for the open batch, if any.
    pub fn pending_items(&self) -> Option<usize> {
        self.accumulator.as_ref().map(LoopCollection::len)
    }
}

impl<C: LoopCollection> Calculator for EndLoopNode<C> {
    fn contract(&self) -> &CalculatorContract {
        &self.contract
    }

    fn process(&mut self, ctx: &mut CalculatorContext<'_>) -> Result<(), FrameKitError> {
        let item = ctx.inputs_mut().take(&self.item_port);
        if !item.is_empty() {
            let value = <C::Item as LoopElement>::gather(item)?;
            self.accumulator.get_or_insert_with(C::default).push_item(value);
        }

        let batch_end = ctx.inputs().get(&self.batch_end_port);
        if batch_end.is_empty() {
            return Ok(());
        }
        let batch_timestamp = *batch_end.get::<Timestamp>()?;

        match self.accumulator.take() {
            Some(collection) => {
                tracing::trace!(
                    node = %ctx.node_name(),
                    %batch_timestamp,
                    items = collection.len(),
                    "End loop batch flushed"
                );
                ctx.outputs().send(&self.iterable_port, Packet::new(collection).at(batch_timestamp))
            },
            None => {
                tracing::trace!(node = %ctx.node_name(), %batch_timestamp, "End loop batch was empty");
                ctx.outputs().set_next_timestamp_bound(
                    &self.iterable_port,
                    batch_timestamp.next_allowed_in_stream(),
                )
            },
        }
    }
}
