// SPDX-FileCopyrightText: © 2025 FrameKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Fans a collection out into one packet per element.
//!
//! Each element is emitted on ITEM at a loop-internal timestamp taken from a
//! private counter that starts at 0 and only ever moves forward. CLONE inputs
//! are replayed on the matching CLONE output alongside every item. A single
//! BATCH_END packet, carrying the external input timestamp as payload, closes
//! the batch at `counter - 1`.

use super::loop_element::{LoopCollection, LoopElement};
use super::parse_ports;
use framekit_core::pins::tags;
use framekit_core::{
    config_helpers, Calculator, CalculatorContext, CalculatorContract, FrameKitError, NodeFactory,
    Packet, PacketType, PortId, Timestamp,
};
use schemars::JsonSchema;
use serde::Deserialize;
use smallvec::SmallVec;
use std::marker::PhantomData;
use std::sync::Arc;

/// Ports connected to a begin-loop node, as `TAG` or `TAG:index`.
#[derive(Deserialize, Debug, Clone, JsonSchema)]
#[serde(default)]
pub struct BeginLoopConfig {
    /// `ITERABLE` plus any `CLONE:i` inputs.
    pub inputs: Vec<String>,
    /// `ITEM`, `BATCH_END` plus the `CLONE:i` outputs matching the inputs.
    pub outputs: Vec<String>,
}

impl Default for BeginLoopConfig {
    fn default() -> Self {
        Self {
            inputs: vec![tags::ITERABLE.to_string()],
            outputs: vec![tags::ITEM.to_string(), tags::BATCH_END.to_string()],
        }
    }
}

impl BeginLoopConfig {
    /// Default ports plus `num_clones` CLONE pairs.
    pub fn with_clones(num_clones: usize) -> Self {
        let mut config = Self::default();
        for index in 0..num_clones {
            config.inputs.push(format!("{}:{index}", tags::CLONE));
            config.outputs.push(format!("{}:{index}", tags::CLONE));
        }
        config
    }
}

pub struct BeginLoopNode<C: LoopCollection> {
    contract: CalculatorContract,
    iterable_port: PortId,
    item_port: PortId,
    batch_end_port: PortId,
    /// (input, output) pairs, ordered by index.
    clone_ports: Vec<(PortId, PortId)>,
    loop_internal_timestamp: Timestamp,
    _collection: PhantomData<fn() -> C>,
}

impl<C: LoopCollection> BeginLoopNode<C> {
    /// Validates the port layout and builds the node.
    ///
    /// # Errors
    ///
    /// `FrameKitError::Contract` for a missing ITERABLE/ITEM/BATCH_END port,
    /// unknown tags, or CLONE inputs that do not pair up with CLONE outputs.
    pub fn new(config: &BeginLoopConfig) -> Result<Self, FrameKitError> {
        let inputs = parse_ports(&config.inputs)?;
        let outputs = parse_ports(&config.outputs)?;

        let mut contract = CalculatorContract::new().with_process_timestamp_bounds(true);
        let mut clone_inputs = Vec::new();
        let mut clone_outputs = Vec::new();

        for port in inputs {
            match (port.tag.as_str(), port.index) {
                (tags::ITERABLE, 0) => contract = contract.input(port, PacketType::of::<C>()),
                (tags::CLONE, _) => {
                    clone_inputs.push(port.clone());
                    contract = contract.optional_input(port, PacketType::Any);
                },
                _ => {
                    return Err(FrameKitError::Contract(format!(
                        "begin loop: unexpected input '{port}'"
                    )))
                },
            }
        }
        for port in outputs {
            match (port.tag.as_str(), port.index) {
                (tags::ITEM, 0) => contract = contract.output(port, PacketType::of::<C::Item>()),
                (tags::BATCH_END, 0) => contract = contract.output(port, PacketType::Timestamp),
                (tags::CLONE, _) => {
                    clone_outputs.push(port.clone());
                    contract = contract.output(port, PacketType::Any);
                },
                _ => {
                    return Err(FrameKitError::Contract(format!(
                        "begin loop: unexpected output '{port}'"
                    )))
                },
            }
        }

        contract.validate()?;
        contract.require_input(tags::ITERABLE)?;
        contract.require_output(tags::ITEM)?;
        contract.require_output(tags::BATCH_END)?;

        clone_inputs.sort();
        clone_outputs.sort();
        if clone_inputs.len() != clone_outputs.len() {
            return Err(FrameKitError::Contract(format!(
                "begin loop: {} CLONE inputs but {} CLONE outputs",
                clone_inputs.len(),
                clone_outputs.len()
            )));
        }
        if clone_inputs.iter().zip(&clone_outputs).any(|(i, o)| i.index != o.index) {
            return Err(FrameKitError::Contract(
                "begin loop: CLONE input and output indices differ".to_string(),
            ));
        }

        Ok(Self {
            contract,
            iterable_port: PortId::tag(tags::ITERABLE),
            item_port: PortId::tag(tags::ITEM),
            batch_end_port: PortId::tag(tags::BATCH_END),
            clone_ports: clone_inputs.into_iter().zip(clone_outputs).collect(),
            loop_internal_timestamp: Timestamp::new(0),
            _collection: PhantomData,
        })
    }

    pub fn factory() -> NodeFactory {
        Arc::new(|params| {
            let config: BeginLoopConfig = config_helpers::parse_config_optional(params)?;
            Ok(Box::new(Self::new(&config)?))
        })
    }

    /// The timestamp the next item will be emitted at.
    pub const fn loop_internal_timestamp(&self) -> Timestamp {
        self.loop_internal_timestamp
    }
}

impl<C: LoopCollection> Calculator for BeginLoopNode<C> {
    fn contract(&self) -> &CalculatorContract {
        &self.contract
    }

    fn process(&mut self, ctx: &mut CalculatorContext<'_>) -> Result<(), FrameKitError> {
        let last_emitted = self.loop_internal_timestamp;
        let input_timestamp = ctx.input_timestamp();
        let iterable = ctx.inputs_mut().take(&self.iterable_port);

        if !iterable.is_empty() {
            let clones: SmallVec<[(PortId, Packet); 4]> = self
                .clone_ports
                .iter()
                .map(|(input, output)| (output.clone(), ctx.inputs().get(input).clone()))
                .filter(|(_, packet)| !packet.is_empty())
                .collect();

            for item in <C::Item as LoopElement>::scatter::<C>(iterable)? {
                let ts = self.loop_internal_timestamp;
                ctx.outputs().send(&self.item_port, item.at(ts))?;
                for (port, packet) in &clones {
                    ctx.outputs().send(port, packet.clone().at(ts))?;
                }
                self.loop_internal_timestamp += 1;
            }
        }

        // Nothing emitted: still consume one internal slot so that BATCH_END
        // has a timestamp of its own, and let downstream know it is settled.
        if self.loop_internal_timestamp == last_emitted {
            self.loop_internal_timestamp += 1;
            ctx.outputs().set_next_timestamp_bound_all(self.loop_internal_timestamp);
        }

        let batch_end_ts = self.loop_internal_timestamp - 1;
        ctx.outputs().send(&self.batch_end_port, Packet::new(input_timestamp).at(batch_end_ts))?;

        tracing::trace!(
            node = %ctx.node_name(),
            %input_timestamp,
            items = self.loop_internal_timestamp - last_emitted,
            %batch_end_ts,
            "Begin loop batch emitted"
        );
        Ok(())
    }
}
