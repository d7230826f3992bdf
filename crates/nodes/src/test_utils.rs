// SPDX-FileCopyrightText: © 2025 FrameKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Test utilities for node testing.
//!
//! [`GraphHarness`] wires calculators into a small single-threaded graph and
//! schedules them with the readiness rules a real executor applies: a node
//! runs at timestamp `T` once every input either holds a packet at `T` or has
//! a bound above `T`. Nodes that process timestamp bounds are also invoked
//! with empty inputs when their settled input bound advances, and nodes that
//! declare a timestamp offset propagate bounds without being invoked.

use framekit_core::{
    Calculator, CalculatorContext, FrameKitError, InputSet, OutputSet, Packet, PacketType,
    PortId, StreamFlush, Timestamp,
};
use indexmap::IndexMap;
use std::collections::{HashMap, VecDeque};

#[derive(Debug)]
struct InputQueue {
    packets: VecDeque<Packet>,
    bound: Timestamp,
}

impl InputQueue {
    const fn open() -> Self {
        Self { packets: VecDeque::new(), bound: Timestamp::PRE_STREAM }
    }

    const fn closed() -> Self {
        Self { packets: VecDeque::new(), bound: Timestamp::DONE }
    }

    /// Lowest timestamp this queue can still deliver.
    fn settled(&self) -> Timestamp {
        self.packets.front().map_or(self.bound, Packet::timestamp)
    }

    fn push(&mut self, packet: Packet) -> Result<(), FrameKitError> {
        let timestamp = packet.timestamp();
        let bound = self.packets.back().map_or(self.bound, |p| p.timestamp().next_allowed_in_stream());
        if timestamp < bound {
            return Err(FrameKitError::TimestampBound { port: String::new(), timestamp, bound });
        }
        self.bound = self.bound.max(timestamp.next_allowed_in_stream());
        self.packets.push_back(packet);
        Ok(())
    }

    fn raise_bound(&mut self, bound: Timestamp) {
        self.bound = self.bound.max(bound);
    }
}

struct HarnessNode {
    name: String,
    calculator: Box<dyn Calculator>,
    queues: IndexMap<PortId, InputQueue>,
    outputs: OutputSet,
    output_streams: HashMap<PortId, String>,
    last_processed: Timestamp,
    invocations: usize,
}

impl HarnessNode {
    fn settled(&self) -> Timestamp {
        self.queues.values().map(InputQueue::settled).min().unwrap_or(Timestamp::DONE)
    }
}

/// A deterministic, single-threaded graph runner for calculator tests.
///
/// Nodes must be added in topological order. Streams with no consumer are
/// recorded and can be inspected with [`output`](Self::output).
#[derive(Default)]
pub struct GraphHarness {
    nodes: Vec<HarnessNode>,
    consumers: HashMap<String, Vec<(usize, PortId)>>,
    observed: HashMap<String, Vec<Packet>>,
    bounds: HashMap<String, Timestamp>,
}

impl GraphHarness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node reading `inputs` as `(port, stream)` and writing `outputs`.
    ///
    /// # Errors
    ///
    /// `FrameKitError::Contract` for ports the node does not declare or
    /// required inputs left unconnected, and anything `open` returns.
    pub fn add_node(
        &mut self,
        name: &str,
        mut calculator: Box<dyn Calculator>,
        inputs: &[(&str, &str)],
        outputs: &[(&str, &str)],
    ) -> Result<(), FrameKitError> {
        let index = self.nodes.len();
        let contract = calculator.contract().clone();

        let mut connected = HashMap::new();
        for (port, stream) in inputs {
            let port: PortId = port.parse()?;
            if !contract.inputs.iter().any(|pin| pin.port == port) {
                return Err(FrameKitError::Contract(format!("{name}: no input '{port}'")));
            }
            connected.insert(port, (*stream).to_string());
        }

        let mut queues = IndexMap::new();
        for pin in &contract.inputs {
            let queue = match connected.get(&pin.port) {
                Some(stream) => {
                    self.consumers
                        .entry(stream.clone())
                        .or_default()
                        .push((index, pin.port.clone()));
                    InputQueue::open()
                },
                None if pin.optional => InputQueue::closed(),
                None => {
                    return Err(FrameKitError::Contract(format!(
                        "{name}: required input '{}' is not connected",
                        pin.port
                    )))
                },
            };
            queues.insert(pin.port.clone(), queue);
        }

        let mut output_streams = HashMap::new();
        for (port, stream) in outputs {
            let port: PortId = port.parse()?;
            if !contract.outputs.iter().any(|pin| pin.port == port) {
                return Err(FrameKitError::Contract(format!("{name}: no output '{port}'")));
            }
            output_streams.insert(port, (*stream).to_string());
        }

        calculator.open()?;
        self.nodes.push(HarnessNode {
            name: name.to_string(),
            outputs: OutputSet::from_pins(&contract.outputs),
            calculator,
            queues,
            output_streams,
            last_processed: Timestamp::UNSET,
            invocations: 0,
        });
        Ok(())
    }

    /// Feeds a packet into a graph input stream and runs until idle.
    ///
    /// # Errors
    ///
    /// Propagates scheduling and calculator errors.
    pub fn add_packet(&mut self, stream: &str, packet: Packet) -> Result<(), FrameKitError> {
        let bound = packet.timestamp().next_allowed_in_stream();
        self.deliver(stream, StreamFlush { packets: vec![packet], bound: Some(bound) })?;
        self.run()
    }

    /// Announces a bound on a graph input stream and runs until idle.
    ///
    /// # Errors
    ///
    /// Propagates calculator errors.
    pub fn set_stream_bound(&mut self, stream: &str, bound: Timestamp) -> Result<(), FrameKitError> {
        self.deliver(stream, StreamFlush { packets: Vec::new(), bound: Some(bound) })?;
        self.run()
    }

    /// # Errors
    ///
    /// Propagates calculator errors.
    pub fn close_stream(&mut self, stream: &str) -> Result<(), FrameKitError> {
        self.set_stream_bound(stream, Timestamp::DONE)
    }

    /// Closes every node.
    ///
    /// # Errors
    ///
    /// Returns the first `close` error.
    pub fn close(&mut self) -> Result<(), FrameKitError> {
        for node in &mut self.nodes {
            node.calculator.close()?;
        }
        Ok(())
    }

    /// Packets recorded on a stream nobody consumes.
    pub fn output(&self, stream: &str) -> &[Packet] {
        self.observed.get(stream).map_or(&[], Vec::as_slice)
    }

    /// `(timestamp, value)` pairs of an unconsumed stream.
    ///
    /// # Panics
    ///
    /// Panics if a packet does not hold a `T`.
    #[allow(clippy::unwrap_used)]
    pub fn output_values<T: Clone + 'static>(&self, stream: &str) -> Vec<(i64, T)> {
        self.output(stream)
            .iter()
            .map(|packet| (packet.timestamp().value(), packet.get::<T>().unwrap().clone()))
            .collect()
    }

    pub fn stream_bound(&self, stream: &str) -> Timestamp {
        self.bounds.get(stream).copied().unwrap_or(Timestamp::PRE_STREAM)
    }

    pub fn invocations(&self, node: &str) -> usize {
        self.nodes.iter().find(|n| n.name == node).map_or(0, |n| n.invocations)
    }

    fn run(&mut self) -> Result<(), FrameKitError> {
        loop {
            let mut progressed = false;
            for index in 0..self.nodes.len() {
                progressed |= self.step(index)?;
            }
            if !progressed {
                return Ok(());
            }
        }
    }

    fn step(&mut self, index: usize) -> Result<bool, FrameKitError> {
        let node = &mut self.nodes[index];
        let contract = node.calculator.contract();
        let process_bounds = contract.process_timestamp_bounds;
        let offset = contract.timestamp_offset;

        let front = node.queues.values().filter_map(|q| q.packets.front().map(Packet::timestamp)).min();
        let ready = front.filter(|&ts| {
            node.queues.values().all(|q| !q.packets.is_empty() || q.bound > ts)
        });

        let invocation = if let Some(ts) = ready {
            let mut inputs = InputSet::new();
            for (port, queue) in &mut node.queues {
                if queue.packets.front().is_some_and(|p| p.timestamp() == ts) {
                    if let Some(packet) = queue.packets.pop_front() {
                        inputs.insert(port.clone(), packet);
                    }
                }
            }
            Some((ts, inputs))
        } else if process_bounds {
            let candidate = node.settled().previous_allowed_in_stream();
            (candidate.is_range_value() && candidate > node.last_processed)
                .then(|| (candidate, InputSet::new()))
        } else {
            None
        };

        let invoked = invocation.is_some();
        if let Some((ts, inputs)) = invocation {
            let mut ctx = CalculatorContext::new(&node.name, ts, inputs, &mut node.outputs);
            node.calculator.process(&mut ctx)?;
            node.last_processed = ts;
            node.invocations += 1;
        }
        if let Some(offset) = offset {
            let settled = node.settled();
            node.outputs.apply_timestamp_offset(settled, offset);
        }

        let flushes = node.outputs.commit_all();
        let mut progressed = invoked;
        let mut routed = Vec::new();
        for (port, flush) in flushes {
            if flush.packets.is_empty() && flush.bound.is_none() {
                continue;
            }
            progressed = true;
            if let Some(stream) = node.output_streams.get(&port) {
                routed.push((stream.clone(), flush));
            }
        }
        for (stream, flush) in routed {
            self.deliver(&stream, flush)?;
        }
        Ok(progressed)
    }

    fn deliver(&mut self, stream: &str, flush: StreamFlush) -> Result<(), FrameKitError> {
        if let Some(bound) = flush.bound {
            let current = self.bounds.entry(stream.to_string()).or_insert(Timestamp::PRE_STREAM);
            *current = (*current).max(bound);
        }

        let Some(consumers) = self.consumers.get(stream) else {
            self.observed.entry(stream.to_string()).or_default().extend(flush.packets);
            return Ok(());
        };
        for (node, port) in consumers {
            let Some(queue) = self.nodes[*node].queues.get_mut(port) else {
                continue;
            };
            for packet in &flush.packets {
                queue.push(packet.clone()).map_err(|e| match e {
                    FrameKitError::TimestampBound { timestamp, bound, .. } => {
                        FrameKitError::TimestampBound { port: format!("{stream} -> {port}"), timestamp, bound }
                    },
                    other => other,
                })?;
            }
            if let Some(bound) = flush.bound {
                queue.raise_bound(bound);
            }
        }
        Ok(())
    }
}

/// Adds one to every `i32` on `IN`.
pub struct AddOneNode {
    contract: framekit_core::CalculatorContract,
}

impl AddOneNode {
    pub fn new() -> Self {
        Self {
            contract: framekit_core::CalculatorContract::new()
                .input(PortId::tag("IN"), PacketType::of::<i32>())
                .output(PortId::tag("OUT"), PacketType::of::<i32>())
                .with_timestamp_offset(0),
        }
    }
}

impl Calculator for AddOneNode {
    fn contract(&self) -> &framekit_core::CalculatorContract {
        &self.contract
    }

    fn process(&mut self, ctx: &mut CalculatorContext<'_>) -> Result<(), FrameKitError> {
        let packet = ctx.inputs().get_tag("IN");
        if packet.is_empty() {
            return Ok(());
        }
        let value = *packet.get::<i32>()?;
        let ts = ctx.input_timestamp();
        ctx.outputs().send(&PortId::tag("OUT"), Packet::new(value + 1).at(ts))
    }
}

/// Multiplies `IN` by `MULTIPLIER` when both are present.
pub struct MultiplyNode {
    contract: framekit_core::CalculatorContract,
}

impl MultiplyNode {
    pub fn new() -> Self {
        Self {
            contract: framekit_core::CalculatorContract::new()
                .input(PortId::tag("IN"), PacketType::of::<i32>())
                .input(PortId::tag("MULTIPLIER"), PacketType::of::<i32>())
                .output(PortId::tag("OUT"), PacketType::of::<i32>())
                .with_timestamp_offset(0),
        }
    }
}

impl Calculator for MultiplyNode {
    fn contract(&self) -> &framekit_core::CalculatorContract {
        &self.contract
    }

    fn process(&mut self, ctx: &mut CalculatorContext<'_>) -> Result<(), FrameKitError> {
        let value = ctx.inputs().get_tag("IN");
        let multiplier = ctx.inputs().get_tag("MULTIPLIER");
        if value.is_empty() || multiplier.is_empty() {
            return Ok(());
        }
        let product = *value.get::<i32>()? * *multiplier.get::<i32>()?;
        let ts = ctx.input_timestamp();
        ctx.outputs().send(&PortId::tag("OUT"), Packet::new(product).at(ts))
    }
}
