// SPDX-FileCopyrightText: © 2025 FrameKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Core calculator abstractions.
//!
//! This module defines the interface between calculators and whatever
//! executor drives them:
//! - [`Calculator`]: The trait every node implements
//! - [`CalculatorContext`]: Per-invocation view of inputs and outputs
//! - [`InputSet`]: Packets delivered for one input timestamp
//! - [`OutputStream`] / [`OutputSet`]: Output publication with timestamp-bound bookkeeping
//!
//! Calculators run synchronously: `process` must finish its work before
//! returning and never blocks on other nodes.

use crate::error::FrameKitError;
use crate::pins::{CalculatorContract, InputPin, OutputPin, PortId};
use crate::timestamp::{Timestamp, TimestampDiff};
use crate::types::Packet;
use indexmap::IndexMap;
use smallvec::SmallVec;
use std::sync::Arc;

static EMPTY_PACKET: Packet = Packet::empty();

/// Packets delivered to a calculator for one input timestamp.
///
/// Ports without a packet at this timestamp read as empty packets.
#[derive(Debug, Clone, Default)]
pub struct InputSet {
    packets: IndexMap<PortId, Packet>,
}

impl InputSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, port: PortId, packet: Packet) {
        self.packets.insert(port, packet);
    }

    #[must_use]
    pub fn with(mut self, port: PortId, packet: Packet) -> Self {
        self.insert(port, packet);
        self
    }

    pub fn get(&self, port: &PortId) -> &Packet {
        self.packets.get(port).unwrap_or(&EMPTY_PACKET)
    }

    /// Shorthand for the port `tag` at index 0.
    pub fn get_tag(&self, tag: &str) -> &Packet {
        self.packets
            .iter()
            .find(|(port, _)| port.index == 0 && port.tag == tag)
            .map_or(&EMPTY_PACKET, |(_, packet)| packet)
    }

    /// Removes the packet on `port`, leaving an empty packet behind.
    pub fn take(&mut self, port: &PortId) -> Packet {
        self.packets.get_mut(port).map(std::mem::take).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.values().all(Packet::is_empty)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PortId, &Packet)> {
        self.packets.iter()
    }
}

/// What an output stream published during one invocation.
#[derive(Debug, Default)]
pub struct StreamFlush {
    pub packets: Vec<Packet>,
    /// New bound, present only when it advanced.
    pub bound: Option<Timestamp>,
}

/// One output port and the timestamp bound promised on it.
///
/// Packets are validated against the bound committed by *previous*
/// invocations, and must strictly increase within the current one. An
/// explicit bound set during an invocation therefore does not reject later
/// packets from that same invocation; it takes effect at [`commit`](Self::commit).
#[derive(Debug)]
pub struct OutputStream {
    port: PortId,
    committed_bound: Timestamp,
    pending: SmallVec<[Packet; 4]>,
    pending_bound: Option<Timestamp>,
}

impl OutputStream {
    pub fn new(port: PortId) -> Self {
        Self {
            port,
            committed_bound: Timestamp::PRE_STREAM,
            pending: SmallVec::new(),
            pending_bound: None,
        }
    }

    pub const fn port(&self) -> &PortId {
        &self.port
    }

    /// The bound as of the last commit.
    pub const fn next_timestamp_bound(&self) -> Timestamp {
        self.committed_bound
    }

    /// Queues `packet` for publication.
    ///
    /// # Errors
    ///
    /// - `FrameKitError::Runtime` for empty packets or timestamps not allowed in a stream
    /// - `FrameKitError::TimestampBound` if the timestamp is below the committed
    ///   bound or not above the previous packet of this invocation
    pub fn add_packet(&mut self, packet: Packet) -> Result<(), FrameKitError> {
        if packet.is_empty() {
            return Err(FrameKitError::Runtime(format!("empty packet sent on output '{}'", self.port)));
        }
        let timestamp = packet.timestamp();
        if !timestamp.is_allowed_in_stream() {
            return Err(FrameKitError::Runtime(format!(
                "timestamp {timestamp} is not allowed on output '{}'",
                self.port
            )));
        }
        let bound = self
            .pending
            .last()
            .map_or(self.committed_bound, |last| last.timestamp().next_allowed_in_stream());
        if timestamp < bound {
            return Err(FrameKitError::TimestampBound { port: self.port.to_string(), timestamp, bound });
        }
        self.pending.push(packet);
        Ok(())
    }

    /// Promises that no packet below `bound` will follow. Bounds never move back.
    pub fn set_next_timestamp_bound(&mut self, bound: Timestamp) {
        self.pending_bound = Some(self.pending_bound.map_or(bound, |current| current.max(bound)));
    }

    /// Publishes the invocation's packets and settles the bound.
    pub fn commit(&mut self) -> StreamFlush {
        let packets: Vec<Packet> = self.pending.drain(..).collect();
        let mut bound = self.committed_bound;
        if let Some(explicit) = self.pending_bound.take() {
            bound = bound.max(explicit);
        }
        if let Some(last) = packets.last() {
            bound = bound.max(last.timestamp().next_allowed_in_stream());
        }
        let advanced = bound > self.committed_bound;
        self.committed_bound = bound;
        StreamFlush { packets, bound: advanced.then_some(bound) }
    }
}

/// All output streams of one calculator, in declaration order.
#[derive(Debug, Default)]
pub struct OutputSet {
    streams: IndexMap<PortId, OutputStream>,
}

impl OutputSet {
    pub fn from_pins(pins: &[OutputPin]) -> Self {
        Self {
            streams: pins
                .iter()
                .map(|pin| (pin.port.clone(), OutputStream::new(pin.port.clone())))
                .collect(),
        }
    }

    pub fn contains(&self, port: &PortId) -> bool {
        self.streams.contains_key(port)
    }

    /// # Errors
    ///
    /// Returns `FrameKitError::Runtime` if the port was not declared.
    pub fn stream_mut(&mut self, port: &PortId) -> Result<&mut OutputStream, FrameKitError> {
        self.streams
            .get_mut(port)
            .ok_or_else(|| FrameKitError::Runtime(format!("unknown output port '{port}'")))
    }

    pub fn stream(&self, port: &PortId) -> Option<&OutputStream> {
        self.streams.get(port)
    }

    /// # Errors
    ///
    /// Fails for undeclared ports and for packets violating the stream bound.
    pub fn send(&mut self, port: &PortId, packet: Packet) -> Result<(), FrameKitError> {
        self.stream_mut(port)?.add_packet(packet)
    }

    /// # Errors
    ///
    /// Returns `FrameKitError::Runtime` if the port was not declared.
    pub fn set_next_timestamp_bound(
        &mut self,
        port: &PortId,
        bound: Timestamp,
    ) -> Result<(), FrameKitError> {
        self.stream_mut(port)?.set_next_timestamp_bound(bound);
        Ok(())
    }

    pub fn set_next_timestamp_bound_all(&mut self, bound: Timestamp) {
        for stream in self.streams.values_mut() {
            stream.set_next_timestamp_bound(bound);
        }
    }

    /// Moves every output bound to `settled + offset`, where `settled` is the
    /// smallest timestamp still possible on the inputs.
    pub fn apply_timestamp_offset(&mut self, settled: Timestamp, offset: TimestampDiff) {
        let bound = if settled.is_range_value() {
            (settled + offset).max(Timestamp::MIN).min(Timestamp::ONE_OVER_POST_STREAM)
        } else {
            settled
        };
        self.set_next_timestamp_bound_all(bound);
    }

    pub fn commit_all(&mut self) -> Vec<(PortId, StreamFlush)> {
        self.streams.iter_mut().map(|(port, stream)| (port.clone(), stream.commit())).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutputStream> {
        self.streams.values()
    }
}

/// Per-invocation context handed to [`Calculator::process`].
pub struct CalculatorContext<'a> {
    node_name: &'a str,
    input_timestamp: Timestamp,
    inputs: InputSet,
    outputs: &'a mut OutputSet,
}

impl<'a> CalculatorContext<'a> {
    pub fn new(
        node_name: &'a str,
        input_timestamp: Timestamp,
        inputs: InputSet,
        outputs: &'a mut OutputSet,
    ) -> Self {
        Self { node_name, input_timestamp, inputs, outputs }
    }

    pub const fn node_name(&self) -> &str {
        self.node_name
    }

    /// The timestamp this invocation is processing. For bound-only
    /// invocations this is the new input bound minus one.
    pub const fn input_timestamp(&self) -> Timestamp {
        self.input_timestamp
    }

    pub const fn inputs(&self) -> &InputSet {
        &self.inputs
    }

    pub fn inputs_mut(&mut self) -> &mut InputSet {
        &mut self.inputs
    }

    pub fn outputs(&mut self) -> &mut OutputSet {
        &mut *self.outputs
    }
}

/// The fundamental trait for any graph node.
pub trait Calculator: Send {
    /// Ports and bound behaviour, fixed at construction.
    fn contract(&self) -> &CalculatorContract;

    fn input_pins(&self) -> Vec<InputPin> {
        self.contract().inputs.clone()
    }

    fn output_pins(&self) -> Vec<OutputPin> {
        self.contract().outputs.clone()
    }

    /// Called once before the first `process`.
    ///
    /// # Errors
    ///
    /// Any error aborts graph start-up.
    fn open(&mut self) -> Result<(), FrameKitError> {
        Ok(())
    }

    /// Handles one input timestamp.
    ///
    /// # Errors
    ///
    /// Errors are fatal to the graph run; they are returned, never panicked.
    fn process(&mut self, ctx: &mut CalculatorContext<'_>) -> Result<(), FrameKitError>;

    /// Called once after the last `process`.
    ///
    /// # Errors
    ///
    /// Reported to the executor.
    fn close(&mut self) -> Result<(), FrameKitError> {
        Ok(())
    }
}

/// A factory function that creates a calculator from its JSON parameters.
pub type NodeFactory = Arc<
    dyn Fn(Option<&serde_json::Value>) -> Result<Box<dyn Calculator>, FrameKitError> + Send + Sync,
>;
