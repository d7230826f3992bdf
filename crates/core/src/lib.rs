// SPDX-FileCopyrightText: © 2025 FrameKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! FrameKit Core - Fundamental traits and data structures for timestamped dataflow graphs.
//!
//! ## Core Modules
//!
//! - [`timestamp`]: Logical stream time and its sentinels
//! - [`types`]: Type-erased packets and packet type descriptors
//! - [`pins`]: Port addressing and calculator contracts
//! - [`node`]: Calculator trait, invocation context, output streams
//! - [`registry`]: Calculator factory and discovery
//! - [`error`]: Error types and handling
//! - [`helpers`]: Configuration parsing helpers
//!
//! ## Quick Start
//!
//! ```ignore
//! use framekit_core::{Calculator, CalculatorContext, CalculatorContract, Packet, PortId};
//!
//! struct AddOne { contract: CalculatorContract }
//!
//! impl Calculator for AddOne {
//!     fn contract(&self) -> &CalculatorContract { &self.contract }
//!
//!     fn process(&mut self, ctx: &mut CalculatorContext<'_>) -> Result<(), FrameKitError> {
//!         let value = *ctx.inputs().get_tag("IN").get::<i32>()?;
//!         let ts = ctx.input_timestamp();
//!         ctx.outputs().send(&PortId::tag("OUT"), Packet::new(value + 1).at(ts))
//!     }
//! }
//! ```

pub mod error;
pub mod helpers;
pub mod node;
pub mod pins;
pub mod registry;
pub mod timestamp;
pub mod types;

// Error handling
pub use error::{FrameKitError, PacketError};

// Core node abstractions
pub use node::{
    Calculator, CalculatorContext, InputSet, NodeFactory, OutputSet, OutputStream, StreamFlush,
};

// Ports and contracts
pub use pins::{CalculatorContract, InputPin, OutputPin, PortId};

// Registry and factory
pub use registry::{NodeDefinition, NodeRegistry};

// Data types
pub use timestamp::{Timestamp, TimestampDiff};
pub use types::{Packet, PacketType, PayloadView};

// Helpers
pub use helpers::config_helpers;
