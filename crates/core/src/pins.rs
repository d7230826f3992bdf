// SPDX-FileCopyrightText: © 2025 FrameKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Port system for contract validation.
//!
//! Ports are addressed by a tag plus an index (`"CLONE:1"`). A calculator
//! declares its ports in a [`CalculatorContract`] at construction time,
//! together with the timestamp-bound behaviour the executor must honour.
//!
//! ## Key concepts:
//! - [`PortId`]: `TAG` or `TAG:index` address of a port
//! - [`InputPin`] / [`OutputPin`]: Declared ports and their packet types
//! - [`CalculatorContract`]: Ports plus bound-propagation flags

use crate::error::FrameKitError;
use crate::timestamp::TimestampDiff;
use crate::types::PacketType;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tag names shared by the loop calculators.
pub mod tags {
    pub const ITERABLE: &str = "ITERABLE";
    pub const ITEM: &str = "ITEM";
    pub const BATCH_END: &str = "BATCH_END";
    pub const CLONE: &str = "CLONE";
}

/// Address of one port: a tag and an index within that tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
pub struct PortId {
    pub tag: String,
    pub index: usize,
}

impl PortId {
    pub fn new(tag: impl Into<String>, index: usize) -> Self {
        Self { tag: tag.into(), index }
    }

    pub fn tag(tag: impl Into<String>) -> Self {
        Self::new(tag, 0)
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.index == 0 {
            f.write_str(&self.tag)
        } else {
            write!(f, "{}:{}", self.tag, self.index)
        }
    }
}

impl FromStr for PortId {
    type Err = FrameKitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (tag, index) = match s.split_once(':') {
            Some((tag, index)) => {
                let index = index.trim().parse::<usize>().map_err(|_| {
                    FrameKitError::Configuration(format!("Invalid port index in '{s}'"))
                })?;
                (tag.trim(), index)
            },
            None => (s.trim(), 0),
        };
        if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_') {
            return Err(FrameKitError::Configuration(format!(
                "Invalid port tag in '{s}': tags are upper-case identifiers"
            )));
        }
        Ok(Self::new(tag, index))
    }
}

/// Describes an input port and the packet type it accepts.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct InputPin {
    pub port: PortId,
    pub accepts_type: PacketType,
    #[serde(default)]
    pub optional: bool,
}

/// Describes an output port and the packet type it produces.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct OutputPin {
    pub port: PortId,
    pub produces_type: PacketType,
}

/// Checks whether an output type can feed an input type.
pub fn can_connect(output: &PacketType, input: &PacketType) -> bool {
    matches!(input, PacketType::Any) || matches!(output, PacketType::Any) || output == input
}

/// Everything the executor needs to know about a calculator before running it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CalculatorContract {
    pub inputs: Vec<InputPin>,
    pub outputs: Vec<OutputPin>,
    /// Invoke `process` on bound-only advances as well as on packets.
    #[serde(default)]
    pub process_timestamp_bounds: bool,
    /// Output bounds follow input bounds at this fixed offset.
    #[serde(default)]
    pub timestamp_offset: Option<TimestampDiff>,
}

impl CalculatorContract {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn input(mut self, port: PortId, accepts_type: PacketType) -> Self {
        self.inputs.push(InputPin { port, accepts_type, optional: false });
        self
    }

    #[must_use]
    pub fn optional_input(mut self, port: PortId, accepts_type: PacketType) -> Self {
        self.inputs.push(InputPin { port, accepts_type, optional: true });
        self
    }

    #[must_use]
    pub fn output(mut self, port: PortId, produces_type: PacketType) -> Self {
        self.outputs.push(OutputPin { port, produces_type });
        self
    }

    #[must_use]
    pub const fn with_process_timestamp_bounds(mut self, enabled: bool) -> Self {
        self.process_timestamp_bounds = enabled;
        self
    }

    #[must_use]
    pub const fn with_timestamp_offset(mut self, offset: TimestampDiff) -> Self {
        self.timestamp_offset = Some(offset);
        self
    }

    pub fn input_count(&self, tag: &str) -> usize {
        self.inputs.iter().filter(|pin| pin.port.tag == tag).count()
    }

    pub fn output_count(&self, tag: &str) -> usize {
        self.outputs.iter().filter(|pin| pin.port.tag == tag).count()
    }

    pub fn has_input(&self, tag: &str) -> bool {
        self.input_count(tag) > 0
    }

    pub fn has_output(&self, tag: &str) -> bool {
        self.output_count(tag) > 0
    }

    /// # Errors
    ///
    /// Returns `FrameKitError::Contract` if no input carries `tag`.
    pub fn require_input(&self, tag: &str) -> Result<(), FrameKitError> {
        if self.has_input(tag) {
            Ok(())
        } else {
            Err(FrameKitError::Contract(format!("missing required input '{tag}'")))
        }
    }

    /// # Errors
    ///
    /// Returns `FrameKitError::Contract` if no output carries `tag`.
    pub fn require_output(&self, tag: &str) -> Result<(), FrameKitError> {
        if self.has_output(tag) {
            Ok(())
        } else {
            Err(FrameKitError::Contract(format!("missing required output '{tag}'")))
        }
    }

    /// Rejects duplicated ports.
    ///
    /// # Errors
    ///
    /// Returns `FrameKitError::Contract` naming the first duplicate.
    pub fn validate(&self) -> Result<(), FrameKitError> {
        let mut seen = std::collections::HashSet::new();
        for pin in &self.inputs {
            if !seen.insert(&pin.port) {
                return Err(FrameKitError::Contract(format!("duplicate input '{}'", pin.port)));
            }
        }
        seen.clear();
        for pin in &self.outputs {
            if !seen.insert(&pin.port) {
                return Err(FrameKitError::Contract(format!("duplicate output '{}'", pin.port)));
            }
        }
        Ok(())
    }
}
