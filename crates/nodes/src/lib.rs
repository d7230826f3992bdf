// SPDX-FileCopyrightText: © 2025 FrameKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

use framekit_core::NodeRegistry;

pub mod core;

#[cfg(test)]
pub mod test_utils;

/// A single function to register all built-in nodes.
pub fn register_nodes(registry: &mut NodeRegistry) {
    core::register_core_nodes(registry);

    tracing::info!("Finished registering built-in nodes.");
}
