// SPDX-FileCopyrightText: © 2025 FrameKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Loop calculators: `BeginLoop` fans a collection out into per-element
//! packets, `EndLoop` folds per-element packets back into a collection.

use framekit_core::{FrameKitError, NodeRegistry, PortId};
use schemars::{JsonSchema, Schema};

pub mod begin_loop;
pub mod end_loop;
pub mod loop_element;


use begin_loop::{BeginLoopConfig, BeginLoopNode};
use end_loop::{EndLoopConfig, EndLoopNode};
use loop_element::LoopElement;

/// Parses `TAG` / `TAG:index` port names from a node config.
pub(crate) fn parse_ports(names: &[String]) -> Result<Vec<PortId>, FrameKitError> {
    names
        .iter()
        .map(|name| {
            name.parse::<PortId>().map_err(|e| match e {
                FrameKitError::Configuration(msg) => FrameKitError::Contract(msg),
                other => other,
            })
        })
        .collect()
}

fn schema_value<T: JsonSchema>() -> serde_json::Value {
    let schema: Schema = schemars::schema_for!(T);
    serde_json::to_value(&schema).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to serialize config schema");
        serde_json::Value::Null
    })
}

/// Registers `core::begin_loop::<name>` and `core::end_loop::<name>` over `Vec<T>`.
pub fn register_loop_pair<T: LoopElement>(registry: &mut NodeRegistry, name: &str) {
    let begin = BeginLoopNode::<Vec<T>>::factory();
    registry.register_dynamic_with_description(
        &format!("core::begin_loop::{name}"),
        move |params| (begin)(params),
        schema_value::<BeginLoopConfig>(),
        vec!["core".to_string(), "loop".to_string()],
        format!(
            "Emits each element of a Vec<{name}> on ITEM at consecutive loop timestamps, \
             followed by BATCH_END carrying the batch's input timestamp."
        ),
    );

    let end = EndLoopNode::<Vec<T>>::factory();
    registry.register_dynamic_with_description(
        &format!("core::end_loop::{name}"),
        move |params| (end)(params),
        schema_value::<EndLoopConfig>(),
        vec!["core".to_string(), "loop".to_string()],
        format!(
            "Collects ITEM packets into a Vec<{name}> and emits it at the timestamp \
             carried by BATCH_END. Empty batches only advance the output bound."
        ),
    );
}

/// Registers the loop calculators for the built-in element types.
pub fn register_core_nodes(registry: &mut NodeRegistry) {
    register_loop_pair::<i32>(registry, "i32");
    register_loop_pair::<i64>(registry, "i64");
    register_loop_pair::<u32>(registry, "u32");
    register_loop_pair::<u64>(registry, "u64");
    register_loop_pair::<f32>(registry, "f32");
    register_loop_pair::<f64>(registry, "f64");
    register_loop_pair::<bool>(registry, "bool");
    register_loop_pair::<framekit_core::Timestamp>(registry, "timestamp");
    register_loop_pair::<String>(registry, "string");
}
