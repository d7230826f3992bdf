// SPDX-FileCopyrightText: © 2025 FrameKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Calculator factory registry and discovery.
//!
//! - [`NodeRegistry`]: Central registry of all available calculator kinds
//! - [`NodeDefinition`]: Serializable metadata for a registered kind

use crate::error::FrameKitError;
use crate::node::{Calculator, NodeFactory};
use crate::pins::{InputPin, OutputPin};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A serializable representation of a calculator kind.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct NodeDefinition {
    pub kind: String,
    /// Human-readable description of what this node does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub param_schema: serde_json::Value,
    pub inputs: Vec<InputPin>,
    pub outputs: Vec<OutputPin>,
    /// Hierarchical categories for grouping (e.g., `["core", "flow"]`)
    pub categories: Vec<String>,
}

#[derive(Clone)]
pub(crate) struct NodeInfo {
    pub factory: NodeFactory,
    pub param_schema: serde_json::Value,
    pub categories: Vec<String>,
    pub description: Option<String>,
}

/// Holds every calculator kind that graphs can instantiate.
#[derive(Clone, Default)]
pub struct NodeRegistry {
    info: HashMap<String, NodeInfo>,
}

impl NodeRegistry {
    /// Creates a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a kind whose pins are derived from its parameters.
    /// The factory MUST be able to produce a default instance when `params` is `None`.
    pub fn register_dynamic_with_description<F>(
        &mut self,
        name: &str,
        factory: F,
        param_schema: serde_json::Value,
        categories: Vec<String>,
        description: impl Into<String>,
    ) where
        F: Fn(Option<&serde_json::Value>) -> Result<Box<dyn Calculator>, FrameKitError>
            + Send
            + Sync
            + 'static,
    {
        self.insert(name, factory, param_schema, categories, Some(description.into()));
    }

    fn insert<F>(
        &mut self,
        name: &str,
        factory: F,
        param_schema: serde_json::Value,
        categories: Vec<String>,
        description: Option<String>,
    ) where
        F: Fn(Option<&serde_json::Value>) -> Result<Box<dyn Calculator>, FrameKitError>
            + Send
            + Sync
            + 'static,
    {
        if self.info.contains_key(name) {
            tracing::warn!(kind = %name, "Replacing existing node registration");
        }
        self.info.insert(
            name.to_string(),
            NodeInfo { factory: Arc::new(factory), param_schema, categories, description },
        );
    }

    /// Creates a calculator by its registered kind.
    ///
    /// # Errors
    ///
    /// Returns `FrameKitError::Configuration` if the kind is unknown, or
    /// whatever the factory returns (typically `Configuration` or `Contract`).
    pub fn create_node(
        &self,
        name: &str,
        params: Option<&serde_json::Value>,
    ) -> Result<Box<dyn Calculator>, FrameKitError> {
        self.info.get(name).map_or_else(
            || Err(FrameKitError::Configuration(format!("Node type '{name}' not found in registry"))),
            |info| (info.factory)(params),
        )
    }

    /// Returns definitions for all registered kinds, sorted by kind.
    pub fn definitions(&self) -> Vec<NodeDefinition> {
        let mut defs = Vec::new();
        for (kind, info) in &self.info {
            let (inputs, outputs) = match (info.factory)(None) {
                Ok(node_instance) => (node_instance.input_pins(), node_instance.output_pins()),
                Err(e) => {
                    tracing::error!(kind = %kind, error = %e, "Failed to create default instance for node definition");
                    continue;
                },
            };

            defs.push(NodeDefinition {
                kind: kind.clone(),
                description: info.description.clone(),
                param_schema: info.param_schema.clone(),
                inputs,
                outputs,
                categories: info.categories.clone(),
            });
        }
        defs.sort_by(|a, b| a.kind.cmp(&b.kind));
        defs
    }

    /// Removes a kind. Returns true if it was present.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.info.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.info.contains_key(name)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::node::CalculatorContext;
    use crate::pins::{CalculatorContract, PortId};
    use crate::types::PacketType;

    struct Noop {
        contract: CalculatorContract,
    }

    impl Calculator for Noop {
        fn contract(&self) -> &CalculatorContract {
            &self.contract
        }

        fn process(&mut self, _ctx: &mut CalculatorContext<'_>) -> Result<(), FrameKitError> {
            Ok(())
        }
    }

    fn noop_factory(
        _params: Option<&serde_json::Value>,
    ) -> Result<Box<dyn Calculator>, FrameKitError> {
        Ok(Box::new(Noop {
            contract: CalculatorContract::new()
                .input(PortId::tag("IN"), PacketType::Any)
                .output(PortId::tag("OUT"), PacketType::Any),
        }))
    }

    #[test]
    fn create_registered_and_unknown() {
        let mut registry = NodeRegistry::new();
        registry.register_dynamic_with_description(
            "test::noop",
            noop_factory,
            serde_json::json!({}),
            vec!["test".to_string()],
            "Does nothing",
        );

        assert!(registry.contains("test::noop"));
        let node = registry.create_node("test::noop", None).unwrap();
        assert_eq!(node.input_pins().len(), 1);

        let err = registry.create_node("test::missing", None).err().unwrap();
        assert!(matches!(err, FrameKitError::Configuration(_)));

        let defs = registry.definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].outputs[0].port, PortId::tag("OUT"));

        assert!(registry.unregister("test::noop"));
        assert!(!registry.contains("test::noop"));
    }
}
