// SPDX-FileCopyrightText: © 2025 FrameKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Utility functions for node configuration.

use crate::error::FrameKitError;

/// Helper functions for parsing node configuration from JSON values.
pub mod config_helpers {
    use super::FrameKitError;
    use serde::Deserialize;

    /// Parses configuration from an optional JSON value, using defaults if not provided.
    ///
    /// # Errors
    ///
    /// Returns `FrameKitError::Configuration` if `params` is present but malformed.
    pub fn parse_config_optional<T>(params: Option<&serde_json::Value>) -> Result<T, FrameKitError>
    where
        T: for<'de> Deserialize<'de> + Default,
    {
        match params {
            None | Some(serde_json::Value::Null) => Ok(T::default()),
            Some(value) => T::deserialize(value)
                .map_err(|e| FrameKitError::Configuration(format!("Failed to parse config: {e}"))),
        }
    }
}
