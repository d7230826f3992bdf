// SPDX-FileCopyrightText: © 2025 FrameKit Contributors
//
// SPDX-License-Identifier: MPL-2.0

//! Tracker configuration.

use crate::chunk::validate_file_format;
use crate::error::{Result, TrackerError};
use framekit_core::config_helpers;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parameters of the per-frame track step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TrackStepOptions {
    /// A box whose confidence falls below this is lost.
    pub min_confidence: f32,
    /// Multiplicative confidence decay applied on every step.
    pub confidence_decay: f32,
    /// Vectors needed inside the box to trust local motion.
    pub min_vectors_in_box: usize,
    /// Extra decay applied when falling back to global motion.
    pub global_motion_penalty: f32,
}

impl Default for TrackStepOptions {
    fn default() -> Self {
        Self {
            min_confidence: 0.2,
            confidence_decay: 0.995,
            min_vectors_in_box: 1,
            global_motion_penalty: 0.95,
        }
    }
}

/// Options for [`BoxTracker`](crate::BoxTracker).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BoxTrackerOptions {
    /// Time span covered by one cached chunk.
    pub caching_chunk_size_msec: i64,
    /// printf-style chunk file name with exactly one integer conversion.
    pub cache_file_format: String,
    pub num_tracking_workers: usize,
    /// Longest wait for a chunk file that has not been written yet.
    pub read_chunk_timeout_msec: u64,
    /// Keep the full motion state next to every stored box.
    pub record_path_states: bool,
    pub track_step: TrackStepOptions,
}

impl Default for BoxTrackerOptions {
    fn default() -> Self {
        Self {
            caching_chunk_size_msec: 2500,
            cache_file_format: "chunk_%04d".to_string(),
            num_tracking_workers: 8,
            read_chunk_timeout_msec: 60_000,
            record_path_states: false,
            track_step: TrackStepOptions::default(),
        }
    }
}

impl BoxTrackerOptions {
    /// Parses JSON parameters, falling back to defaults when absent.
    ///
    /// # Errors
    ///
    /// `TrackerError::Configuration` for malformed or invalid options.
    pub fn from_params(params: Option<&serde_json::Value>) -> Result<Self> {
        let options: Self = config_helpers::parse_config_optional(params)?;
        options.validate()?;
        Ok(options)
    }

    /// # Errors
    ///
    /// `TrackerError::Configuration` for malformed or invalid options.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let options: Self = serde_saphyr::from_str(yaml)
            .map_err(|e| TrackerError::Configuration(format!("Failed to parse options: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        if self.num_tracking_workers == 0 {
            return Err(TrackerError::Configuration(
                "num_tracking_workers must be at least 1".to_string(),
            ));
        }
        if self.caching_chunk_size_msec <= 0 {
            return Err(TrackerError::Configuration(
                "caching_chunk_size_msec must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.track_step.min_confidence) {
            return Err(TrackerError::Configuration(
                "track_step.min_confidence must be within [0, 1]".to_string(),
            ));
        }
        validate_file_format(&self.cache_file_format)
    }

    pub const fn read_chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.read_chunk_timeout_msec)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let options = BoxTrackerOptions::from_params(None).unwrap();
        assert_eq!(options.caching_chunk_size_msec, 2500);
        assert_eq!(options.cache_file_format, "chunk_%04d");
        assert_eq!(options.num_tracking_workers, 8);
        assert_eq!(options.read_chunk_timeout(), Duration::from_secs(60));
        assert!(!options.record_path_states);
    }

    #[test]
    fn partial_params_keep_defaults() {
        let params = serde_json::json!({
            "num_tracking_workers": 2,
            "track_step": { "min_confidence": 0.5 }
        });
        let options = BoxTrackerOptions::from_params(Some(&params)).unwrap();
        assert_eq!(options.num_tracking_workers, 2);
        assert!((options.track_step.min_confidence - 0.5).abs() < f32::EPSILON);
        assert_eq!(options.caching_chunk_size_msec, 2500);
    }

    #[test]
    fn yaml_options() {
        let yaml = "caching_chunk_size_msec: 1000\ncache_file_format: \"data_%d.json\"\nrecord_path_states: true\n";
        let options = BoxTrackerOptions::from_yaml(yaml).unwrap();
        assert_eq!(options.caching_chunk_size_msec, 1000);
        assert_eq!(options.cache_file_format, "data_%d.json");
        assert!(options.record_path_states);
    }

    #[test]
    fn rejects_invalid() {
        let params = serde_json::json!({ "num_tracking_workers": 0 });
        assert!(matches!(
            BoxTrackerOptions::from_params(Some(&params)),
            Err(TrackerError::Configuration(_))
        ));

        let params = serde_json::json!({ "cache_file_format": "chunk" });
        assert!(matches!(
            BoxTrackerOptions::from_params(Some(&params)),
            Err(TrackerError::InvalidFormat(_))
        ));

        assert!(BoxTrackerOptions::from_yaml("num_tracking_workers: [").is_err());
    }
}
