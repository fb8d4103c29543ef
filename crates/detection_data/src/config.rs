//! src/config.rs
//!
//! Configuration for the batch generator.
//!
//! The `GeneratorConfig` struct stores the parameters that shape the
//! batches: grouping, image size, multi-scale schedule, box capacity and
//! the anchor resource.
//!
//! Example:
//! ```ignore
//! let config = GeneratorConfig::builder()
//!     .batch_size(8)
//!     .group_method(GroupMethod::Ratio)
//!     .image_size(416)
//!     .multi_scale(true)
//!     .anchors_path("anchors/yolo_anchors.txt")
//!     .seed(42)
//!     .build();
//! ```
//!
//! Or from JSON, where every field is optional:
//! ```json
//! { "batch_size": 8, "group_method": "ratio", "multi_scale": true }
//! ```
//!
//! Augmentation stages are not part of this struct; they are plugged into
//! `DetectionGenerator::new` through an `AugmentationPipeline`.

use crate::batch::{DEFAULT_MAX_BOXES, STRIDES};
use crate::error::GeneratorError;
use crate::grouping::GroupMethod;
use crate::multiscale::DEFAULT_MULTI_IMAGE_SIZES;
use anyhow::{ensure, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for DetectionGenerator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GeneratorConfig {
    /// Number of images per batch (must be > 0)
    pub batch_size: usize,
    /// How indices are ordered before being chunked into groups
    pub group_method: GroupMethod,
    /// Whether to reshuffle the group order every epoch
    pub shuffle_groups: bool,
    /// Side of the square letterbox canvas when multi-scale is off
    pub image_size: u32,
    /// Whether to redraw the image side every 10 batches
    pub multi_scale: bool,
    /// Candidate sides for multi-scale training
    pub multi_image_sizes: Vec<u32>,
    /// Per-image box capacity of `gt_boxes`
    pub max_boxes: usize,
    /// Anchor resource file, one line of comma-separated `w,h` pairs
    pub anchors_path: Option<PathBuf>,
    /// Random seed for grouping, shuffling, augmentation and multi-scale.
    /// A random seed is drawn at construction when unset.
    pub seed: Option<u64>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            batch_size: 1,
            group_method: GroupMethod::Ratio,
            shuffle_groups: true,
            image_size: 416,
            multi_scale: false,
            multi_image_sizes: DEFAULT_MULTI_IMAGE_SIZES.to_vec(),
            max_boxes: DEFAULT_MAX_BOXES,
            anchors_path: None,
            seed: None,
        }
    }
}

impl GeneratorConfig {
    pub fn builder() -> GeneratorConfigBuilder {
        GeneratorConfigBuilder::default()
    }

    /// Parses a JSON configuration. Unknown fields and unknown group
    /// methods are configuration errors.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| GeneratorError::config(format!("invalid generator config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| GeneratorError::Resource {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Checks the invariants the generator relies on.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.batch_size > 0,
            GeneratorError::config("batch_size must be a positive integer, but got 0")
        );
        ensure!(
            self.max_boxes > 0,
            GeneratorError::config("max_boxes must be a positive integer, but got 0")
        );
        check_side("image_size", self.image_size)?;

        if self.multi_scale {
            ensure!(
                !self.multi_image_sizes.is_empty(),
                GeneratorError::config("multi_scale is enabled but multi_image_sizes is empty")
            );
            for &size in &self.multi_image_sizes {
                check_side("multi_image_sizes", size)?;
            }
        }
        Ok(())
    }
}

/// Sides must split evenly into every feature-map stride.
fn check_side(name: &str, side: u32) -> Result<()> {
    let coarsest = STRIDES[0];
    ensure!(
        side >= coarsest && side % coarsest == 0,
        GeneratorError::config(format!(
            "{} must be a positive multiple of {} (got {})",
            name, coarsest, side
        ))
    );
    Ok(())
}

/// Builder for GeneratorConfig with method chaining
#[derive(Default)]
pub struct GeneratorConfigBuilder {
    config: GeneratorConfig,
}

impl GeneratorConfigBuilder {
    /// Set the batch size (must be > 0)
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    pub fn group_method(mut self, method: GroupMethod) -> Self {
        self.config.group_method = method;
        self
    }

    /// Set whether the group order is reshuffled every epoch
    pub fn shuffle_groups(mut self, shuffle: bool) -> Self {
        self.config.shuffle_groups = shuffle;
        self
    }

    pub fn image_size(mut self, size: u32) -> Self {
        self.config.image_size = size;
        self
    }

    pub fn multi_scale(mut self, enabled: bool) -> Self {
        self.config.multi_scale = enabled;
        self
    }

    pub fn multi_image_sizes(mut self, sizes: Vec<u32>) -> Self {
        self.config.multi_image_sizes = sizes;
        self
    }

    pub fn max_boxes(mut self, max_boxes: usize) -> Self {
        self.config.max_boxes = max_boxes;
        self
    }

    pub fn anchors_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.anchors_path = Some(path.into());
        self
    }

    /// Set the random seed.
    ///
    /// When set, this seed controls:
    /// - Random grouping and per-epoch group shuffling
    /// - Augmentation of every sample
    /// - The multi-scale schedule
    pub fn seed(mut self, seed: u64) -> Self {
        self.config.seed = Some(seed);
        self
    }

    /// Build the final configuration.
    pub fn build(self) -> GeneratorConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GeneratorConfig::default();
        assert_eq!(config.image_size, 416);
        assert_eq!(config.group_method, GroupMethod::Ratio);
        assert!(config.shuffle_groups);
        assert_eq!(config.multi_image_sizes.first(), Some(&320));
        assert_eq!(config.multi_image_sizes.last(), Some(&608));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() -> Result<()> {
        let config = GeneratorConfig::from_json_str(r#"{"batch_size": 4, "group_method": "none"}"#)?;
        assert_eq!(config.batch_size, 4);
        assert_eq!(config.group_method, GroupMethod::None);
        assert_eq!(config.max_boxes, DEFAULT_MAX_BOXES);
        Ok(())
    }

    #[test]
    fn test_unknown_group_method_is_configuration_error() {
        let err = GeneratorConfig::from_json_str(r#"{"group_method": "area"}"#).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<GeneratorError>(),
            Some(GeneratorError::Configuration(_))
        ));
    }

    #[test]
    fn test_validation_rejects_bad_sizes() {
        let config = GeneratorConfig::builder().batch_size(0).build();
        assert!(config.validate().is_err());

        let config = GeneratorConfig::builder().image_size(400).build();
        assert!(config.validate().is_err());

        let config = GeneratorConfig::builder()
            .multi_scale(true)
            .multi_image_sizes(vec![])
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("generator.json");
        std::fs::write(&path, r#"{"image_size": 320, "seed": 5}"#)?;

        let config = GeneratorConfig::from_json_file(&path)?;
        assert_eq!(config.image_size, 320);
        assert_eq!(config.seed, Some(5));
        Ok(())
    }
}
