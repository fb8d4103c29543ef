use crate::error::GeneratorError;
use crate::sample::Annotations;
use anyhow::{ensure, Result};
use image::RgbImage;
use std::sync::Arc;

/// A `DetectionDataset` is the capability set the generator needs from a
/// concrete dataset reader (COCO, PASCAL VOC, CSV, ...).
///
/// The generator never caches samples: `load_image` and `load_annotations`
/// are called once per sample per group access, possibly from several
/// worker threads at once. Implementations must therefore be
/// `Send + Sync` and cheap to call concurrently.
///
/// Labels are zero-based and contiguous: every label returned by
/// `load_annotations` must be `< num_classes()`.
pub trait DetectionDataset: Send + Sync {
    /// Number of images in the dataset.
    fn size(&self) -> usize;

    /// Number of object classes.
    fn num_classes(&self) -> usize;

    /// Class name for a label, `None` if the label is unknown.
    fn label_to_name(&self, label: usize) -> Option<&str>;

    /// `width / height` of the image at `index`.
    ///
    /// Used for ratio grouping, so readers should answer this without
    /// decoding the image when they can.
    fn image_aspect_ratio(&self, index: usize) -> Result<f32>;

    /// Loads the RGB image at `index`.
    fn load_image(&self, index: usize) -> Result<RgbImage>;

    /// Loads the annotations of the image at `index`, in source pixels.
    fn load_annotations(&self, index: usize) -> Result<Annotations>;

    fn has_label(&self, label: usize) -> bool {
        label < self.num_classes()
    }

    fn has_name(&self, name: &str) -> bool {
        self.name_to_label(name).is_some()
    }

    /// Reverse lookup of `label_to_name`.
    fn name_to_label(&self, name: &str) -> Option<usize> {
        (0..self.num_classes()).find(|&l| self.label_to_name(l) == Some(name))
    }
}

impl<D: DetectionDataset + ?Sized> DetectionDataset for Arc<D> {
    fn size(&self) -> usize {
        (**self).size()
    }
    fn num_classes(&self) -> usize {
        (**self).num_classes()
    }
    fn label_to_name(&self, label: usize) -> Option<&str> {
        (**self).label_to_name(label)
    }
    fn image_aspect_ratio(&self, index: usize) -> Result<f32> {
        (**self).image_aspect_ratio(index)
    }
    fn load_image(&self, index: usize) -> Result<RgbImage> {
        (**self).load_image(index)
    }
    fn load_annotations(&self, index: usize) -> Result<Annotations> {
        (**self).load_annotations(index)
    }
}

/// A dataset that keeps every image and its annotations in memory
/// behind an `Arc`, so clones are cheap and workers share one copy.
///
/// Mostly useful for tests, benchmarks and small datasets that were
/// decoded up front by some other reader.
#[derive(Debug, Clone)]
pub struct InMemoryDetectionDataset {
    entries: Arc<[(RgbImage, Annotations)]>,
    class_names: Arc<[String]>,
}

impl InMemoryDetectionDataset {
    pub fn new(entries: Vec<(RgbImage, Annotations)>, class_names: Vec<String>) -> Result<Self> {
        ensure!(
            !class_names.is_empty(),
            GeneratorError::config("dataset must declare at least one class")
        );
        Ok(Self {
            entries: entries.into(),
            class_names: class_names.into(),
        })
    }

    fn entry(&self, index: usize) -> Result<&(RgbImage, Annotations)> {
        self.entries.get(index).ok_or_else(|| {
            anyhow::anyhow!(
                "Index {} out of bounds for dataset of size {}",
                index,
                self.entries.len()
            )
        })
    }
}

impl DetectionDataset for InMemoryDetectionDataset {
    fn size(&self) -> usize {
        self.entries.len()
    }

    fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    fn label_to_name(&self, label: usize) -> Option<&str> {
        self.class_names.get(label).map(String::as_str)
    }

    fn image_aspect_ratio(&self, index: usize) -> Result<f32> {
        let (image, _) = self.entry(index)?;
        ensure!(
            image.height() > 0,
            GeneratorError::contract(index, "image has zero height")
        );
        Ok(image.width() as f32 / image.height() as f32)
    }

    fn load_image(&self, index: usize) -> Result<RgbImage> {
        Ok(self.entry(index)?.0.clone())
    }

    fn load_annotations(&self, index: usize) -> Result<Annotations> {
        Ok(self.entry(index)?.1.clone())
    }
}
