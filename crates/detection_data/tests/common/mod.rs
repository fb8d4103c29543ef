#![allow(dead_code)]

use detection_data::{Annotations, DetectionDataset, InMemoryDetectionDataset};

use anyhow::Result;
use image::{Rgb, RgbImage};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const CLASS_NAMES: [&str; 3] = ["cat", "dog", "bird"];

pub fn class_names() -> Vec<String> {
    CLASS_NAMES.iter().map(|s| s.to_string()).collect()
}

/// Image of `width x height` with a light background and one dark square
/// under every box.
pub fn draw_image(width: u32, height: u32, boxes: &[(f32, f32, f32, f32, usize)]) -> RgbImage {
    let mut image = RgbImage::from_pixel(width, height, Rgb([200, 200, 200]));
    for &(x1, y1, x2, y2, label) in boxes {
        let color = Rgb([(label % 6) as u8 * 40, 20, 20]);
        for y in y1 as u32..(y2 as u32).min(height) {
            for x in x1 as u32..(x2 as u32).min(width) {
                image.put_pixel(x, y, color);
            }
        }
    }
    image
}

/// Image sizes cycling through wide, tall and square shapes.
pub fn image_dims(index: usize) -> (u32, u32) {
    match index % 3 {
        0 => (160, 80),
        1 => (80, 160),
        _ => (120, 120),
    }
}

/// `size` images, each with one 40x40 box labelled `index % 3`.
pub fn synthetic_dataset(size: usize) -> Result<InMemoryDetectionDataset> {
    let entries = (0..size)
        .map(|index| {
            let (w, h) = image_dims(index);
            let boxes = [(10.0, 10.0, 50.0, 50.0, index % CLASS_NAMES.len())];
            (draw_image(w, h, &boxes), Annotations::from_boxes(&boxes))
        })
        .collect();
    InMemoryDetectionDataset::new(entries, class_names())
}

/// A 640x640 image whose only box shrinks to 2px at a 320 canvas.
pub fn tiny_box_entry() -> (RgbImage, Annotations) {
    let boxes = [(100.0, 100.0, 104.0, 104.0, 0)];
    (draw_image(640, 640, &boxes), Annotations::from_boxes(&boxes))
}

/// Dataset where the images at `tiny` lose every box after letterboxing to
/// 320; all others keep one 200x200 box.
pub fn dataset_with_tiny_boxes(size: usize, tiny: &[usize]) -> Result<InMemoryDetectionDataset> {
    let entries = (0..size)
        .map(|index| {
            if tiny.contains(&index) {
                tiny_box_entry()
            } else {
                let boxes = [(100.0, 100.0, 300.0, 300.0, 1)];
                (draw_image(640, 640, &boxes), Annotations::from_boxes(&boxes))
            }
        })
        .collect();
    InMemoryDetectionDataset::new(entries, class_names())
}

/// Box rows of one batch row, stopping at the first all-zero padding row.
pub fn batch_rows(gt_boxes: &tch::Tensor, row: i64) -> Vec<[f32; 5]> {
    let max_boxes = gt_boxes.size()[1];
    (0..max_boxes)
        .map(|k| {
            let mut r = [0.0f32; 5];
            for (c, v) in r.iter_mut().enumerate() {
                *v = gt_boxes.double_value(&[row, k, c as i64]) as f32;
            }
            r
        })
        .take_while(|r| r.iter().any(|&v| v != 0.0))
        .collect()
}

/// Wraps a dataset, counts image loads and sleeps before loading the images
/// listed in `slow`.
pub struct SlowDataset {
    pub inner: InMemoryDetectionDataset,
    pub loads: Arc<AtomicUsize>,
    pub slow: HashSet<usize>,
    pub delay: Duration,
}

impl SlowDataset {
    pub fn new(inner: InMemoryDetectionDataset, slow: &[usize], delay: Duration) -> Self {
        Self {
            inner,
            loads: Arc::new(AtomicUsize::new(0)),
            slow: slow.iter().copied().collect(),
            delay,
        }
    }
}

impl DetectionDataset for SlowDataset {
    fn size(&self) -> usize {
        self.inner.size()
    }

    fn num_classes(&self) -> usize {
        self.inner.num_classes()
    }

    fn label_to_name(&self, label: usize) -> Option<&str> {
        self.inner.label_to_name(label)
    }

    fn image_aspect_ratio(&self, index: usize) -> Result<f32> {
        self.inner.image_aspect_ratio(index)
    }

    fn load_image(&self, index: usize) -> Result<RgbImage> {
        if self.slow.contains(&index) {
            std::thread::sleep(self.delay);
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load_image(index)
    }

    fn load_annotations(&self, index: usize) -> Result<Annotations> {
        self.inner.load_annotations(index)
    }
}
