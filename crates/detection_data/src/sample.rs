use image::RgbImage;

/// An axis-aligned box in pixel coordinates: `[x1, y1, x2, y2]`.
pub type BoundingBox = [f32; 4];

/// The annotations of one image: class labels and their boxes.
///
/// `labels[i]` is the class of `bboxes[i]`. Every mutating method keeps the
/// two vectors index-aligned, so callers never edit them separately.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Annotations {
    pub labels: Vec<usize>,
    pub bboxes: Vec<BoundingBox>,
}

impl Annotations {
    pub fn new(labels: Vec<usize>, bboxes: Vec<BoundingBox>) -> Self {
        Self { labels, bboxes }
    }

    /// Builds annotations from `(x1, y1, x2, y2, label)` tuples.
    pub fn from_boxes(boxes: &[(f32, f32, f32, f32, usize)]) -> Self {
        boxes.iter().fold(Self::default(), |mut acc, &(x1, y1, x2, y2, l)| {
            acc.push(l, [x1, y1, x2, y2]);
            acc
        })
    }

    /// Number of boxes.
    pub fn len(&self) -> usize {
        self.bboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bboxes.is_empty()
    }

    pub fn push(&mut self, label: usize, bbox: BoundingBox) {
        self.labels.push(label);
        self.bboxes.push(bbox);
    }

    /// Iterates `(label, box)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &BoundingBox)> + '_ {
        self.labels.iter().copied().zip(self.bboxes.iter())
    }

    /// Keeps only the boxes for which `keep` returns true.
    ///
    /// Returns the original indices of the removed boxes, in ascending order.
    pub fn retain_boxes<F>(&mut self, mut keep: F) -> Vec<usize>
    where
        F: FnMut(&BoundingBox) -> bool,
    {
        let mut removed = Vec::new();
        let mut labels = Vec::with_capacity(self.labels.len());
        let mut bboxes = Vec::with_capacity(self.bboxes.len());

        for (i, (label, bbox)) in self.labels.drain(..).zip(self.bboxes.drain(..)).enumerate() {
            if keep(&bbox) {
                labels.push(label);
                bboxes.push(bbox);
            } else {
                removed.push(i);
            }
        }

        self.labels = labels;
        self.bboxes = bboxes;
        removed
    }

    /// Applies `f` to every box in place.
    pub fn map_boxes<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut BoundingBox),
    {
        self.bboxes.iter_mut().for_each(|b| f(b));
    }
}

/// A raw sample as loaded from the dataset, possibly augmented.
#[derive(Debug, Clone)]
pub struct DetectionSample {
    /// Dataset index the sample was loaded from.
    pub index: usize,
    pub image: RgbImage,
    pub annotations: Annotations,
}

impl DetectionSample {
    pub fn new(index: usize, image: RgbImage, annotations: Annotations) -> Self {
        Self {
            index,
            image,
            annotations,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

/// A sample letterboxed onto a square `side x side` canvas, ready to be
/// stacked into a batch. Boxes are expressed in canvas pixels.
#[derive(Debug, Clone)]
pub struct PreparedSample {
    pub index: usize,
    pub image: RgbImage,
    pub annotations: Annotations,
    /// Factor applied to the source image before padding.
    pub scale: f32,
    /// Left and top padding in canvas pixels.
    pub offset: (u32, u32),
}

impl PreparedSample {
    pub fn side(&self) -> u32 {
        self.image.width()
    }
}
