//! src/grouping.rs
//!
//! Partitioning of dataset indices into fixed-size groups.
//!
//! A group is the list of dataset indices that make up one batch. Groups are
//! computed once at construction; at each epoch boundary only the *order*
//! in which groups are visited changes.
//!
//! ```text
//!   ordering (none | random | ratio)     chunk by batch_size, wrap tail
//!   [4, 0, 6, 2, 1, 5, 3]  ───────────▶  [[4,0,6], [2,1,5], [3,4,0]]
//! ```

use crate::dataset::DetectionDataset;
use crate::error::GeneratorError;
use anyhow::{ensure, Context, Result};
use rand::seq::SliceRandom;
use rand::{rngs::StdRng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// How dataset indices are ordered before being chunked into groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupMethod {
    /// Dataset order.
    None,
    /// A uniform random permutation drawn once at construction.
    Random,
    /// Ascending `width / height`, so each batch holds similarly shaped
    /// images and letterbox padding is minimal.
    #[default]
    Ratio,
}

impl FromStr for GroupMethod {
    type Err = GeneratorError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "random" => Ok(Self::Random),
            "ratio" => Ok(Self::Ratio),
            other => Err(GeneratorError::config(format!(
                "unknown group method '{}', expected one of: none, random, ratio",
                other
            ))),
        }
    }
}

impl fmt::Display for GroupMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::None => "none",
            Self::Random => "random",
            Self::Ratio => "ratio",
        };
        f.write_str(name)
    }
}

/// Owns the groups of one generator and decides the order they are
/// visited in each epoch.
///
/// The groups themselves live behind an `Arc` and are shared read-only
/// with worker threads. The scheduler holds no cursor: callers ask for the
/// visiting order of an epoch with [`epoch_order`](Self::epoch_order) and
/// keep their own position in it.
///
/// # Seed handling
/// - Random grouping is drawn from `StdRng::seed_from_u64(base_seed)`.
/// - The visiting order for epoch `e` is drawn from `base_seed + e`, so
///   every epoch gets a fresh but reproducible permutation. Epoch 0 is
///   already shuffled when `shuffle_groups` is on.
#[derive(Debug, Clone)]
pub struct GroupScheduler {
    groups: Arc<[Vec<usize>]>,
    batch_size: usize,
    method: GroupMethod,
    shuffle_groups: bool,
    base_seed: u64,
}

impl GroupScheduler {
    pub fn new(
        dataset: &dyn DetectionDataset,
        batch_size: usize,
        method: GroupMethod,
        shuffle_groups: bool,
        base_seed: u64,
    ) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(base_seed);
        let groups = Self::group_images(dataset, batch_size, method, &mut rng)?;

        Ok(Self {
            groups: groups.into(),
            batch_size,
            method,
            shuffle_groups,
            base_seed,
        })
    }

    /// Orders all dataset indices according to `method` and partitions them
    /// into consecutive chunks of `batch_size`.
    ///
    /// The final chunk is completed by wrapping around the ordered list, so
    /// every group holds exactly `batch_size` indices:
    ///
    /// ```ignore
    /// // size 7, batch_size 3, method none
    /// // => [[0, 1, 2], [3, 4, 5], [6, 0, 1]]
    /// ```
    pub fn group_images(
        dataset: &dyn DetectionDataset,
        batch_size: usize,
        method: GroupMethod,
        rng: &mut StdRng,
    ) -> Result<Vec<Vec<usize>>> {
        ensure!(
            batch_size > 0,
            GeneratorError::config("batch_size must be a positive integer, but got 0")
        );
        let size = dataset.size();
        ensure!(
            size > 0,
            GeneratorError::config("cannot group an empty dataset")
        );

        let mut order: Vec<usize> = (0..size).collect();
        match method {
            GroupMethod::None => {}
            GroupMethod::Random => order.shuffle(rng),
            GroupMethod::Ratio => {
                let ratios = (0..size)
                    .map(|i| {
                        dataset
                            .image_aspect_ratio(i)
                            .with_context(|| format!("Failed to read aspect ratio of image {}", i))
                    })
                    .collect::<Result<Vec<f32>>>()?;
                // Stable, so equal ratios keep dataset order.
                order.sort_by(|&a, &b| ratios[a].total_cmp(&ratios[b]));
            }
        }

        Ok((0..size)
            .step_by(batch_size)
            .map(|start| {
                (start..start + batch_size)
                    .map(|x| order[x % size])
                    .collect()
            })
            .collect())
    }

    /// Number of groups per epoch.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn method(&self) -> GroupMethod {
        self.method
    }

    pub fn groups(&self) -> &[Vec<usize>] {
        &self.groups
    }

    /// Shared handle to the groups for worker threads.
    pub fn shared_groups(&self) -> Arc<[Vec<usize>]> {
        Arc::clone(&self.groups)
    }

    pub fn group(&self, group_index: usize) -> Option<&[usize]> {
        self.groups.get(group_index).map(Vec::as_slice)
    }

    /// Returns the order in which group indices are visited in `epoch`.
    ///
    /// Identity when shuffling is off; otherwise a permutation seeded by
    /// `base_seed + epoch`. The contents of each group are never touched.
    pub fn epoch_order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.groups.len()).collect();
        if self.shuffle_groups {
            let mut rng = StdRng::seed_from_u64(self.base_seed.wrapping_add(epoch as u64));
            order.shuffle(&mut rng);
        }
        order
    }
}
