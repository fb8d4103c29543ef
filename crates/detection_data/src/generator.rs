//! src/generator.rs
//!
//! Turns groups of dataset indices into batches.
//!
//! ```text
//!              ┌───────────────────┐
//!              │ DetectionDataset  │  load_image / load_annotations
//!              └─────────┬─────────┘
//!                        ↓
//!   GroupProducer   contract check → pre-pass → visual → geometric → misc
//!   (Arc, shared)        → letterbox(S) → post-pass → BatchAssembler
//!                        ↓
//!        ┌───────────────┴───────────────┐
//!        ↓                               ↓
//!  BatchSequence                   PrefetchLoader
//!  (one consumer, Keras-like       (worker pool, one pass per epoch,
//!   cursor with wrap + retry)       see `dataloader`)
//! ```
//!
//! `DetectionGenerator` itself is immutable after construction. Iteration
//! state (cursor, epoch, multi-scale schedule) lives in the object that
//! drives it, so several consumers never share a cursor.

use crate::anchors::AnchorSet;
use crate::batch::{BatchAssembler, DetectionBatch};
use crate::config::GeneratorConfig;
use crate::dataset::DetectionDataset;
use crate::error::GeneratorError;
use crate::grouping::GroupScheduler;
use crate::multiscale::MultiScaleController;
use crate::sample::{DetectionSample, PreparedSample};
use crate::transforms::{AugmentationPipeline, Letterbox};
use crate::validation::AnnotationValidator;
use anyhow::{anyhow, Context, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::Arc;
use tracing::{debug, info};

// ============================================================================
// GroupProducer
// ============================================================================

/// Everything needed to build the batch of one group. Read-only, shared
/// across worker threads behind an `Arc`.
pub struct GroupProducer {
    dataset: Arc<dyn DetectionDataset>,
    groups: Arc<[Vec<usize>]>,
    pipeline: AugmentationPipeline,
    validator: AnnotationValidator,
    assembler: BatchAssembler,
    augment_seed: u64,
}

impl GroupProducer {
    /// Number of groups per epoch.
    pub fn num_groups(&self) -> usize {
        self.groups.len()
    }

    /// Deterministic random generator for one group task.
    ///
    /// Seed formula: `augment_seed + (epoch << 32) + group_index`, so the
    /// augmentation of a group depends only on the seed, the epoch and the
    /// group, never on which worker happens to run it.
    pub fn task_rng(&self, epoch: usize, group_index: usize) -> StdRng {
        let seed = self
            .augment_seed
            .wrapping_add((epoch as u64) << 32)
            .wrapping_add(group_index as u64);
        StdRng::seed_from_u64(seed)
    }

    fn group(&self, group_index: usize) -> Result<&[usize]> {
        self.groups
            .get(group_index)
            .map(Vec::as_slice)
            .ok_or_else(|| {
                anyhow!(
                    "Group index {} out of bounds for {} groups",
                    group_index,
                    self.groups.len()
                )
            })
    }

    /// Loads every sample of a group and checks the dataset contract.
    pub fn load_annotations_group(&self, group_index: usize) -> Result<Vec<DetectionSample>> {
        let num_classes = self.dataset.num_classes();
        self.group(group_index)?
            .iter()
            .map(|&index| {
                let image = self
                    .dataset
                    .load_image(index)
                    .with_context(|| format!("Failed to load image {}", index))?;
                let annotations = self
                    .dataset
                    .load_annotations(index)
                    .with_context(|| format!("Failed to load annotations of image {}", index))?;
                self.validator
                    .check_contract(index, &image, &annotations, num_classes)?;
                Ok(DetectionSample::new(index, image, annotations))
            })
            .collect()
    }

    /// Runs a group through loading, augmentation, letterboxing and both
    /// validation passes. Samples emptied by the post-pass are left out.
    pub fn prepare_group(
        &self,
        group_index: usize,
        epoch: usize,
        image_size: u32,
    ) -> Result<Vec<PreparedSample>> {
        let mut rng = self.task_rng(epoch, group_index);
        let letterbox = Letterbox::new(image_size)?;

        let prepared = self
            .load_annotations_group(group_index)?
            .into_iter()
            .map(|mut sample| {
                self.validator.filter_annotations(&mut sample);
                let sample = self.pipeline.apply(sample, &mut rng)?;
                letterbox.apply(sample)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(self.validator.clip_group(prepared))
    }

    /// Builds the batch of a group, `None` when validation emptied it.
    pub fn produce(
        &self,
        group_index: usize,
        epoch: usize,
        image_size: u32,
    ) -> Result<Option<DetectionBatch>> {
        let samples = self.prepare_group(group_index, epoch, image_size)?;
        self.assembler.assemble(group_index, &samples)
    }
}

// ============================================================================
// DetectionGenerator
// ============================================================================

/// Batch generator for training an object detector.
///
/// # Example
/// ```ignore
/// let config = GeneratorConfig::builder()
///     .batch_size(8)
///     .multi_scale(true)
///     .anchors_path("yolo_anchors.txt")
///     .seed(42)
///     .build();
/// let pipeline = AugmentationPipeline::new()
///     .with_visual_effect(ColorJitter::default())
///     .with_misc_effect(Cutout::new(0.5, 0.3, 0.7)?);
/// let generator = DetectionGenerator::new(dataset, config, pipeline)?;
///
/// let mut sequence = generator.sequence()?;
/// for _ in 0..generator.len() {
///     let batch = sequence.next_batch()?;
/// }
/// sequence.on_epoch_end();
/// ```
pub struct DetectionGenerator {
    producer: Arc<GroupProducer>,
    scheduler: GroupScheduler,
    anchors: Option<AnchorSet>,
    config: GeneratorConfig,
    seed: u64,
    scale_seed: u64,
}

impl DetectionGenerator {
    pub fn new(
        dataset: impl DetectionDataset + 'static,
        config: GeneratorConfig,
        pipeline: AugmentationPipeline,
    ) -> Result<Self> {
        config.validate()?;

        let seed = config.seed.unwrap_or_else(|| rand::rng().random());
        let mut seeder = StdRng::seed_from_u64(seed);
        let grouping_seed: u64 = seeder.random();
        let augment_seed: u64 = seeder.random();
        let scale_seed: u64 = seeder.random();

        let dataset: Arc<dyn DetectionDataset> = Arc::new(dataset);
        let scheduler = GroupScheduler::new(
            dataset.as_ref(),
            config.batch_size,
            config.group_method,
            config.shuffle_groups,
            grouping_seed,
        )?;

        let anchors = config
            .anchors_path
            .as_ref()
            .map(AnchorSet::from_file)
            .transpose()?;

        info!(
            images = dataset.size(),
            groups = scheduler.len(),
            batch_size = config.batch_size,
            group_method = %config.group_method,
            anchors = anchors.as_ref().map_or(0, AnchorSet::len),
            seed,
            "Detection generator ready"
        );

        let producer = Arc::new(GroupProducer {
            dataset,
            groups: scheduler.shared_groups(),
            pipeline,
            validator: AnnotationValidator::new(),
            assembler: BatchAssembler::new(config.batch_size, config.max_boxes)?,
            augment_seed,
        });

        Ok(Self {
            producer,
            scheduler,
            anchors,
            config,
            seed,
            scale_seed,
        })
    }

    /// Number of batches (groups) per epoch.
    pub fn len(&self) -> usize {
        self.scheduler.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scheduler.is_empty()
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Seed actually in use, drawn at construction if none was configured.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn scheduler(&self) -> &GroupScheduler {
        &self.scheduler
    }

    pub fn groups(&self) -> &[Vec<usize>] {
        self.scheduler.groups()
    }

    /// Anchors loaded from `anchors_path`, if one was configured.
    pub fn anchors(&self) -> Option<&AnchorSet> {
        self.anchors.as_ref()
    }

    pub fn num_classes(&self) -> usize {
        self.producer.dataset.num_classes()
    }

    pub fn label_to_name(&self, label: usize) -> Option<&str> {
        self.producer.dataset.label_to_name(label)
    }

    pub(crate) fn producer(&self) -> Arc<GroupProducer> {
        Arc::clone(&self.producer)
    }

    /// A fresh multi-scale schedule for one consumer.
    pub(crate) fn multi_scale_controller(&self) -> Result<MultiScaleController> {
        MultiScaleController::new(
            self.config.image_size,
            self.config.multi_scale,
            self.config.multi_image_sizes.clone(),
            self.scale_seed,
        )
    }

    /// Builds the batch of `group_index` directly, bypassing any cursor.
    pub fn compute_batch(
        &self,
        group_index: usize,
        epoch: usize,
        image_size: u32,
    ) -> Result<Option<DetectionBatch>> {
        self.producer.produce(group_index, epoch, image_size)
    }

    /// Returns the augmented, letterboxed and validated samples of a group
    /// at the configured base image size, without stacking them.
    pub fn augmented_group(&self, group_index: usize, epoch: usize) -> Result<Vec<PreparedSample>> {
        self.producer
            .prepare_group(group_index, epoch, self.config.image_size)
    }

    /// Starts a single-consumer batch sequence at epoch 0.
    pub fn sequence(&self) -> Result<BatchSequence> {
        Ok(BatchSequence {
            producer: self.producer(),
            order: self.scheduler.epoch_order(0),
            scheduler: self.scheduler.clone(),
            multi_scale: self.multi_scale_controller()?,
            epoch: 0,
            cursor: 0,
        })
    }
}

// ============================================================================
// BatchSequence
// ============================================================================

/// Cursor-driven access for a single consumer.
///
/// Each call to [`next_batch`](Self::next_batch) is one access: it advances
/// the multi-scale schedule once, then produces groups starting at the
/// cursor until one yields a non-empty batch. The cursor moves past every
/// group it tried and wraps at the end of the group list.
pub struct BatchSequence {
    producer: Arc<GroupProducer>,
    scheduler: GroupScheduler,
    order: Vec<usize>,
    multi_scale: MultiScaleController,
    epoch: usize,
    cursor: usize,
}

impl BatchSequence {
    pub fn next_batch(&mut self) -> Result<DetectionBatch> {
        let image_size = self.multi_scale.next_size();
        let len = self.order.len();

        for _ in 0..len {
            let group_index = self.order[self.cursor];
            self.cursor = (self.cursor + 1) % len;

            match self.producer.produce(group_index, self.epoch, image_size)? {
                Some(batch) => return Ok(batch),
                None => debug!(
                    group_index,
                    epoch = self.epoch,
                    "Group emptied by validation, trying the next one"
                ),
            }
        }

        Err(GeneratorError::AllGroupsEmpty { groups: len }.into())
    }

    /// Reshuffles the group order (if enabled) and resets the cursor.
    pub fn on_epoch_end(&mut self) {
        self.epoch += 1;
        self.order = self.scheduler.epoch_order(self.epoch);
        self.cursor = 0;
    }

    /// Position of the next group to try in this epoch's order.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Group visiting order of the current epoch.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Image side used by the most recent access.
    pub fn image_size(&self) -> u32 {
        self.multi_scale.current_size()
    }
}
