//! src/dataloader/loader.rs
//!
//! `PrefetchLoader` and its per-epoch iterator.
//!
//! The iterator is the only owner of the epoch's iteration state: the
//! visiting order, the next position to dispatch and the next position to
//! yield. Workers receive disjoint positions round-robin and never touch
//! that state, so there is no shared cursor.

use crate::batch::DetectionBatch;
use crate::generator::{DetectionGenerator, GroupProducer};
use crate::grouping::GroupScheduler;
use crate::multiscale::MultiScaleController;
use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use super::config::LoaderConfig;
use super::pool::WorkerPool;

/// One group to produce.
#[derive(Debug, Clone, Copy)]
pub(crate) struct GroupTask {
    /// Position in the epoch's visiting order.
    position: usize,
    group_index: usize,
    epoch: usize,
    image_size: u32,
}

/// Result of one `GroupTask`.
pub(crate) struct GroupOutput {
    position: usize,
    result: Result<Option<DetectionBatch>>,
}

/// Counters for one pass over the groups.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EpochStats {
    /// Batches handed to the consumer.
    pub produced: usize,
    /// Groups emptied by validation and skipped.
    pub skipped_empty: usize,
    /// Groups whose production failed with an error.
    pub failed: usize,
}

/// Drives a [`DetectionGenerator`] with an optional worker pool.
///
/// Each call to [`iter`](Self::iter) is one epoch. Within an epoch every
/// group is produced exactly once; groups emptied by validation are skipped
/// without being yielded. If no batch arrives within `timeout` the iterator
/// yields the timeout error and the epoch ends there. Batches are yielded in the epoch's visiting order
/// regardless of which worker finished first, so for a fixed seed the output
/// does not depend on `num_workers`.
///
/// # Example
/// ```ignore
/// let loader_config = LoaderConfig::builder().num_workers(4).prefetch(2).build();
/// let mut loader = PrefetchLoader::new(&generator, loader_config)?;
///
/// for epoch in 0..num_epochs {
///     for batch in loader.iter()? {
///         let batch = batch?.to_device(Device::cuda_if_available());
///         // forward / backward
///     }
/// }
/// ```
pub struct PrefetchLoader {
    producer: Arc<GroupProducer>,
    scheduler: GroupScheduler,
    multi_scale: MultiScaleController,
    config: LoaderConfig,
    epoch: usize,
}

impl PrefetchLoader {
    pub fn new(generator: &DetectionGenerator, config: LoaderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            producer: generator.producer(),
            scheduler: generator.scheduler().clone(),
            multi_scale: generator.multi_scale_controller()?,
            config,
            epoch: 0,
        })
    }

    /// Number of groups per epoch (upper bound on batches per epoch).
    pub fn len(&self) -> usize {
        self.producer.num_groups()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Epoch the next call to `iter` will run.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Starts the next epoch.
    ///
    /// The group order is reshuffled at this boundary only, before any task
    /// of the new epoch is dispatched.
    pub fn iter(&mut self) -> Result<EpochIter<'_>> {
        let epoch = self.epoch;
        self.epoch += 1;
        let order = self.scheduler.epoch_order(epoch);

        let pool = if self.config.num_workers > 0 {
            Some(spawn_workers(Arc::clone(&self.producer), &self.config)?)
        } else {
            None
        };

        debug!(
            epoch,
            groups = order.len(),
            workers = self.config.num_workers,
            "Starting epoch"
        );

        Ok(EpochIter {
            producer: Arc::clone(&self.producer),
            multi_scale: &mut self.multi_scale,
            pool,
            order,
            epoch,
            queue_depth: self.config.queue_depth(),
            timeout: self.config.timeout,
            next_dispatch: 0,
            next_yield: 0,
            pending: HashMap::new(),
            stats: EpochStats::default(),
            aborted: false,
            finished: false,
        })
    }
}

/// Creates fresh worker threads for a single epoch.
fn spawn_workers(
    producer: Arc<GroupProducer>,
    config: &LoaderConfig,
) -> Result<WorkerPool<GroupTask, GroupOutput>> {
    let worker_timeout = config.worker_timeout;

    WorkerPool::new(
        config.num_workers,
        config.prefetch,
        move |worker_id: usize,
              task_rx: Receiver<GroupTask>,
              output_tx: Sender<GroupOutput>,
              shutdown: Arc<AtomicBool>| {
            while !shutdown.load(Ordering::Relaxed) {
                match task_rx.recv_timeout(worker_timeout) {
                    Ok(task) => {
                        trace!(
                            worker = worker_id,
                            group_index = task.group_index,
                            "Producing group"
                        );
                        let result = producer
                            .produce(task.group_index, task.epoch, task.image_size)
                            .with_context(|| {
                                format!(
                                    "Worker {} failed to produce group {}",
                                    worker_id, task.group_index
                                )
                            });
                        let output = GroupOutput {
                            position: task.position,
                            result,
                        };
                        if output_tx.send(output).is_err() {
                            break;
                        }
                    }
                    Err(RecvTimeoutError::Timeout) => continue,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        },
    )
    .context("Failed to create worker pool for detection generator")
}

/// Iterator over the batches of one epoch.
///
/// Dropping it early shuts the workers down; batches still in flight are
/// discarded. A timeout or a lost worker is yielded as an error and ends the
/// epoch.
pub struct EpochIter<'a> {
    producer: Arc<GroupProducer>,
    multi_scale: &'a mut MultiScaleController,
    pool: Option<WorkerPool<GroupTask, GroupOutput>>,
    order: Vec<usize>,
    epoch: usize,
    queue_depth: usize,
    timeout: std::time::Duration,
    /// Next position of `order` to hand to a worker.
    next_dispatch: usize,
    /// Next position of `order` to yield.
    next_yield: usize,
    /// Finished positions waiting for their turn.
    pending: HashMap<usize, Result<Option<DetectionBatch>>>,
    stats: EpochStats,
    /// Set when the pool can no longer be trusted to deliver `next_yield`.
    aborted: bool,
    finished: bool,
}

impl EpochIter<'_> {
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn stats(&self) -> EpochStats {
        self.stats
    }

    fn next_task(&mut self) -> GroupTask {
        let position = self.next_dispatch;
        self.next_dispatch += 1;
        GroupTask {
            position,
            group_index: self.order[position],
            epoch: self.epoch,
            image_size: self.multi_scale.next_size(),
        }
    }

    /// Dispatches tasks until `queue_depth` positions are outstanding.
    fn fill(&mut self) -> Result<()> {
        while self.next_dispatch < self.order.len()
            && self.next_dispatch - self.next_yield < self.queue_depth
        {
            let task = self.next_task();
            if let Some(pool) = &self.pool {
                pool.send_to(task.position % pool.num_workers(), task)?;
            }
        }
        Ok(())
    }

    /// Result for position `next_yield`, produced inline or awaited from workers.
    fn take_next(&mut self) -> Result<Option<DetectionBatch>> {
        if self.pool.is_none() {
            let task = self.next_task();
            return self
                .producer
                .produce(task.group_index, task.epoch, task.image_size);
        }

        self.fill()?;
        loop {
            if let Some(result) = self.pending.remove(&self.next_yield) {
                return result;
            }
            let pool = self
                .pool
                .as_ref()
                .ok_or_else(|| anyhow!("Worker pool missing"))?;
            match pool.output().recv_timeout(self.timeout) {
                Ok(output) => {
                    self.pending.insert(output.position, output.result);
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.aborted = true;
                    return Err(anyhow!(
                        "Timeout waiting for group at position {} after {:?}",
                        self.next_yield,
                        self.timeout
                    ));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    self.aborted = true;
                    return Err(anyhow!("Workers disconnected unexpectedly"));
                }
            }
        }
    }

    fn finish(&mut self) {
        self.finished = true;
        self.pool = None;
        self.pending.clear();
        debug!(
            epoch = self.epoch,
            produced = self.stats.produced,
            skipped_empty = self.stats.skipped_empty,
            failed = self.stats.failed,
            "Epoch finished"
        );
    }
}

impl Iterator for EpochIter<'_> {
    type Item = Result<DetectionBatch>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            if self.next_yield >= self.order.len() {
                self.finish();
                break;
            }

            let result = self.take_next();
            self.next_yield += 1;
            match result {
                Ok(Some(batch)) => {
                    self.stats.produced += 1;
                    return Some(Ok(batch));
                }
                Ok(None) => {
                    self.stats.skipped_empty += 1;
                    debug!(
                        epoch = self.epoch,
                        position = self.next_yield - 1,
                        "Group emptied by validation, skipping"
                    );
                }
                Err(e) => {
                    self.stats.failed += 1;
                    if self.aborted {
                        self.finish();
                    }
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
