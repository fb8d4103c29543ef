//! Worker pool for parallel batch production.
//!
//! Each worker owns a dedicated bounded task channel; the dispatcher routes
//! every task to a specific worker, so task assignment is a pure function of
//! the dispatch order. All workers share one bounded output channel.
//!
//! # Key features
//! - Bounded channels keep the number of buffered batches fixed
//! - Graceful shutdown on drop
//! - Named worker threads (`detection-worker-{id}`) for debugging

use anyhow::{ensure, Context, Result};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

/// Thread pool with per-worker task channels.
///
/// - Task channels: Dispatcher -> Worker `i`
/// - Output channel: Workers -> Dispatcher
/// - Shutdown flag: Enables graceful termination
pub(crate) struct WorkerPool<Task, Output> {
    workers: Vec<thread::JoinHandle<()>>,
    task_txs: Vec<Sender<Task>>,
    output_rx: Receiver<Output>,
    shutdown: Arc<AtomicBool>,
}

impl<Task, Output> WorkerPool<Task, Output>
where
    Task: Send + 'static,
    Output: Send + 'static,
{
    /// Spawns `num_workers` threads running `worker_fn(worker_id, tasks, outputs, shutdown)`.
    ///
    /// Each task channel holds `buffer_size` tasks; the output channel holds
    /// `num_workers * buffer_size` results.
    pub(crate) fn new<F>(num_workers: usize, buffer_size: usize, worker_fn: F) -> Result<Self>
    where
        F: Fn(usize, Receiver<Task>, Sender<Output>, Arc<AtomicBool>) + Send + Sync + 'static,
    {
        ensure!(
            num_workers > 0,
            "WorkerPool needs at least one worker; use num_workers = 0 \
            in LoaderConfig to produce on the consumer thread"
        );
        ensure!(
            buffer_size > 0,
            "WorkerPool task queues need capacity > 0, got buffer_size 0"
        );

        let (output_tx, output_rx) = bounded(num_workers * buffer_size);
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_fn = Arc::new(worker_fn);

        let mut workers = Vec::with_capacity(num_workers);
        let mut task_txs = Vec::with_capacity(num_workers);

        for worker_id in 0..num_workers {
            let (task_tx, task_rx) = bounded(buffer_size);
            let output_tx = output_tx.clone();
            let shutdown_clone = shutdown.clone();
            let worker_fn_clone = worker_fn.clone();

            let handle = thread::Builder::new()
                .name(format!("detection-worker-{}", worker_id))
                .spawn(move || worker_fn_clone(worker_id, task_rx, output_tx, shutdown_clone))
                .with_context(|| format!("Failed to spawn worker thread {}", worker_id))?;

            workers.push(handle);
            task_txs.push(task_tx);
        }

        Ok(Self {
            workers,
            task_txs,
            output_rx,
            shutdown,
        })
    }

    pub(crate) fn num_workers(&self) -> usize {
        self.task_txs.len()
    }

    /// Routes a task to `worker_id`. Blocks while that worker's queue is full.
    pub(crate) fn send_to(&self, worker_id: usize, task: Task) -> Result<()> {
        let tx = self
            .task_txs
            .get(worker_id)
            .with_context(|| format!("No worker with id {}", worker_id))?;
        tx.send(task)
            .map_err(|_| anyhow::anyhow!("Worker {} disconnected", worker_id))
    }

    pub(crate) fn output(&self) -> &Receiver<Output> {
        &self.output_rx
    }
}

impl<Task, Output> Drop for WorkerPool<Task, Output> {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // Closing the task queues wakes workers blocked in recv.
        self.task_txs.clear();

        // Unblock workers waiting on a full output channel
        while self.output_rx.try_recv().is_ok() {}

        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}
