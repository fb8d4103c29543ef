//! src/dataloader/mod.rs
//!
//! This module implements the `PrefetchLoader`.
//!
//! The `PrefetchLoader` overlaps batch production with training. A
//! dispatcher (the consumer's thread) walks the epoch's group order and
//! hands groups to workers; workers run the full load → augment → validate
//! → assemble sequence for their group and push the batch back.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────┐
//!                 │  GroupScheduler  │ epoch order (reshuffled per epoch)
//!                 └────────┬─────────┘
//!                          ↓
//!                 ┌──────────────────┐
//!                 │    EpochIter     │ dispatch position p, image size S(p)
//!                 └──┬─────┬──────┬──┘
//!          p % W = 0 │     │ 1    │ W-1      per-worker bounded queues
//!                    ↓     ↓      ↓
//!               [worker] [worker] [worker]   GroupProducer::produce
//!                    │     │      │
//!                    └─────┴──────┘
//!                          ↓                 shared bounded output queue
//!                 ┌──────────────────┐
//!                 │  reorder buffer  │ yield in position order,
//!                 └────────┬─────────┘ skip emptied groups
//!                          ↓
//!                   DetectionBatch
//! ```
//!
//! At most `num_workers * prefetch` positions are outstanding (dispatched
//! but not yet yielded). When the consumer stops pulling, dispatch stops and
//! workers go idle.
//!
//! # Module Structure
//!
//! ```text
//! src/dataloader/
//! ├── mod.rs       # Public API exports + module-level architecture docs
//! ├── config.rs    # LoaderConfig and builder
//! ├── loader.rs    # PrefetchLoader, EpochIter
//! └── pool.rs      # Generic `WorkerPool<Task, Output>` implementation
//! ```

mod config;
mod loader;
mod pool;

pub use config::{LoaderConfig, LoaderConfigBuilder};
pub use loader::{EpochIter, EpochStats, PrefetchLoader};
