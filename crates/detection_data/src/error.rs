//! src/error.rs
//!
//! Fatal error taxonomy for the batch generator.
//!
//! Only structural and configuration problems are surfaced as errors.
//! Degenerate boxes and samples are recovered by dropping data and are
//! reported through `tracing` instead (see `validation.rs`).
//!
//! Functions across the crate return `anyhow::Result`; a `GeneratorError`
//! raised anywhere can be recovered with `err.downcast_ref::<GeneratorError>()`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeneratorError {
    /// Invalid or unsupported configuration, detected at construction.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Dataset collaborator returned data that violates its contract.
    #[error("annotation contract violated for sample {index}: {msg}")]
    AnnotationContract { index: usize, msg: String },

    /// A resource file could not be read.
    #[error("failed to read resource {path}: {source}")]
    Resource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A resource file was read but its content is malformed.
    #[error("malformed resource {path}: {msg}")]
    MalformedResource { path: PathBuf, msg: String },

    /// A misc effect stage was handed a sample without boxes.
    #[error("misc effect requires at least one box, sample {index} has none")]
    MiscEffectPrecondition { index: usize },

    /// Every group was emptied by validation, no batch can be produced.
    #[error("all {groups} groups were emptied by annotation validation")]
    AllGroupsEmpty { groups: usize },
}

impl GeneratorError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub(crate) fn contract(index: usize, msg: impl Into<String>) -> Self {
        Self::AnnotationContract {
            index,
            msg: msg.into(),
        }
    }
}
