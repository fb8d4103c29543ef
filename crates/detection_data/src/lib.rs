pub mod anchors;
pub mod batch;
pub mod config;
pub mod dataloader;
pub mod dataset;
pub mod error;
pub mod generator;
pub mod grouping;
pub mod multiscale;
pub mod sample;
pub mod transforms;
pub mod validation;

pub use anchors::AnchorSet;
pub use batch::{BatchAssembler, DetectionBatch};
pub use config::GeneratorConfig;
pub use dataloader::{LoaderConfig, PrefetchLoader};
pub use dataset::{DetectionDataset, InMemoryDetectionDataset};
pub use error::GeneratorError;
pub use generator::{BatchSequence, DetectionGenerator};
pub use grouping::{GroupMethod, GroupScheduler};
pub use multiscale::MultiScaleController;
pub use sample::{Annotations, DetectionSample, PreparedSample};
pub use transforms::AugmentationPipeline;
pub use validation::AnnotationValidator;
