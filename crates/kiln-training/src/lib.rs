//! Kiln Training
//!
//! Backend-agnostic training primitives for the job worker:
//! - Decoding job requests (`JobRequest`) and validating their config (`TrainConfig`)
//! - Loading and saving model bundles (`ModelHandle`) and the optimizer registry
//! - Dataset descriptors, splits and the `DatasetLoader` seam
//! - The `Trainer` seam and the epoch loop over a `FitBackend`

pub mod archive;
pub mod artifacts;
pub mod backend;
pub mod builders;
pub mod callbacks;
pub mod config;
pub mod dataset;
pub mod error;
pub mod job;
pub mod layout;
pub mod optimizer;
pub mod progress;
pub mod registry;
pub mod trainer;

pub use artifacts::{ModelHandle, ModelManifest, OptimizerSpec};
pub use backend::{FitBackend, LinearBackend};
pub use builders::{build_splits, parse_csv_samples};
pub use config::{DEFAULT_VALIDATION_SPLIT, EarlyStopPolicy, LrReductionPolicy, Metric, TrainConfig};
pub use dataset::{DataSplits, DatasetDescriptor, DatasetKind, DatasetLoader, Sample};
pub use error::{ArchiveError, ArtifactError, DatasetError, InvalidConfig, TrainingError, TrainingResult};
pub use job::{DecodeError, Identifier, JobRequest, JobRoute};
pub use layout::JobLayout;
pub use optimizer::{Optimizer, OptimizerKind, OptimizerParams};
pub use progress::{EpochMetrics, ProgressEvent, ProgressSink};
pub use registry::resolve_optimizer;
pub use trainer::{EpochTrainer, Trainer};
