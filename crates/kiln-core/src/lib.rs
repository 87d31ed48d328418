//! Kiln Core
//!
//! The job lifecycle orchestrator:
//! - Worker configuration (`WorkerConfig`)
//! - HTTP status reporting and epoch progress (`HttpStatusReporter`)
//! - Model fetch, dataset load and model upload over HTTP
//! - The per-job state machine (`JobPipeline`)
//! - The broker binding and serial consumption loop (`QueueConsumer`)

pub mod amqp;
pub mod config;
pub mod consumer;
pub mod datasets;
pub mod error;
pub mod fetcher;
pub mod pipeline;
pub mod publisher;
pub mod reporter;

pub use amqp::AmqpSource;
pub use config::{AckMode, ConfigError, ConfigResult, WorkerConfig};
pub use consumer::{ConsumerStats, InboundMessage, MessageSource, QueueConsumer};
pub use datasets::HttpDatasetLoader;
pub use error::{BrokerError, PublishError};
pub use fetcher::{HttpArtifactFetcher, ModelSource};
pub use pipeline::{FailureKind, JobOutcome, JobPipeline, PipelineSettings, PipelineState, StageFailure};
pub use publisher::{HttpModelPublisher, ModelPublisher};
pub use reporter::{HttpProgressSink, HttpStatusReporter, ReportKind, StatusReport, StatusSink};
