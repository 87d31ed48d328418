//! Per-job state machine.
//!
//! A job moves strictly forward through the stages below. The first stage
//! error sends it to `Failed`; no later stage runs and the job's scratch
//! directory is removed before the single terminal reply goes out.
//!
//! ```text
//! Received -> ModelLoading -> ModelLoaded -> DatasetLoading -> DatasetLoaded
//!          -> Training -> TrainingComplete -> Persisting -> Done
//! ```

use crate::config::WorkerConfig;
use crate::error::PublishError;
use crate::fetcher::ModelSource;
use crate::publisher::ModelPublisher;
use crate::reporter::{StatusReport, StatusSink};
use futures::FutureExt;
use kiln_training::layout::remove_all;
use kiln_training::{
    ArtifactError, DatasetDescriptor, DatasetError, DatasetLoader, Identifier, InvalidConfig, JobLayout, JobRequest,
    JobRoute, Trainer, TrainingError,
};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub const LOG_DATASET_START: &str = "start loading dataset...";
pub const LOG_DATASET_DONE: &str = "loading dataset finished";
pub const REPLY_SUCCESS: &str = "Train finished successfully.";
pub const REPLY_PERSISTENCE: &str = "OS error";
pub const REPLY_TRAINING_INTERNAL: &str = "internal server error while training";

/// Where a job is in its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    ModelLoading,
    ModelLoaded,
    DatasetLoading,
    DatasetLoaded,
    Training,
    TrainingComplete,
    Persisting,
    Done,
    Failed(FailureKind),
}

impl PipelineState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }

    /// Forward one stage, or fail from any non-terminal state.
    #[must_use]
    pub fn can_transition_to(self, to: Self) -> bool {
        match (self, to) {
            (Self::Done | Self::Failed(_), _) => false,
            (_, Self::Failed(_)) => true,
            (Self::Received, Self::ModelLoading)
            | (Self::ModelLoading, Self::ModelLoaded)
            | (Self::ModelLoaded, Self::DatasetLoading)
            | (Self::DatasetLoading, Self::DatasetLoaded)
            | (Self::DatasetLoaded, Self::Training)
            | (Self::Training, Self::TrainingComplete)
            | (Self::TrainingComplete, Self::Persisting)
            | (Self::Persisting, Self::Done) => true,
            _ => false,
        }
    }
}

/// Closed set of reasons a job can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Config,
    Dataset,
    ArtifactFetch,
    Training,
    Persistence,
}

impl FailureKind {
    /// HTTP status carried by the terminal reply.
    #[must_use]
    pub fn status_code(self) -> u16 {
        match self {
            Self::Config | Self::Dataset => 400,
            Self::ArtifactFetch | Self::Training | Self::Persistence => 500,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Config => "ConfigError",
            Self::Dataset => "DatasetError",
            Self::ArtifactFetch => "ArtifactFetchError",
            Self::Training => "TrainingError",
            Self::Persistence => "PersistenceError",
        };
        f.write_str(name)
    }
}

/// A stage error, already translated into its reply.
///
/// `message` is what the API sees; `detail` is the underlying error, logged
/// locally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {detail}")]
pub struct StageFailure {
    pub kind: FailureKind,
    pub message: String,
    pub detail: String,
}

impl StageFailure {
    fn config(err: &InvalidConfig) -> Self {
        Self { kind: FailureKind::Config, message: err.to_string(), detail: err.to_string() }
    }

    fn artifact_fetch(err: &ArtifactError) -> Self {
        Self { kind: FailureKind::ArtifactFetch, message: format!("failed to get model: {err}"), detail: err.to_string() }
    }

    fn dataset(descriptor: &DatasetDescriptor, err: &DatasetError) -> Self {
        Self {
            kind: FailureKind::Dataset,
            message: format!("failed to get dataset from {}", descriptor.source_label()),
            detail: err.to_string(),
        }
    }

    fn training(err: &TrainingError) -> Self {
        let message = match err {
            TrainingError::Internal(_) => REPLY_TRAINING_INTERNAL.to_string(),
            TrainingError::InvalidArgument(_)
            | TrainingError::Aborted(_)
            | TrainingError::FailedPrecondition(_)
            | TrainingError::Unknown(_) => err.to_string(),
        };
        Self { kind: FailureKind::Training, message, detail: err.to_string() }
    }

    fn persistence(err: &PublishError) -> Self {
        Self { kind: FailureKind::Persistence, message: REPLY_PERSISTENCE.to_string(), detail: err.to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Failed(StageFailure),
}

impl JobOutcome {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// Settings the pipeline reads for every job.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub work_dir: PathBuf,
    pub validation_split: f64,
}

impl From<&WorkerConfig> for PipelineSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self { work_dir: config.work_dir.clone(), validation_split: config.validation_split }
    }
}

/// Tracks one job's state and logs each transition.
struct StateTracker<'a> {
    train_id: &'a Identifier,
    state: PipelineState,
}

impl<'a> StateTracker<'a> {
    fn new(train_id: &'a Identifier) -> Self {
        Self { train_id, state: PipelineState::Received }
    }

    fn advance(&mut self, to: PipelineState) {
        if !self.state.can_transition_to(to) {
            error!(train_id = %self.train_id, from = ?self.state, to = ?to, "invalid pipeline transition");
            return;
        }
        debug!(train_id = %self.train_id, from = ?self.state, to = ?to, "pipeline transition");
        self.state = to;
    }
}

/// Runs one job at a time through fetch, dataset load, fit and upload.
pub struct JobPipeline {
    reporter: Arc<dyn StatusSink>,
    models: Arc<dyn ModelSource>,
    datasets: Arc<dyn DatasetLoader>,
    trainer: Arc<dyn Trainer>,
    publisher: Arc<dyn ModelPublisher>,
    settings: PipelineSettings,
}

impl JobPipeline {
    pub fn new(
        reporter: Arc<dyn StatusSink>,
        models: Arc<dyn ModelSource>,
        datasets: Arc<dyn DatasetLoader>,
        trainer: Arc<dyn Trainer>,
        publisher: Arc<dyn ModelPublisher>,
        settings: PipelineSettings,
    ) -> Self {
        Self { reporter, models, datasets, trainer, publisher, settings }
    }

    /// Run `job` to a terminal state. Always sends exactly one reply.
    pub async fn run(&self, job: &JobRequest) -> JobOutcome {
        let route = job.route();
        let layout = JobLayout::for_job(&self.settings.work_dir, &job.train_id);
        let mut tracker = StateTracker::new(&job.train_id);
        info!(train_id = %job.train_id, project_no = %job.project_no, user_id = %job.user_id, "job received");

        let result = self.run_stages(job, &route, &layout, &mut tracker).await;

        for (path, e) in layout.cleanup() {
            warn!(train_id = %job.train_id, path = %path.display(), error = %e, "failed to remove job file");
        }

        let (report, outcome) = match result {
            Ok(()) => {
                info!(train_id = %job.train_id, trainer = self.trainer.id(), "job completed");
                (StatusReport::reply(&job.train_id, 200, REPLY_SUCCESS), JobOutcome::Completed)
            }
            Err(failure) => {
                tracker.advance(PipelineState::Failed(failure.kind));
                warn!(
                    train_id = %job.train_id,
                    kind = %failure.kind,
                    detail = %failure.detail,
                    "job failed"
                );
                let report = StatusReport::reply(&job.train_id, failure.kind.status_code(), failure.message.clone());
                (report, JobOutcome::Failed(failure))
            }
        };

        self.reporter.send(&route, &report).await;
        outcome
    }

    async fn run_stages(
        &self,
        job: &JobRequest,
        route: &JobRoute,
        layout: &JobLayout,
        tracker: &mut StateTracker<'_>,
    ) -> Result<(), StageFailure> {
        let config = job.train_config(self.settings.validation_split).map_err(|e| StageFailure::config(&e))?;

        tracker.advance(PipelineState::ModelLoading);
        layout.ensure_dirs().map_err(|e| StageFailure::artifact_fetch(&ArtifactError::Io(e)))?;
        let model = self.models.fetch(&job.user_id, layout).await.map_err(|e| StageFailure::artifact_fetch(&e))?;
        tracker.advance(PipelineState::ModelLoaded);

        self.log(route, job, LOG_DATASET_START).await;
        tracker.advance(PipelineState::DatasetLoading);
        let splits = self
            .datasets
            .load(&job.data_set, &model, &layout.dataset_dir())
            .await
            .map_err(|e| StageFailure::dataset(&job.data_set, &e))?;
        tracker.advance(PipelineState::DatasetLoaded);
        self.log(route, job, LOG_DATASET_DONE).await;

        tracker.advance(PipelineState::Training);
        let progress = self.reporter.progress_sink(route);
        let fit = self.trainer.fit(&job.train_id, model, splits, &job.data_set.kind, &config, progress.as_ref());
        let fitted = match AssertUnwindSafe(fit).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(TrainingError::Internal("trainer panicked".to_string())),
        };
        for (path, e) in remove_all(&[layout.dataset_dir()]) {
            warn!(train_id = %job.train_id, path = %path.display(), error = %e, "failed to remove dataset files");
        }
        let model = fitted.map_err(|e| StageFailure::training(&e))?;
        tracker.advance(PipelineState::TrainingComplete);

        tracker.advance(PipelineState::Persisting);
        self.publisher.publish(model, job, layout).await.map_err(|e| StageFailure::persistence(&e))?;
        tracker.advance(PipelineState::Done);
        Ok(())
    }

    async fn log(&self, route: &JobRoute, job: &JobRequest, message: &str) {
        self.reporter.send(route, &StatusReport::log(&job.train_id, 200, message)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        use PipelineState::*;
        let path = [
            Received,
            ModelLoading,
            ModelLoaded,
            DatasetLoading,
            DatasetLoaded,
            Training,
            TrainingComplete,
            Persisting,
            Done,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
        assert!(!Received.can_transition_to(DatasetLoading));
        assert!(!Training.can_transition_to(ModelLoaded));
    }

    #[test]
    fn test_failed_and_done_are_absorbing() {
        use PipelineState::*;
        let failed = Failed(FailureKind::Dataset);
        assert!(DatasetLoading.can_transition_to(failed));
        assert!(Received.can_transition_to(Failed(FailureKind::Config)));
        assert!(!failed.can_transition_to(Done));
        assert!(!failed.can_transition_to(Failed(FailureKind::Training)));
        assert!(!Done.can_transition_to(Failed(FailureKind::Persistence)));
        assert!(failed.is_terminal());
        assert!(Done.is_terminal());
        assert!(!Persisting.is_terminal());
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(FailureKind::Config.status_code(), 400);
        assert_eq!(FailureKind::Dataset.status_code(), 400);
        assert_eq!(FailureKind::ArtifactFetch.status_code(), 500);
        assert_eq!(FailureKind::Training.status_code(), 500);
        assert_eq!(FailureKind::Persistence.status_code(), 500);
    }

    #[test]
    fn test_training_messages_keep_detail() {
        let failure = StageFailure::training(&TrainingError::InvalidArgument("row width 3, expected 2".to_string()));
        assert_eq!(failure.message, "invalid argument: row width 3, expected 2");

        let failure = StageFailure::training(&TrainingError::Aborted("loss is NaN".to_string()));
        assert!(failure.message.contains("loss is NaN"));

        let failure = StageFailure::training(&TrainingError::Internal("boom".to_string()));
        assert_eq!(failure.message, REPLY_TRAINING_INTERNAL);
        assert!(failure.detail.contains("boom"));
    }

    #[test]
    fn test_persistence_message_is_generic() {
        let failure = StageFailure::persistence(&PublishError::Io(std::io::Error::other("disk full")));
        assert_eq!(failure.message, REPLY_PERSISTENCE);
        assert!(failure.detail.contains("disk full"));
    }
}
