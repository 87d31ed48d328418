//! In-memory collaborators for pipeline and consumer tests.
//!
//! Every fake appends to one shared [`EventLog`] so tests can assert on the
//! exact interleaving of stage calls and status reports.

#![allow(dead_code)]

use async_trait::async_trait;
use kiln_core::{
    BrokerError, InboundMessage, JobPipeline, MessageSource, ModelPublisher, ModelSource, PipelineSettings,
    PublishError, ReportKind, StatusReport, StatusSink,
};
use kiln_training::{
    ArtifactError, DataSplits, DatasetDescriptor, DatasetError, DatasetKind, DatasetLoader, Identifier, JobLayout,
    JobRequest, JobRoute, ModelHandle, ModelManifest, OptimizerParams, OptimizerSpec, ProgressEvent, ProgressSink,
    Sample, TrainConfig, Trainer, TrainingError, TrainingResult,
};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Log(u16, String),
    Reply(u16, String),
    Epoch(u32),
    Fetch,
    DatasetLoad,
    Fit,
    Publish,
    Delivered(u64),
    Ack(u64),
}

pub type EventLog = Arc<Mutex<Vec<Event>>>;

pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn events(log: &EventLog) -> Vec<Event> {
    log.lock().unwrap().clone()
}

/// Only the `log`/`reply` reports, in order.
pub fn reports(log: &EventLog) -> Vec<Event> {
    events(log).into_iter().filter(|e| matches!(e, Event::Log(..) | Event::Reply(..))).collect()
}

pub fn count(log: &EventLog, wanted: &Event) -> usize {
    events(log).iter().filter(|e| *e == wanted).count()
}

pub fn replies(log: &EventLog) -> Vec<Event> {
    events(log).into_iter().filter(|e| matches!(e, Event::Reply(..))).collect()
}

fn push(log: &EventLog, event: Event) {
    log.lock().unwrap().push(event);
}

pub struct RecordingReporter {
    log: EventLog,
}

#[async_trait]
impl StatusSink for RecordingReporter {
    async fn send(&self, _route: &JobRoute, report: &StatusReport) {
        let event = match report.kind {
            ReportKind::Log => Event::Log(report.status_code, report.message.clone()),
            ReportKind::Reply => Event::Reply(report.status_code, report.message.clone()),
        };
        push(&self.log, event);
    }

    fn progress_sink(&self, _route: &JobRoute) -> Box<dyn ProgressSink> {
        Box::new(RecordingProgress { log: self.log.clone() })
    }
}

struct RecordingProgress {
    log: EventLog,
}

#[async_trait]
impl ProgressSink for RecordingProgress {
    async fn on_event(&self, event: ProgressEvent) {
        if let ProgressEvent::Epoch { metrics, .. } = event {
            push(&self.log, Event::Epoch(metrics.epoch));
        }
    }
}

pub fn test_model(input_dim: usize) -> ModelHandle {
    let manifest = ModelManifest {
        name: "regressor".to_string(),
        input_dim,
        optimizer: OptimizerSpec {
            class_name: "SGD".to_string(),
            config: OptimizerParams { learning_rate: 0.05, ..OptimizerParams::default() },
        },
    };
    ModelHandle::from_manifest(manifest, Vec::new()).unwrap()
}

/// Writes a real bundle into the job layout, then loads it.
struct FakeModelSource {
    log: EventLog,
    fail: bool,
}

#[async_trait]
impl ModelSource for FakeModelSource {
    async fn fetch(&self, user_id: &Identifier, layout: &JobLayout) -> Result<ModelHandle, ArtifactError> {
        push(&self.log, Event::Fetch);
        if self.fail {
            return Err(ArtifactError::Download("connection refused".to_string()));
        }
        std::fs::write(layout.model_archive(), b"zip bytes")?;
        let dir = layout
            .model_dir(user_id)
            .ok_or_else(|| ArtifactError::Invalid(format!("user id `{user_id}` is not a usable bundle path")))?;
        test_model(1).save(&dir)?;
        ModelHandle::load(&dir)
    }
}

/// `y = 2x + 1` on a handful of points, as pre-split or column data.
struct FakeDatasetLoader {
    log: EventLog,
    fail: bool,
}

fn line_samples(range: std::ops::Range<i32>) -> Vec<Sample> {
    range
        .map(|i| {
            let x = f64::from(i) / 10.0;
            Sample { features: vec![x], label: 2.0f64.mul_add(x, 1.0) }
        })
        .collect()
}

#[async_trait]
impl DatasetLoader for FakeDatasetLoader {
    async fn load(
        &self,
        descriptor: &DatasetDescriptor,
        _model: &ModelHandle,
        scratch: &Path,
    ) -> Result<DataSplits, DatasetError> {
        push(&self.log, Event::DatasetLoad);
        if self.fail {
            return Err(DatasetError::Download {
                uri: descriptor.source_label().to_string(),
                reason: "host unreachable".to_string(),
            });
        }
        std::fs::create_dir_all(scratch)?;
        std::fs::write(scratch.join("train.csv"), b"x,y\n")?;
        let validation = if descriptor.kind.is_images() { Some(line_samples(10..14)) } else { None };
        kiln_training::build_splits(&descriptor.kind, line_samples(0..10), validation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrainingFault {
    InvalidArgument,
    Aborted,
    Internal,
    Panic,
}

/// Emits one epoch event per configured epoch and returns the model as-is.
struct FakeTrainer {
    log: EventLog,
    fault: Option<TrainingFault>,
}

#[async_trait]
impl Trainer for FakeTrainer {
    fn id(&self) -> &'static str {
        "fake"
    }

    async fn fit(
        &self,
        train_id: &Identifier,
        model: ModelHandle,
        _splits: DataSplits,
        _kind: &DatasetKind,
        config: &TrainConfig,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<ModelHandle> {
        push(&self.log, Event::Fit);
        match self.fault {
            Some(TrainingFault::InvalidArgument) => {
                return Err(TrainingError::InvalidArgument("sample width 3 does not match input_dim 1".to_string()));
            }
            Some(TrainingFault::Aborted) => return Err(TrainingError::Aborted("loss became NaN".to_string())),
            Some(TrainingFault::Internal) => return Err(TrainingError::Internal("device lost".to_string())),
            Some(TrainingFault::Panic) => panic!("backend exploded"),
            None => {}
        }
        for epoch in 0..config.epochs {
            let metrics = kiln_training::EpochMetrics { epoch, loss: 1.0, val_loss: None, lr: 0.05 };
            progress.on_event(ProgressEvent::Epoch { train_id: train_id.clone(), metrics }).await;
        }
        Ok(model)
    }
}

/// Leaves files in the export directory so cleanup can be checked.
struct FakePublisher {
    log: EventLog,
    fail: bool,
}

#[async_trait]
impl ModelPublisher for FakePublisher {
    async fn publish(&self, model: ModelHandle, job: &JobRequest, layout: &JobLayout) -> Result<(), PublishError> {
        push(&self.log, Event::Publish);
        model.save(&layout.export_dir(&job.user_id, "20240101-00-00-00"))?;
        if self.fail {
            return Err(PublishError::Rejected(reqwest::StatusCode::BAD_GATEWAY));
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Faults {
    pub fetch: bool,
    pub dataset: bool,
    pub training: Option<TrainingFault>,
    pub publish: bool,
}

pub fn settings(work_dir: &Path) -> PipelineSettings {
    PipelineSettings { work_dir: work_dir.to_path_buf(), validation_split: 0.3 }
}

pub fn pipeline(log: &EventLog, work_dir: &Path, faults: Faults) -> JobPipeline {
    pipeline_with_trainer(log, work_dir, faults, Arc::new(FakeTrainer { log: log.clone(), fault: faults.training }))
}

pub fn pipeline_with_trainer(
    log: &EventLog,
    work_dir: &Path,
    faults: Faults,
    trainer: Arc<dyn Trainer>,
) -> JobPipeline {
    JobPipeline::new(
        Arc::new(RecordingReporter { log: log.clone() }),
        Arc::new(FakeModelSource { log: log.clone(), fail: faults.fetch }),
        Arc::new(FakeDatasetLoader { log: log.clone(), fail: faults.dataset }),
        trainer,
        Arc::new(FakePublisher { log: log.clone(), fail: faults.publish }),
        settings(work_dir),
    )
}

/// The worked example job: 5 epochs of an `IMAGES` dataset at `s3://x`.
pub fn job_payload(train_id: i64) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "train_id": train_id,
        "project_no": 3,
        "user_id": "u1",
        "config": {
            "epochs": 5,
            "batch_size": 16,
            "early_stop": {"usage": false},
            "learning_rate_reduction": {"usage": false}
        },
        "data_set": {"kind": "IMAGES", "train_uri": "s3://x"}
    }))
    .unwrap()
}

pub fn job(train_id: i64) -> JobRequest {
    JobRequest::decode(&job_payload(train_id)).unwrap()
}

/// True when nothing is left under `work_dir`.
pub fn work_dir_is_empty(work_dir: &Path) -> bool {
    std::fs::read_dir(work_dir).map(|mut entries| entries.next().is_none()).unwrap_or(true)
}

/// Replays a fixed list of deliveries, logging each hand-off and ack.
pub struct ScriptedSource {
    log: EventLog,
    queue: VecDeque<Result<InboundMessage, BrokerError>>,
    on_first_delivery: Option<oneshot::Sender<()>>,
}

impl ScriptedSource {
    pub fn new(log: &EventLog, payloads: Vec<Vec<u8>>) -> Self {
        let queue = payloads
            .into_iter()
            .zip(1u64..)
            .map(|(payload, delivery_tag)| Ok(InboundMessage { delivery_tag, payload }))
            .collect();
        Self { log: log.clone(), queue, on_first_delivery: None }
    }

    pub fn remaining(&self) -> usize {
        self.queue.len()
    }

    /// The returned receiver fires as the first message is handed out.
    pub fn signal_on_first_delivery(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.on_first_delivery = Some(tx);
        rx
    }

    pub fn then_error(mut self, reason: &str) -> Self {
        self.queue.push_back(Err(BrokerError::Other(reason.to_string())));
        self
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    async fn next_message(&mut self) -> Option<Result<InboundMessage, BrokerError>> {
        let next = self.queue.pop_front()?;
        if let Ok(message) = &next {
            push(&self.log, Event::Delivered(message.delivery_tag));
            if let Some(tx) = self.on_first_delivery.take() {
                let _ = tx.send(());
            }
        }
        Some(next)
    }

    async fn ack(&mut self, message: &InboundMessage) -> Result<(), BrokerError> {
        push(&self.log, Event::Ack(message.delivery_tag));
        Ok(())
    }
}
