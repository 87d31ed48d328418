use crate::artifacts::ModelHandle;
use crate::backend::FitBackend;
use crate::callbacks::{EarlyStopping, ReduceLrOnPlateau};
use crate::config::TrainConfig;
use crate::dataset::{DataSplits, DatasetKind, Sample};
use crate::error::{TrainingError, TrainingResult};
use crate::job::Identifier;
use crate::progress::{EpochMetrics, ProgressEvent, ProgressSink};
use async_trait::async_trait;
use tracing::{debug, info};

#[async_trait]
pub trait Trainer: Send + Sync {
    fn id(&self) -> &'static str;

    /// Fit `model` on `splits`, consuming it and returning the trained model.
    async fn fit(
        &self,
        train_id: &Identifier,
        model: ModelHandle,
        splits: DataSplits,
        kind: &DatasetKind,
        config: &TrainConfig,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<ModelHandle>;
}

/// Epoch loop over a [`FitBackend`], with early stopping, plateau LR
/// reduction and per-epoch progress events.
#[derive(Debug)]
pub struct EpochTrainer<B> {
    backend: B,
}

impl<B: FitBackend> EpochTrainer<B> {
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self { backend }
    }
}

/// Convert splits into `(fit, validation)` sample sets for `kind`.
///
/// Tabular data holds the trailing `validation_split` fraction of the
/// training rows out of fitting and scores it with the supplied validation rows.
pub fn prepare_splits(
    splits: DataSplits,
    kind: &DatasetKind,
    validation_split: f64,
) -> TrainingResult<(Vec<Sample>, Vec<Sample>)> {
    match (kind, splits) {
        (DatasetKind::Images, DataSplits::Paired { train, validation }) => Ok((train, validation)),
        (DatasetKind::Tabular(_), DataSplits::Columns { data, labels }) => {
            let mut train = zip_samples(data.0, labels.0, "training")?;
            let mut validation = zip_samples(data.1, labels.1, "validation")?;

            let held_out = ((train.len() as f64) * validation_split).floor() as usize;
            let keep = train.len().saturating_sub(held_out);
            let mut tail = train.split_off(keep);
            tail.append(&mut validation);
            Ok((train, tail))
        }
        (kind, splits) => Err(TrainingError::FailedPrecondition(format!(
            "`{kind}` dataset cannot be fitted from {} splits",
            match splits {
                DataSplits::Paired { .. } => "paired",
                DataSplits::Columns { .. } => "column",
            }
        ))),
    }
}

fn zip_samples(data: Vec<Vec<f64>>, labels: Vec<f64>, split: &str) -> TrainingResult<Vec<Sample>> {
    if data.len() != labels.len() {
        return Err(TrainingError::InvalidArgument(format!(
            "{split} split has {} rows but {} labels",
            data.len(),
            labels.len()
        )));
    }
    Ok(data.into_iter().zip(labels).map(|(features, label)| Sample { features, label }).collect())
}

#[async_trait]
impl<B: FitBackend> Trainer for EpochTrainer<B> {
    fn id(&self) -> &'static str {
        self.backend.id()
    }

    async fn fit(
        &self,
        train_id: &Identifier,
        mut model: ModelHandle,
        splits: DataSplits,
        kind: &DatasetKind,
        config: &TrainConfig,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<ModelHandle> {
        let (train, validation) = prepare_splits(splits, kind, config.validation_split)?;
        if train.is_empty() {
            return Err(TrainingError::FailedPrecondition("no training samples left to fit".to_string()));
        }
        info!(
            train_id = %train_id,
            backend = self.backend.id(),
            train = train.len(),
            validation = validation.len(),
            epochs = config.epochs,
            "start training"
        );

        let mut early_stop = config.early_stop.map(EarlyStopping::new);
        let mut lr_reduction = config.lr_reduction.map(ReduceLrOnPlateau::new);
        let batch_size = config.batch_size as usize;

        progress.on_event(ProgressEvent::Started { train_id: train_id.clone(), epochs: config.epochs }).await;

        for epoch in 0..config.epochs {
            let loss = self.backend.train_epoch(&mut model, &train, batch_size)?;
            let val_loss =
                if validation.is_empty() { None } else { Some(self.backend.evaluate(&model, &validation)?) };
            let metrics = EpochMetrics { epoch, loss, val_loss, lr: model.optimizer().learning_rate() };
            debug!(train_id = %train_id, epoch, loss, val_loss = ?val_loss, "epoch done");

            progress.on_event(ProgressEvent::Epoch { train_id: train_id.clone(), metrics: metrics.clone() }).await;

            if let Some(reducer) = lr_reduction.as_mut() {
                if let Some(lr) = reducer.on_epoch_end(&metrics, metrics.lr) {
                    model.optimizer_mut().set_learning_rate(lr);
                    progress.on_event(ProgressEvent::LearningRateReduced { train_id: train_id.clone(), epoch, lr }).await;
                }
            }

            if let Some(stopper) = early_stop.as_mut() {
                if stopper.on_epoch_end(&metrics) {
                    progress.on_event(ProgressEvent::EarlyStopped { train_id: train_id.clone(), epoch }).await;
                    break;
                }
            }
        }

        progress.on_event(ProgressEvent::Finished { train_id: train_id.clone() }).await;
        info!(train_id = %train_id, "train finished");
        Ok(model)
    }
}
