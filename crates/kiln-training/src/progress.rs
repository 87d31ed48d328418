use crate::job::Identifier;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Metrics recorded at the end of one epoch. `epoch` is zero-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: u32,
    pub loss: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub val_loss: Option<f64>,
    pub lr: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { train_id: Identifier, epochs: u32 },
    Epoch { train_id: Identifier, metrics: EpochMetrics },
    LearningRateReduced { train_id: Identifier, epoch: u32, lr: f64 },
    EarlyStopped { train_id: Identifier, epoch: u32 },
    Finished { train_id: Identifier },
}

/// Receives progress from the fit loop.
///
/// Implementations must not fail: a sink that cannot deliver an event drops it.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn on_event(&self, event: ProgressEvent);
}
