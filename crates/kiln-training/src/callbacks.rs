//! End-of-epoch policies: early stopping and learning-rate reduction on plateau.

use crate::config::{EarlyStopPolicy, LrReductionPolicy, Metric};
use crate::progress::EpochMetrics;
use tracing::warn;

fn monitored(metric: Metric, metrics: &EpochMetrics) -> Option<f64> {
    let value = match metric {
        Metric::Loss => Some(metrics.loss),
        Metric::ValLoss => metrics.val_loss,
    };
    if value.is_none() {
        warn!(monitor = metric.as_str(), epoch = metrics.epoch, "monitored metric unavailable, skipping");
    }
    value
}

#[derive(Debug, Clone)]
pub struct EarlyStopping {
    policy: EarlyStopPolicy,
    best: f64,
    wait: u32,
}

impl EarlyStopping {
    #[must_use]
    pub fn new(policy: EarlyStopPolicy) -> Self {
        Self { policy, best: f64::INFINITY, wait: 0 }
    }

    /// Returns `true` once the monitored metric has gone `patience` epochs
    /// without improving.
    pub fn on_epoch_end(&mut self, metrics: &EpochMetrics) -> bool {
        let Some(current) = monitored(self.policy.monitor, metrics) else {
            return false;
        };
        if current < self.best {
            self.best = current;
            self.wait = 0;
            return false;
        }
        self.wait += 1;
        self.wait >= self.policy.patience
    }
}

#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    policy: LrReductionPolicy,
    best: f64,
    wait: u32,
}

impl ReduceLrOnPlateau {
    #[must_use]
    pub fn new(policy: LrReductionPolicy) -> Self {
        Self { policy, best: f64::INFINITY, wait: 0 }
    }

    /// Returns the new learning rate when a reduction is due.
    pub fn on_epoch_end(&mut self, metrics: &EpochMetrics, current_lr: f64) -> Option<f64> {
        let current = monitored(self.policy.monitor, metrics)?;
        if current < self.best {
            self.best = current;
            self.wait = 0;
            return None;
        }
        self.wait += 1;
        if self.wait < self.policy.patience {
            return None;
        }
        self.wait = 0;
        if current_lr > self.policy.min_lr {
            Some((current_lr * self.policy.factor).max(self.policy.min_lr))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(epoch: u32, loss: f64, val_loss: Option<f64>) -> EpochMetrics {
        EpochMetrics { epoch, loss, val_loss, lr: 0.1 }
    }

    #[test]
    fn test_early_stop_after_patience() {
        let mut stop = EarlyStopping::new(EarlyStopPolicy { monitor: Metric::Loss, patience: 2 });
        assert!(!stop.on_epoch_end(&metrics(0, 1.0, None)));
        assert!(!stop.on_epoch_end(&metrics(1, 0.5, None)));
        assert!(!stop.on_epoch_end(&metrics(2, 0.6, None)));
        assert!(stop.on_epoch_end(&metrics(3, 0.7, None)));
    }

    #[test]
    fn test_early_stop_improvement_resets_wait() {
        let mut stop = EarlyStopping::new(EarlyStopPolicy { monitor: Metric::Loss, patience: 2 });
        for (epoch, loss) in [1.0, 1.1, 0.9, 1.0].into_iter().enumerate() {
            assert!(!stop.on_epoch_end(&metrics(epoch as u32, loss, None)));
        }
    }

    #[test]
    fn test_early_stop_ignores_missing_metric() {
        let mut stop = EarlyStopping::new(EarlyStopPolicy { monitor: Metric::ValLoss, patience: 0 });
        assert!(!stop.on_epoch_end(&metrics(0, 1.0, None)));
        assert!(!stop.on_epoch_end(&metrics(1, 2.0, None)));
    }

    #[test]
    fn test_lr_reduction_floors_at_min_lr() {
        let policy = LrReductionPolicy { monitor: Metric::ValLoss, patience: 1, factor: 0.5, min_lr: 0.03 };
        let mut reducer = ReduceLrOnPlateau::new(policy);
        assert_eq!(reducer.on_epoch_end(&metrics(0, 1.0, Some(1.0)), 0.1), None);
        assert_eq!(reducer.on_epoch_end(&metrics(1, 1.0, Some(1.0)), 0.1), Some(0.05));
        assert_eq!(reducer.on_epoch_end(&metrics(2, 1.0, Some(1.0)), 0.05), Some(0.03));
        assert_eq!(reducer.on_epoch_end(&metrics(3, 1.0, Some(1.0)), 0.03), None);
    }
}
