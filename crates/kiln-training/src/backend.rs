//! Numerical fit backends.
//!
//! The fit loop in [`crate::trainer`] owns epochs, callbacks and progress;
//! a backend only knows how to run one pass over samples and score them.

use crate::artifacts::ModelHandle;
use crate::dataset::Sample;
use crate::error::{TrainingError, TrainingResult};

pub trait FitBackend: Send + Sync {
    fn id(&self) -> &'static str;

    /// Run one epoch of mini-batch updates. Returns the mean training loss.
    fn train_epoch(&self, model: &mut ModelHandle, samples: &[Sample], batch_size: usize) -> TrainingResult<f64>;

    /// Mean loss over `samples` without updating the model.
    fn evaluate(&self, model: &ModelHandle, samples: &[Sample]) -> TrainingResult<f64>;
}

/// Linear regression with mean squared error.
///
/// Parameters are `input_dim` weights followed by a bias. An untrained
/// bundle (no parameters) starts from zeros.
#[derive(Debug, Default)]
pub struct LinearBackend;

impl LinearBackend {
    fn check_shapes(model: &ModelHandle, samples: &[Sample]) -> TrainingResult<()> {
        let dim = model.input_dim();
        let expected = dim + 1;
        if !model.parameters().is_empty() && model.parameters().len() != expected {
            return Err(TrainingError::FailedPrecondition(format!(
                "model has {} parameters, linear backend expects {expected}",
                model.parameters().len()
            )));
        }
        if let Some((idx, sample)) = samples.iter().enumerate().find(|(_, s)| s.features.len() != dim) {
            return Err(TrainingError::InvalidArgument(format!(
                "sample {idx} has {} features, model input dimension is {dim}",
                sample.features.len()
            )));
        }
        Ok(())
    }

    fn predict(parameters: &[f64], features: &[f64]) -> f64 {
        let (weights, bias) = parameters.split_at(features.len());
        weights.iter().zip(features).map(|(w, x)| w * x).sum::<f64>() + bias.first().copied().unwrap_or(0.0)
    }
}

impl FitBackend for LinearBackend {
    fn id(&self) -> &'static str {
        "linear"
    }

    fn train_epoch(&self, model: &mut ModelHandle, samples: &[Sample], batch_size: usize) -> TrainingResult<f64> {
        Self::check_shapes(model, samples)?;
        if batch_size == 0 {
            return Err(TrainingError::InvalidArgument("batch size must be >= 1".to_string()));
        }
        let dim = model.input_dim();
        let (parameters, optimizer) = model.parts_mut();
        if parameters.is_empty() {
            parameters.resize(dim + 1, 0.0);
        }

        let mut total = 0.0;
        let mut grads = vec![0.0; dim + 1];
        for batch in samples.chunks(batch_size) {
            grads.iter_mut().for_each(|g| *g = 0.0);
            let n = batch.len() as f64;
            for sample in batch {
                let err = Self::predict(parameters, &sample.features) - sample.label;
                total += err * err;
                for (g, x) in grads.iter_mut().zip(&sample.features) {
                    *g += 2.0 * err * x / n;
                }
                grads[dim] += 2.0 * err / n;
            }
            optimizer.step(parameters, &grads)?;
        }

        let loss = total / samples.len().max(1) as f64;
        if !loss.is_finite() {
            return Err(TrainingError::Aborted(format!("loss diverged to {loss}")));
        }
        Ok(loss)
    }

    fn evaluate(&self, model: &ModelHandle, samples: &[Sample]) -> TrainingResult<f64> {
        Self::check_shapes(model, samples)?;
        if samples.is_empty() {
            return Err(TrainingError::FailedPrecondition("no samples to evaluate".to_string()));
        }
        let zeros;
        let parameters = if model.parameters().is_empty() {
            zeros = vec![0.0; model.input_dim() + 1];
            &zeros[..]
        } else {
            model.parameters()
        };
        let total: f64 = samples
            .iter()
            .map(|s| {
                let err = Self::predict(parameters, &s.features) - s.label;
                err * err
            })
            .sum();
        Ok(total / samples.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{ModelManifest, OptimizerSpec};
    use crate::optimizer::OptimizerParams;

    fn model(class_name: &str, lr: f64) -> ModelHandle {
        let manifest = ModelManifest {
            name: "lin".to_string(),
            input_dim: 1,
            optimizer: OptimizerSpec {
                class_name: class_name.to_string(),
                config: OptimizerParams { learning_rate: lr, ..OptimizerParams::default() },
            },
        };
        ModelHandle::from_manifest(manifest, Vec::new()).unwrap()
    }

    fn line() -> Vec<Sample> {
        (0..20).map(|i| {
            let x = f64::from(i) / 10.0;
            Sample { features: vec![x], label: 2.0 * x + 1.0 }
        }).collect()
    }

    #[test]
    fn test_sgd_fits_a_line() {
        let backend = LinearBackend;
        let mut model = model("SGD", 0.1);
        let samples = line();
        let first = backend.train_epoch(&mut model, &samples, 4).unwrap();
        let mut last = first;
        for _ in 0..200 {
            last = backend.train_epoch(&mut model, &samples, 4).unwrap();
        }
        assert!(last < first / 100.0, "loss went from {first} to {last}");
        assert!((model.parameters()[0] - 2.0).abs() < 0.1);
        assert!(backend.evaluate(&model, &samples).unwrap() < 0.01);
    }

    #[test]
    fn test_feature_width_mismatch_is_invalid_argument() {
        let backend = LinearBackend;
        let mut model = model("Adam", 0.01);
        let samples = vec![Sample { features: vec![1.0, 2.0], label: 0.0 }];
        let err = backend.train_epoch(&mut model, &samples, 1).unwrap_err();
        assert!(matches!(err, TrainingError::InvalidArgument(_)));
    }

    #[test]
    fn test_divergence_aborts() {
        let backend = LinearBackend;
        let mut model = model("SGD", 1e6);
        let samples = line();
        let result = (0..50).try_for_each(|_| backend.train_epoch(&mut model, &samples, 20).map(|_| ()));
        assert!(matches!(result, Err(TrainingError::Aborted(_))));
    }
}
