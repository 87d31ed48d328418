use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};

/// Hyperparameters stored alongside the optimizer class name in a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerParams {
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_beta_1")]
    pub beta_1: f64,
    #[serde(default = "default_beta_2")]
    pub beta_2: f64,
    #[serde(default = "default_epsilon")]
    pub epsilon: f64,
    #[serde(default)]
    pub weight_decay: f64,
}

fn default_learning_rate() -> f64 {
    0.001
}

fn default_beta_1() -> f64 {
    0.9
}

fn default_beta_2() -> f64 {
    0.999
}

fn default_epsilon() -> f64 {
    1e-7
}

impl Default for OptimizerParams {
    fn default() -> Self {
        Self {
            learning_rate: default_learning_rate(),
            beta_1: default_beta_1(),
            beta_2: default_beta_2(),
            epsilon: default_epsilon(),
            weight_decay: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    Sgd,
    Adam,
    AdamW,
}

/// A resolved optimizer with its moment buffers.
#[derive(Debug, Clone)]
pub struct Optimizer {
    class_name: String,
    kind: OptimizerKind,
    params: OptimizerParams,
    m: Vec<f64>,
    v: Vec<f64>,
    t: u64,
}

impl Optimizer {
    #[must_use]
    pub fn new(class_name: impl Into<String>, kind: OptimizerKind, params: OptimizerParams) -> Self {
        Self { class_name: class_name.into(), kind, params, m: Vec::new(), v: Vec::new(), t: 0 }
    }

    /// The registry name this optimizer was resolved from.
    #[must_use]
    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    #[must_use]
    pub fn kind(&self) -> OptimizerKind {
        self.kind
    }

    #[must_use]
    pub fn params(&self) -> &OptimizerParams {
        &self.params
    }

    #[must_use]
    pub fn learning_rate(&self) -> f64 {
        self.params.learning_rate
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        self.params.learning_rate = lr;
    }

    /// Applies one update to `weights` in place.
    pub fn step(&mut self, weights: &mut [f64], grads: &[f64]) -> TrainingResult<()> {
        if weights.len() != grads.len() {
            return Err(TrainingError::InvalidArgument(format!(
                "gradient has {} entries, model has {} parameters",
                grads.len(),
                weights.len()
            )));
        }
        let lr = self.params.learning_rate;

        match self.kind {
            OptimizerKind::Sgd => {
                for (w, g) in weights.iter_mut().zip(grads) {
                    *w -= lr * g;
                }
            }
            OptimizerKind::Adam | OptimizerKind::AdamW => {
                if self.m.len() != weights.len() {
                    self.m = vec![0.0; weights.len()];
                    self.v = vec![0.0; weights.len()];
                    self.t = 0;
                }
                self.t += 1;
                let OptimizerParams { beta_1, beta_2, epsilon, weight_decay, .. } = self.params;
                let exp = i32::try_from(self.t).unwrap_or(i32::MAX);
                let bias_1 = 1.0 - beta_1.powi(exp);
                let bias_2 = 1.0 - beta_2.powi(exp);

                for i in 0..weights.len() {
                    let g = grads[i];
                    self.m[i] = beta_1 * self.m[i] + (1.0 - beta_1) * g;
                    self.v[i] = beta_2 * self.v[i] + (1.0 - beta_2) * g * g;
                    let m_hat = self.m[i] / bias_1;
                    let v_hat = self.v[i] / bias_2;
                    if self.kind == OptimizerKind::AdamW {
                        // decoupled decay
                        weights[i] -= lr * weight_decay * weights[i];
                    }
                    weights[i] -= lr * m_hat / (v_hat.sqrt() + epsilon);
                }
            }
        }
        Ok(())
    }
}
