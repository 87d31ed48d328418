//! Training configuration carried in each job message.
//!
//! The message holds raw JSON; [`TrainConfig::from_value`] turns it into a
//! validated, immutable value that is passed by reference to every stage.

use crate::error::InvalidConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fraction of a tabular training split held out for validation.
pub const DEFAULT_VALIDATION_SPLIT: f64 = 0.3;

/// A metric the fit loop can monitor. Lower is better for all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Loss,
    ValLoss,
}

impl Metric {
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "loss" => Some(Self::Loss),
            "val_loss" => Some(Self::ValLoss),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loss => "loss",
            Self::ValLoss => "val_loss",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EarlyStopPolicy {
    pub monitor: Metric,
    pub patience: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LrReductionPolicy {
    pub monitor: Metric,
    pub patience: u32,
    pub factor: f64,
    pub min_lr: f64,
}

/// Validated training configuration.
///
/// A disabled policy (`usage: false`) is `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainConfig {
    pub epochs: u32,
    pub batch_size: u32,
    pub early_stop: Option<EarlyStopPolicy>,
    pub lr_reduction: Option<LrReductionPolicy>,
    pub validation_split: f64,
}

#[derive(Debug, Deserialize)]
struct EarlyStopSection {
    #[serde(default)]
    usage: bool,
    #[serde(default = "default_monitor")]
    monitor: String,
    #[serde(default)]
    patience: u32,
}

impl Default for EarlyStopSection {
    fn default() -> Self {
        Self { usage: false, monitor: default_monitor(), patience: 0 }
    }
}

#[derive(Debug, Deserialize)]
struct LrReductionSection {
    #[serde(default)]
    usage: bool,
    #[serde(default = "default_monitor")]
    monitor: String,
    #[serde(default = "default_lr_patience")]
    patience: u32,
    #[serde(default = "default_factor")]
    factor: f64,
    #[serde(default)]
    min_lr: f64,
}

impl Default for LrReductionSection {
    fn default() -> Self {
        Self {
            usage: false,
            monitor: default_monitor(),
            patience: default_lr_patience(),
            factor: default_factor(),
            min_lr: 0.0,
        }
    }
}

fn default_monitor() -> String {
    "val_loss".to_string()
}

fn default_lr_patience() -> u32 {
    10
}

fn default_factor() -> f64 {
    0.1
}

impl TrainConfig {
    pub fn from_value(value: &Value, validation_split: f64) -> Result<Self, InvalidConfig> {
        let Some(obj) = value.as_object() else {
            return Err(InvalidConfig::new("training config is required and must be an object"));
        };

        let epochs = positive_int(obj, "epochs")?;
        let batch_size = positive_int(obj, "batch_size")?;

        let early: EarlyStopSection = section(obj, "early_stop")?;
        let early_stop = if early.usage {
            Some(EarlyStopPolicy { monitor: monitor(&early.monitor, "early_stop")?, patience: early.patience })
        } else {
            None
        };

        let lr: LrReductionSection = section(obj, "learning_rate_reduction")?;
        let lr_reduction = if lr.usage {
            if !(lr.factor > 0.0 && lr.factor < 1.0) {
                return Err(InvalidConfig(format!(
                    "`learning_rate_reduction.factor` must be in (0, 1), got {}",
                    lr.factor
                )));
            }
            if !lr.min_lr.is_finite() || lr.min_lr < 0.0 {
                return Err(InvalidConfig(format!(
                    "`learning_rate_reduction.min_lr` must be >= 0, got {}",
                    lr.min_lr
                )));
            }
            Some(LrReductionPolicy {
                monitor: monitor(&lr.monitor, "learning_rate_reduction")?,
                patience: lr.patience,
                factor: lr.factor,
                min_lr: lr.min_lr,
            })
        } else {
            None
        };

        if !(validation_split > 0.0 && validation_split < 1.0) {
            return Err(InvalidConfig(format!("validation split must be in (0, 1), got {validation_split}")));
        }

        Ok(Self { epochs, batch_size, early_stop, lr_reduction, validation_split })
    }
}

fn positive_int(obj: &Map<String, Value>, field: &str) -> Result<u32, InvalidConfig> {
    let value = obj
        .get(field)
        .filter(|v| !v.is_null())
        .ok_or_else(|| InvalidConfig(format!("`{field}` is required")))?;
    value
        .as_u64()
        .filter(|n| *n > 0)
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| InvalidConfig(format!("`{field}` must be a positive integer, got {value}")))
}

fn section<T: DeserializeOwned + Default>(obj: &Map<String, Value>, field: &str) -> Result<T, InvalidConfig> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(T::default()),
        Some(v) => serde_json::from_value(v.clone()).map_err(|e| InvalidConfig(format!("`{field}`: {e}"))),
    }
}

fn monitor(name: &str, field: &str) -> Result<Metric, InvalidConfig> {
    Metric::parse(name)
        .ok_or_else(|| InvalidConfig(format!("`{field}.monitor` must be `loss` or `val_loss`, got `{name}`")))
}
