//! Static lookup table from serialized optimizer class names to constructors.
//!
//! Bundles exported by the conversion service name their optimizer the way
//! the exporting framework does (`"Addons>AdamW"` for the add-on AdamW).
//! Every name a bundle may carry must be listed here; anything else fails
//! the load with [`ArtifactError::UnknownOptimizer`].

use crate::error::ArtifactError;
use crate::optimizer::{Optimizer, OptimizerKind, OptimizerParams};

pub type OptimizerConstructor = fn(&str, OptimizerParams) -> Optimizer;

fn sgd(name: &str, params: OptimizerParams) -> Optimizer {
    Optimizer::new(name, OptimizerKind::Sgd, params)
}

fn adam(name: &str, params: OptimizerParams) -> Optimizer {
    Optimizer::new(name, OptimizerKind::Adam, params)
}

fn adamw(name: &str, params: OptimizerParams) -> Optimizer {
    Optimizer::new(name, OptimizerKind::AdamW, params)
}

pub const OPTIMIZERS: &[(&str, OptimizerConstructor)] = &[
    ("SGD", sgd),
    ("Adam", adam),
    ("AdamW", adamw),
    ("Addons>AdamW", adamw),
];

pub fn resolve_optimizer(class_name: &str, params: OptimizerParams) -> Result<Optimizer, ArtifactError> {
    OPTIMIZERS
        .iter()
        .find(|(name, _)| *name == class_name)
        .map(|(name, ctor)| ctor(name, params))
        .ok_or_else(|| ArtifactError::UnknownOptimizer(class_name.to_string()))
}
