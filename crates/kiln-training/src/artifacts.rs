use crate::error::ArtifactError;
use crate::optimizer::{Optimizer, OptimizerParams};
use crate::registry::resolve_optimizer;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "model.json";
pub const PARAMETERS_FILE: &str = "parameters.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSpec {
    pub class_name: String,
    #[serde(default)]
    pub config: OptimizerParams,
}

/// Bundle metadata (`model.json`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelManifest {
    pub name: String,
    pub input_dim: usize,
    pub optimizer: OptimizerSpec,
}

#[derive(Debug, Serialize, Deserialize)]
struct ParameterFile {
    parameters: Vec<f64>,
}

/// A loaded model, owned by exactly one stage at a time.
///
/// Deliberately not `Clone`: the fetcher hands it to the trainer by value,
/// and the trainer hands the fitted model to the publisher the same way.
#[derive(Debug)]
pub struct ModelHandle {
    name: String,
    input_dim: usize,
    optimizer: Optimizer,
    parameters: Vec<f64>,
}

impl ModelHandle {
    pub fn from_manifest(manifest: ModelManifest, parameters: Vec<f64>) -> Result<Self, ArtifactError> {
        if manifest.input_dim == 0 {
            return Err(ArtifactError::Invalid("input_dim must be >= 1".to_string()));
        }
        let optimizer = resolve_optimizer(&manifest.optimizer.class_name, manifest.optimizer.config)?;
        Ok(Self { name: manifest.name, input_dim: manifest.input_dim, optimizer, parameters })
    }

    /// Load an unpacked bundle directory. `parameters.json` is optional; a
    /// bundle without it is an untrained model.
    pub fn load(dir: &Path) -> Result<Self, ArtifactError> {
        let manifest_path = dir.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            return Err(ArtifactError::MissingBundle(manifest_path));
        }
        let manifest: ModelManifest = serde_json::from_slice(&std::fs::read(&manifest_path)?)?;

        let parameters_path = dir.join(PARAMETERS_FILE);
        let parameters = if parameters_path.is_file() {
            serde_json::from_slice::<ParameterFile>(&std::fs::read(&parameters_path)?)?.parameters
        } else {
            Vec::new()
        };

        Self::from_manifest(manifest, parameters)
    }

    /// Write the bundle into `dir`, creating it. Returns the written files.
    pub fn save(&self, dir: &Path) -> Result<Vec<PathBuf>, ArtifactError> {
        std::fs::create_dir_all(dir)?;

        let manifest_path = dir.join(MANIFEST_FILE);
        std::fs::write(&manifest_path, serde_json::to_vec_pretty(&self.manifest())?)?;

        let parameters_path = dir.join(PARAMETERS_FILE);
        let file = ParameterFile { parameters: self.parameters.clone() };
        std::fs::write(&parameters_path, serde_json::to_vec(&file)?)?;

        Ok(vec![manifest_path, parameters_path])
    }

    #[must_use]
    pub fn manifest(&self) -> ModelManifest {
        ModelManifest {
            name: self.name.clone(),
            input_dim: self.input_dim,
            optimizer: OptimizerSpec {
                class_name: self.optimizer.class_name().to_string(),
                config: self.optimizer.params().clone(),
            },
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    #[must_use]
    pub fn optimizer(&self) -> &Optimizer {
        &self.optimizer
    }

    pub fn optimizer_mut(&mut self) -> &mut Optimizer {
        &mut self.optimizer
    }

    #[must_use]
    pub fn parameters(&self) -> &[f64] {
        &self.parameters
    }

    /// Split borrow for an optimizer update.
    pub fn parts_mut(&mut self) -> (&mut Vec<f64>, &mut Optimizer) {
        (&mut self.parameters, &mut self.optimizer)
    }
}
