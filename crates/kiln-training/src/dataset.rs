use crate::artifacts::ModelHandle;
use crate::error::DatasetError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const IMAGES_KIND: &str = "IMAGES";

/// Dataset kind tag. `IMAGES` datasets arrive pre-split; everything else is
/// tabular data whose validation split is carved out of the training rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DatasetKind {
    Images,
    Tabular(String),
}

impl DatasetKind {
    #[must_use]
    pub fn is_images(&self) -> bool {
        matches!(self, Self::Images)
    }
}

impl From<String> for DatasetKind {
    fn from(value: String) -> Self {
        if value == IMAGES_KIND { Self::Images } else { Self::Tabular(value) }
    }
}

impl From<DatasetKind> for String {
    fn from(value: DatasetKind) -> Self {
        match value {
            DatasetKind::Images => IMAGES_KIND.to_string(),
            DatasetKind::Tabular(name) => name,
        }
    }
}

impl std::fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Images => f.write_str(IMAGES_KIND),
            Self::Tabular(name) => f.write_str(name),
        }
    }
}

/// Where a job's data comes from. Unrecognised source fields are kept in
/// `extra` so loaders can read them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetDescriptor {
    pub kind: DatasetKind,
    #[serde(default)]
    pub train_uri: Option<String>,
    #[serde(default)]
    pub validation_uri: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl DatasetDescriptor {
    /// Human-readable source, used in failure replies.
    #[must_use]
    pub fn source_label(&self) -> &str {
        self.train_uri.as_deref().unwrap_or("unknown source")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub features: Vec<f64>,
    pub label: f64,
}

/// Training and validation data handed to the trainer.
#[derive(Debug, Clone, PartialEq)]
pub enum DataSplits {
    /// Pre-split `(train, validation)` streams whose samples carry their labels.
    Paired { train: Vec<Sample>, validation: Vec<Sample> },
    /// `(train, validation)` feature rows with separate label columns.
    Columns { data: (Vec<Vec<f64>>, Vec<Vec<f64>>), labels: (Vec<f64>, Vec<f64>) },
}

/// Produces splits for a job. `scratch` is job-scoped storage the loader may
/// fill with downloaded files; the pipeline removes it after training.
#[async_trait]
pub trait DatasetLoader: Send + Sync {
    async fn load(
        &self,
        descriptor: &DatasetDescriptor,
        model: &ModelHandle,
        scratch: &Path,
    ) -> Result<DataSplits, DatasetError>;
}
