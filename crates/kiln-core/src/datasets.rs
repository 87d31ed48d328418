//! CSV dataset loading from local paths or HTTP.

use async_trait::async_trait;
use kiln_training::{
    build_splits, parse_csv_samples, DataSplits, DatasetDescriptor, DatasetError, DatasetLoader, ModelHandle,
};
use std::path::Path;
use tracing::debug;

/// Reads `train_uri` (and `validation_uri` when present) as CSV.
///
/// Supported sources: `http://`/`https://` (downloaded into the job's scratch
/// directory), `file://` and plain filesystem paths. Any other scheme is
/// rejected as unsupported.
#[derive(Debug, Clone)]
pub struct HttpDatasetLoader {
    client: reqwest::Client,
}

impl HttpDatasetLoader {
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn read_source(&self, uri: &str, scratch: &Path, file_name: &str) -> Result<Vec<u8>, DatasetError> {
        let download_error = |reason: String| DatasetError::Download { uri: uri.to_string(), reason };

        if uri.starts_with("http://") || uri.starts_with("https://") {
            let response = self.client.get(uri).send().await.map_err(|e| download_error(e.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(download_error(format!("status {status}")));
            }
            let bytes = response.bytes().await.map_err(|e| download_error(e.to_string()))?.to_vec();

            tokio::fs::create_dir_all(scratch).await?;
            tokio::fs::write(scratch.join(file_name), &bytes).await?;
            debug!(uri = %uri, bytes = bytes.len(), "dataset downloaded");
            return Ok(bytes);
        }

        let path = match uri.strip_prefix("file://") {
            Some(path) => path,
            None if uri.contains("://") => return Err(DatasetError::UnsupportedSource(uri.to_string())),
            None => uri,
        };
        tokio::fs::read(path).await.map_err(|e| download_error(e.to_string()))
    }
}

#[async_trait]
impl DatasetLoader for HttpDatasetLoader {
    async fn load(
        &self,
        descriptor: &DatasetDescriptor,
        model: &ModelHandle,
        scratch: &Path,
    ) -> Result<DataSplits, DatasetError> {
        let train_uri = descriptor.train_uri.as_deref().ok_or(DatasetError::MissingSource)?;
        let bytes = self.read_source(train_uri, scratch, "train.csv").await?;
        let train = parse_csv_samples(&bytes, model.input_dim())?;

        let validation = match descriptor.validation_uri.as_deref() {
            Some(uri) => {
                let bytes = self.read_source(uri, scratch, "validation.csv").await?;
                Some(parse_csv_samples(&bytes, model.input_dim())?)
            }
            None => None,
        };

        debug!(
            kind = %descriptor.kind,
            train = train.len(),
            validation = validation.as_ref().map_or(0, Vec::len),
            "dataset parsed"
        );
        build_splits(&descriptor.kind, train, validation)
    }
}
