//! Model bundle retrieval from the conversion service.

use async_trait::async_trait;
use kiln_training::{archive, ArtifactError, Identifier, JobLayout, ModelHandle};
use tracing::{debug, info};

/// Produces the model a job trains.
#[async_trait]
pub trait ModelSource: Send + Sync {
    /// Fetch and load the bundle for `user_id` into the job's scratch space.
    async fn fetch(&self, user_id: &Identifier, layout: &JobLayout) -> Result<ModelHandle, ArtifactError>;
}

/// Downloads `GET <convert>/api/model` (header `id: <user_id>`), a zip whose
/// bundle lives under `<user_id>/Model/`.
#[derive(Debug, Clone)]
pub struct HttpArtifactFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpArtifactFetcher {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into().trim_end_matches('/').to_string() }
    }

    async fn download(&self, user_id: &Identifier) -> Result<Vec<u8>, ArtifactError> {
        let url = format!("{}/api/model", self.base_url);
        debug!(url = %url, user_id = %user_id, "downloading model bundle");

        let response = self
            .client
            .get(&url)
            .header("id", user_id.to_string())
            .send()
            .await
            .map_err(|e| ArtifactError::Download(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ArtifactError::Download(format!("{url} returned {status}")));
        }

        let body = response.bytes().await.map_err(|e| ArtifactError::Download(format!("{url}: {e}")))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl ModelSource for HttpArtifactFetcher {
    async fn fetch(&self, user_id: &Identifier, layout: &JobLayout) -> Result<ModelHandle, ArtifactError> {
        let model_dir = layout
            .model_dir(user_id)
            .ok_or_else(|| ArtifactError::Invalid(format!("user id `{user_id}` is not a usable bundle path")))?;
        let bytes = self.download(user_id).await?;

        tokio::fs::create_dir_all(layout.root()).await?;
        let archive_path = layout.model_archive();
        tokio::fs::write(&archive_path, &bytes).await?;

        archive::unpack(&archive_path, &layout.model_extract_dir())?;
        let model = ModelHandle::load(&model_dir)?;

        info!(
            user_id = %user_id,
            model = model.name(),
            optimizer = model.optimizer().class_name(),
            bytes = bytes.len(),
            "model loaded"
        );
        Ok(model)
    }
}
