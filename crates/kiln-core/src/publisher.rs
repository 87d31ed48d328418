//! Persisting and uploading trained models.

use crate::error::PublishError;
use async_trait::async_trait;
use chrono::Local;
use kiln_training::layout::remove_all;
use kiln_training::{archive, Identifier, JobLayout, JobRequest, ModelHandle};
use reqwest::multipart::{Form, Part};
use std::path::Path;
use tracing::{debug, info, warn};

/// Timestamp used for export directory and archive names.
pub const EXPORT_STAMP_FORMAT: &str = "%Y%m%d-%H-%M-%S";

/// Final stage of a job: takes ownership of the trained model.
#[async_trait]
pub trait ModelPublisher: Send + Sync {
    async fn publish(&self, model: ModelHandle, job: &JobRequest, layout: &JobLayout) -> Result<(), PublishError>;
}

/// Saves the bundle under `export/<user_id>/<stamp>/`, zips it and POSTs the
/// archive to `<api>/api/train/<train_id>/model` as multipart field `model`.
///
/// The export directory and archive are removed whether or not the upload
/// succeeded.
#[derive(Debug, Clone)]
pub struct HttpModelPublisher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpModelPublisher {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self { client, base_url: base_url.into().trim_end_matches('/').to_string() }
    }

    async fn save_and_upload(
        &self,
        model: &ModelHandle,
        train_id: &Identifier,
        export_dir: &Path,
        archive_path: &Path,
    ) -> Result<(), PublishError> {
        model.save(export_dir)?;
        let files = archive::pack_dir(export_dir, archive_path)?;
        debug!(archive = %archive_path.display(), files, "model archived");
        self.upload(train_id, archive_path).await
    }

    async fn upload(&self, train_id: &Identifier, archive_path: &Path) -> Result<(), PublishError> {
        let bytes = tokio::fs::read(archive_path).await?;
        let size = bytes.len();
        let file_name = archive_path.file_name().and_then(|n| n.to_str()).unwrap_or("model.zip").to_string();
        let part = Part::bytes(bytes).file_name(file_name).mime_str("application/zip")?;
        let form = Form::new().part("model", part);

        let url = format!("{}/api/train/{}/model", self.base_url, urlencoding::encode(&train_id.to_string()));
        let response = self.client.post(&url).multipart(form).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(PublishError::Rejected(status));
        }
        info!(train_id = %train_id, bytes = size, "model uploaded");
        Ok(())
    }
}

#[async_trait]
impl ModelPublisher for HttpModelPublisher {
    async fn publish(&self, model: ModelHandle, job: &JobRequest, layout: &JobLayout) -> Result<(), PublishError> {
        let stamp = Local::now().format(EXPORT_STAMP_FORMAT).to_string();
        let export_dir = layout.export_dir(&job.user_id, &stamp);
        let archive_path = layout.export_archive(&job.user_id, &stamp);

        let result = self.save_and_upload(&model, &job.train_id, &export_dir, &archive_path).await;
        drop(model);

        for (path, e) in remove_all(&[layout.export_root(), archive_path]) {
            warn!(path = %path.display(), error = %e, "failed to remove export artifact");
        }
        result
    }
}
