//! Error types for Kiln Core.

use kiln_training::{ArchiveError, ArtifactError};
use thiserror::Error;

/// Broker connection and delivery errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// AMQP protocol or connection failure.
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    /// The broker refused or lost an acknowledgement.
    #[error("failed to ack delivery {tag}: {reason}")]
    Ack { tag: u64, reason: String },

    /// Other broker errors.
    #[error("broker error: {0}")]
    Other(String),
}

/// Failures while saving, archiving or uploading a trained model.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Saving the model bundle failed.
    #[error("failed to save model: {0}")]
    Save(#[from] ArtifactError),

    /// Creating the upload archive failed.
    #[error("failed to archive model: {0}")]
    Archive(#[from] ArchiveError),

    /// The upload request could not be sent.
    #[error("upload failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The API rejected the upload.
    #[error("upload rejected with status {0}")]
    Rejected(reqwest::StatusCode),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_error_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: PublishError = io_err.into();
        assert!(matches!(err, PublishError::Io(_)));
        assert!(err.to_string().contains("denied"));
    }
}
