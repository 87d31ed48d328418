use crate::config::TrainConfig;
use crate::dataset::DatasetDescriptor;
use crate::error::InvalidConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque identifier carried by a job message.
///
/// The upstream API sends numeric ids for some fields and strings for others;
/// the original JSON type is kept so status reports echo it back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Identifier {
    Number(i64),
    Text(String),
}

impl Identifier {
    #[must_use]
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Number(_) => false,
            Self::Text(s) => s.trim().is_empty(),
        }
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => n.fmt(f),
            Self::Text(s) => s.fmt(f),
        }
    }
}

impl From<i64> for Identifier {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<&str> for Identifier {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("job message is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("job message field `{0}` must not be empty")]
    EmptyField(&'static str),
}

/// A training job as delivered by the broker.
///
/// `config` is kept as raw JSON: it is validated when the model is built so
/// that a bad configuration still produces a reply to the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    pub train_id: Identifier,
    pub project_no: Identifier,
    pub user_id: Identifier,
    #[serde(default)]
    pub config: serde_json::Value,
    pub data_set: DatasetDescriptor,
}

impl JobRequest {
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let job: Self = serde_json::from_slice(payload)?;
        for (field, id) in [
            ("train_id", &job.train_id),
            ("project_no", &job.project_no),
            ("user_id", &job.user_id),
        ] {
            if id.is_blank() {
                return Err(DecodeError::EmptyField(field));
            }
        }
        Ok(job)
    }

    /// Where status reports for this job are addressed.
    #[must_use]
    pub fn route(&self) -> JobRoute {
        JobRoute { project_no: self.project_no.clone(), train_id: self.train_id.clone() }
    }

    pub fn train_config(&self, validation_split: f64) -> Result<TrainConfig, InvalidConfig> {
        TrainConfig::from_value(&self.config, validation_split)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRoute {
    pub project_no: Identifier,
    pub train_id: Identifier,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::DatasetKind;

    const EXAMPLE: &str = r#"{
        "train_id": 7,
        "project_no": 3,
        "user_id": "u1",
        "config": {
            "epochs": 5,
            "batch_size": 16,
            "early_stop": {"usage": false},
            "learning_rate_reduction": {"usage": false}
        },
        "data_set": {"kind": "IMAGES", "train_uri": "s3://x"}
    }"#;

    #[test]
    fn test_decode_example_message() {
        let job = JobRequest::decode(EXAMPLE.as_bytes()).unwrap();
        assert_eq!(job.train_id, Identifier::Number(7));
        assert_eq!(job.user_id, Identifier::Text("u1".to_string()));
        assert_eq!(job.data_set.kind, DatasetKind::Images);
        assert_eq!(job.data_set.train_uri.as_deref(), Some("s3://x"));
        assert_eq!(job.route().project_no.to_string(), "3");
    }

    #[test]
    fn test_identifier_keeps_json_type() {
        let json = serde_json::to_string(&Identifier::Number(7)).unwrap();
        assert_eq!(json, "7");
        let json = serde_json::to_string(&Identifier::from("abc")).unwrap();
        assert_eq!(json, "\"abc\"");
    }

    #[test]
    fn test_decode_rejects_blank_user() {
        let payload = EXAMPLE.replace("\"u1\"", "\"  \"");
        let err = JobRequest::decode(payload.as_bytes()).unwrap_err();
        assert!(matches!(err, DecodeError::EmptyField("user_id")));
    }

    #[test]
    fn test_decode_rejects_missing_train_id() {
        let payload = r#"{"project_no": 1, "user_id": "u", "data_set": {"kind": "CSV"}}"#;
        assert!(matches!(JobRequest::decode(payload.as_bytes()), Err(DecodeError::Json(_))));
    }

    #[test]
    fn test_missing_config_surfaces_at_validation() {
        let payload = r#"{"train_id": 1, "project_no": 1, "user_id": "u", "data_set": {"kind": "CSV"}}"#;
        let job = JobRequest::decode(payload.as_bytes()).unwrap();
        assert!(job.train_config(0.3).is_err());
    }
}
