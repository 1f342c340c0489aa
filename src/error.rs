use crate::models::ValidationIssue;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("payload is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("payload is not valid utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("payload is not valid json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store snapshot is corrupted: {0}")]
    Snapshot(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum QuizError {
    #[error("codec: {0}")]
    Codec(#[from] CodecError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("invalid config value for {key}: {value}")]
    Config { key: &'static str, value: String },
    #[error("question set validation failed ({} issues)", .0.len())]
    Validation(Vec<ValidationIssue>),
}

impl QuizError {
    pub fn code(&self) -> &'static str {
        match self {
            QuizError::Codec(_) => "DECODE_ERROR",
            QuizError::Store(_) => "STORAGE_ERROR",
            QuizError::Config { .. } => "CONFIG_ERROR",
            QuizError::Validation(_) => "VALIDATION_ERROR",
        }
    }

    pub fn details(&self) -> &[ValidationIssue] {
        match self {
            QuizError::Validation(issues) => issues,
            _ => &[],
        }
    }
}
