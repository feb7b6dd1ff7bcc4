use std::path::PathBuf;

use thiserror::Error;

use super::StageKind;
use crate::warmup::Backend;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("no working folder available for {reference}")]
    FolderUnavailable { reference: String },
    #[error("download failed for {reference}")]
    DownloadFailed { reference: String },
    #[error("{stage} stage failed: {message}")]
    Stage { stage: StageKind, message: String },
    #[error("command failed ({command}): {stderr}")]
    CommandFailure {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("no command configured for {0}")]
    MissingCommand(String),
    #[error("{backend} initialization failed: {message}")]
    Backend { backend: Backend, message: String },
    #[error("task join error: {0}")]
    Join(String),
}

impl StageError {
    pub fn stage(stage: StageKind, message: impl Into<String>) -> Self {
        StageError::Stage {
            stage,
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for StageError {
    fn from(error: serde_json::Error) -> Self {
        StageError::Serialization(error.to_string())
    }
}

pub type StageResult<T> = Result<T, StageError>;
