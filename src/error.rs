use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::job::{JobId, JobState};
use crate::store::store::StoreError;

/// The three error classes a job can end with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InvalidInput,
    NoFaceDetected,
    ProcessingError,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no face detected: {0}")]
    NoFaceDetected(String),

    #[error("processing failed: {0}")]
    Processing(String),

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("illegal job transition from {from} to {to}")]
    IllegalTransition { from: JobState, to: JobState },

    #[error("storage error: {0}")]
    Storage(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::InvalidInput(_) | PipelineError::JobNotFound(_) => ErrorKind::InvalidInput,
            PipelineError::NoFaceDetected(_) => ErrorKind::NoFaceDetected,
            PipelineError::Processing(_)
            | PipelineError::IllegalTransition { .. }
            | PipelineError::Storage(_) => ErrorKind::ProcessingError,
        }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        PipelineError::InvalidInput(msg.into())
    }

    pub(crate) fn processing(msg: impl Into<String>) -> Self {
        PipelineError::Processing(msg.into())
    }
}

impl From<StoreError> for PipelineError {
    fn from(e: StoreError) -> Self {
        PipelineError::Storage(e.to_string())
    }
}

impl From<image::ImageError> for PipelineError {
    fn from(e: image::ImageError) -> Self {
        PipelineError::Processing(format!("image codec: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
