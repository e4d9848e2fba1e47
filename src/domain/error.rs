use thiserror::Error;

use super::types::JobStatus;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("job must reference exactly one of a template version or an environment")]
    AmbiguousTarget,
    #[error("job status cannot move from {from:?} to {to:?}")]
    IllegalTransition { from: JobStatus, to: JobStatus },
    #[error("domain validation failed: {message}")]
    Validation { message: String },
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn illegal_transition(from: JobStatus, to: JobStatus) -> Self {
        Self::IllegalTransition { from, to }
    }
}
