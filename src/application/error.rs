use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    application::{
        jobs::{BatchSizerError, JobExecutionError},
        output::OutputError,
        repos::RepoError,
    },
    domain::error::DomainError,
    infra::error::InfraError,
};

/// An error flattened into its message chain, outermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }

    pub fn render(&self) -> String {
        self.messages.join(": ")
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Output(#[from] OutputError),
    #[error(transparent)]
    Job(#[from] JobExecutionError),
    #[error(transparent)]
    BatchSizer(#[from] BatchSizerError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from_error("application::error::AppError", self)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn report_walks_the_source_chain() {
        let err = AppError::from(OutputError::FontLoad {
            path: PathBuf::from("/fonts/default.ttf"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        });
        let report = err.report();
        assert_eq!(
            report.messages,
            vec![
                "failed to load font file `/fonts/default.ttf`".to_string(),
                "denied".to_string()
            ]
        );
        assert_eq!(
            report.render(),
            "failed to load font file `/fonts/default.ttf`: denied"
        );
    }
}
