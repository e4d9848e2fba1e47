//! Domain entities mirrored from persistent storage.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::domain::{error::DomainError, types::JobStatus};

/// Upper bound (in characters) of a persisted job error message.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 1000;

/// Which published revision of a template variant a job renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum VersionSelector {
    /// A pinned version number.
    Version(i32),
    /// Whatever version is currently active in the named environment.
    Environment(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationJob {
    pub id: Uuid,
    pub tenant_id: String,
    pub template_id: String,
    pub variant_id: String,
    pub target: VersionSelector,
    pub data: Value,
    pub filename: Option<String>,
    pub status: JobStatus,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<OffsetDateTime>,
    pub started_at: Option<OffsetDateTime>,
    pub completed_at: Option<OffsetDateTime>,
    pub expires_at: Option<OffsetDateTime>,
    pub error_message: Option<String>,
    pub document_id: Option<Uuid>,
    pub total_count: i32,
    pub completed_count: i32,
    pub failed_count: i32,
    pub created_at: OffsetDateTime,
}

impl GenerationJob {
    /// Time since the job was claimed, if it has been claimed at all.
    pub fn claim_age(&self, now: OffsetDateTime) -> Option<Duration> {
        self.claimed_at.map(|claimed_at| now - claimed_at)
    }

    /// Claimant is present exactly when the job has left `Pending`.
    pub fn claimant_consistent(&self) -> bool {
        match self.status {
            JobStatus::Pending | JobStatus::Cancelled => self.claimed_by.is_none(),
            JobStatus::InProgress | JobStatus::Completed | JobStatus::Failed => {
                self.claimed_by.is_some()
            }
        }
    }

    pub fn transition(&mut self, next: JobStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::illegal_transition(self.status, next));
        }
        self.status = next;
        Ok(())
    }
}

/// Parameters for creating a pending job.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NewGenerationJob {
    pub tenant_id: String,
    pub template_id: String,
    pub variant_id: String,
    #[serde(default)]
    pub version_id: Option<i32>,
    #[serde(default)]
    pub environment_id: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub filename: Option<String>,
}

impl NewGenerationJob {
    pub fn target(&self) -> Result<VersionSelector, DomainError> {
        match (self.version_id, self.environment_id.as_deref()) {
            (Some(version), None) => Ok(VersionSelector::Version(version)),
            (None, Some(environment)) if !environment.trim().is_empty() => {
                Ok(VersionSelector::Environment(environment.to_string()))
            }
            _ => Err(DomainError::AmbiguousTarget),
        }
    }
}

/// A rendered document ready for persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct NewGeneratedDocument {
    pub tenant_id: String,
    pub job_id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
    pub expires_at: OffsetDateTime,
}

impl NewGeneratedDocument {
    pub fn size_bytes(&self) -> i64 {
        self.bytes.len() as i64
    }
}

/// Truncate an error message to [`MAX_ERROR_MESSAGE_CHARS`] without splitting a character.
pub fn truncate_error_message(message: &str) -> String {
    match message.char_indices().nth(MAX_ERROR_MESSAGE_CHARS) {
        Some((cut, _)) => message[..cut].to_string(),
        None => message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn new_job(version_id: Option<i32>, environment_id: Option<&str>) -> NewGenerationJob {
        NewGenerationJob {
            tenant_id: "acme".into(),
            template_id: "invoice".into(),
            variant_id: "default".into(),
            version_id,
            environment_id: environment_id.map(str::to_string),
            data: json!({}),
            filename: None,
        }
    }

    #[test]
    fn target_requires_exactly_one_selector() {
        assert_eq!(
            new_job(Some(3), None).target(),
            Ok(VersionSelector::Version(3))
        );
        assert_eq!(
            new_job(None, Some("production")).target(),
            Ok(VersionSelector::Environment("production".into()))
        );
        assert_eq!(
            new_job(Some(3), Some("production")).target(),
            Err(DomainError::AmbiguousTarget)
        );
        assert_eq!(new_job(None, None).target(), Err(DomainError::AmbiguousTarget));
        assert_eq!(
            new_job(None, Some("  ")).target(),
            Err(DomainError::AmbiguousTarget)
        );
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let short = "boom";
        assert_eq!(truncate_error_message(short), "boom");

        let long: String = std::iter::repeat('é').take(1500).collect();
        let truncated = truncate_error_message(&long);
        assert_eq!(truncated.chars().count(), MAX_ERROR_MESSAGE_CHARS);

        let exact: String = "x".repeat(MAX_ERROR_MESSAGE_CHARS);
        assert_eq!(truncate_error_message(&exact), exact);
    }
}
