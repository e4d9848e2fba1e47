//! Shared domain enumerations aligned with persisted database values.

use serde::{Deserialize, Serialize};

/// Lifecycle of a generation job. Transitions only move forward:
/// `Pending → InProgress → {Completed, Failed}` or `Pending → Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::InProgress => "IN_PROGRESS",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Position along the lifecycle; terminal states share the final rank.
    fn rank(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::InProgress => 1,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Cancelled) => true,
            (JobStatus::Pending, JobStatus::Completed | JobStatus::Failed) => false,
            (JobStatus::InProgress, JobStatus::Cancelled) => false,
            _ => next.rank() == self.rank() + 1,
        }
    }
}

impl TryFrom<&str> for JobStatus {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "PENDING" => Ok(JobStatus::Pending),
            "IN_PROGRESS" => Ok(JobStatus::InProgress),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            _ => Err(()),
        }
    }
}

/// Language tag carried by every expression in a template document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionLanguage {
    /// Dotted property path resolved directly against the data.
    #[default]
    #[serde(alias = "simple_path")]
    Path,
    /// Declarative JSON query/transform language.
    #[serde(alias = "jsonata")]
    Query,
    /// Sandboxed general-purpose scripting.
    #[serde(alias = "javascript", alias = "rhai")]
    Script,
}

impl ExpressionLanguage {
    pub fn as_str(self) -> &'static str {
        match self {
            ExpressionLanguage::Path => "path",
            ExpressionLanguage::Query => "query",
            ExpressionLanguage::Script => "script",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_storage_text() {
        for status in [
            JobStatus::Pending,
            JobStatus::InProgress,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::try_from(status.as_str()), Ok(status));
        }
        assert!(JobStatus::try_from("RUNNING").is_err());
    }

    #[test]
    fn transitions_only_move_forward() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::InProgress));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Cancelled));
        assert!(JobStatus::InProgress.can_transition_to(JobStatus::Completed));
        assert!(JobStatus::InProgress.can_transition_to(JobStatus::Failed));

        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::InProgress.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::InProgress.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Cancelled.can_transition_to(JobStatus::InProgress));
    }

    #[test]
    fn language_accepts_legacy_tags() {
        let parsed: ExpressionLanguage = serde_json::from_str("\"jsonata\"").unwrap();
        assert_eq!(parsed, ExpressionLanguage::Query);
        let parsed: ExpressionLanguage = serde_json::from_str("\"simple_path\"").unwrap();
        assert_eq!(parsed, ExpressionLanguage::Path);
        let parsed: ExpressionLanguage = serde_json::from_str("\"script\"").unwrap();
        assert_eq!(parsed, ExpressionLanguage::Script);
    }
}
