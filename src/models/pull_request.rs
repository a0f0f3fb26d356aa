//! Pull request model and its lifecycle.
//!
//! A pull request starts `OPEN`, may be merged exactly once, and only while
//! open may its reviewers be swapped. `merged_at` is written on the first
//! merge and never again.

use crate::error::AppError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;

/// Upper bound on reviewers picked for a new pull request.
pub const MAX_REVIEWERS: usize = 2;

/// Status of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PullRequestStatus {
    Open,
    Merged,
}

impl PullRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Merged => "MERGED",
        }
    }
}

impl std::fmt::Display for PullRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PullRequestStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "OPEN" => Ok(Self::Open),
            "MERGED" => Ok(Self::Merged),
            other => Err(AppError::invalid_input_field(
                format!("unknown pull request status '{}'", other),
                "status",
            )),
        }
    }
}

/// Input for creating a pull request. Reviewers are chosen by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPullRequest {
    pub pull_request_id: String,
    pub pull_request_name: String,
    pub author_id: String,
}

impl NewPullRequest {
    pub fn new(
        pull_request_id: impl Into<String>,
        pull_request_name: impl Into<String>,
        author_id: impl Into<String>,
    ) -> Self {
        Self {
            pull_request_id: pull_request_id.into(),
            pull_request_name: pull_request_name.into(),
            author_id: author_id.into(),
        }
    }
}

/// Row shape of the `pull_requests` table.
///
/// Note: `assigned_reviewers` is a JSON array string and timestamps are Unix
/// milliseconds; use [`PullRequestRecord::into_pull_request`] to decode.
#[derive(Debug, Clone, FromRow)]
pub struct PullRequestRecord {
    pub pull_request_id: String,
    pub pull_request_name: String,
    pub author_id: String,
    pub status: String,
    pub assigned_reviewers: String,
    pub created_at: i64,
    pub merged_at: Option<i64>,
}

impl PullRequestRecord {
    /// Parse the reviewers JSON array.
    pub fn reviewers_vec(&self) -> Result<Vec<String>, AppError> {
        Ok(serde_json::from_str(&self.assigned_reviewers)?)
    }

    pub fn into_pull_request(self) -> Result<PullRequest, AppError> {
        let assigned_reviewers = self.reviewers_vec()?;
        let status = self
            .status
            .parse::<PullRequestStatus>()
            .map_err(|e| AppError::internal(format!("corrupt row {}: {}", self.pull_request_id, e)))?;
        Ok(PullRequest {
            created_at: from_millis(self.created_at)?,
            merged_at: self.merged_at.map(from_millis).transpose()?,
            pull_request_id: self.pull_request_id,
            pull_request_name: self.pull_request_name,
            author_id: self.author_id,
            status,
            assigned_reviewers,
        })
    }
}

pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>, AppError> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| AppError::internal(format!("timestamp out of range: {}", ms)))
}

/// A pull request with its decoded reviewer list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub pull_request_id: String,
    pub pull_request_name: String,
    pub author_id: String,
    pub status: PullRequestStatus,
    /// Reviewer ids in slot order. Never contains the author or duplicates.
    pub assigned_reviewers: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_at: Option<DateTime<Utc>>,
}

impl PullRequest {
    /// Apply a status change requested at `when`.
    ///
    /// Returns whether anything changed. Merging an already merged pull
    /// request is a no-op that keeps the original `merged_at`.
    pub fn transition_to(
        &mut self,
        to: PullRequestStatus,
        when: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        match (self.status, to) {
            (PullRequestStatus::Open, PullRequestStatus::Open) => Ok(false),
            (PullRequestStatus::Merged, PullRequestStatus::Merged) => Ok(false),
            (PullRequestStatus::Open, PullRequestStatus::Merged) => {
                self.status = PullRequestStatus::Merged;
                if self.merged_at.is_none() {
                    self.merged_at = Some(when);
                }
                Ok(true)
            }
            (PullRequestStatus::Merged, PullRequestStatus::Open) => {
                Err(AppError::InvalidStatusTransition {
                    pull_request_id: self.pull_request_id.clone(),
                    from: self.status.to_string(),
                    to: to.to_string(),
                })
            }
        }
    }

    /// Reviewers may only be swapped while the pull request is open.
    pub fn ensure_reassignable(&self) -> Result<(), AppError> {
        match self.status {
            PullRequestStatus::Open => Ok(()),
            PullRequestStatus::Merged => Err(AppError::PullRequestMerged {
                pull_request_id: self.pull_request_id.clone(),
            }),
        }
    }

    /// Slot index of `user_id`, or `ReviewerNotAssigned`.
    pub fn reviewer_slot(&self, user_id: &str) -> Result<usize, AppError> {
        self.assigned_reviewers
            .iter()
            .position(|r| r == user_id)
            .ok_or_else(|| AppError::ReviewerNotAssigned {
                pull_request_id: self.pull_request_id.clone(),
                user_id: user_id.to_string(),
            })
    }

    /// Put `new_user_id` into the slot held by `old_user_id`.
    pub fn replace_reviewer(&mut self, old_user_id: &str, new_user_id: &str) -> Result<(), AppError> {
        let slot = self.reviewer_slot(old_user_id)?;
        self.assigned_reviewers[slot] = new_user_id.to_string();
        Ok(())
    }

    pub fn reviewers_json(&self) -> Result<String, AppError> {
        Ok(serde_json::to_string(&self.assigned_reviewers)?)
    }
}

/// Compact listing entry used by reviewer queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestSummary {
    pub pull_request_id: String,
    pub pull_request_name: String,
    pub author_id: String,
    pub status: PullRequestStatus,
}

impl From<PullRequest> for PullRequestSummary {
    fn from(pr: PullRequest) -> Self {
        Self {
            pull_request_id: pr.pull_request_id,
            pull_request_name: pr.pull_request_name,
            author_id: pr.author_id,
            status: pr.status,
        }
    }
}

/// Outcome of a successful reviewer swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reassignment {
    pub pull_request: PullRequest,
    pub replaced_by: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_pr() -> PullRequest {
        PullRequest {
            pull_request_id: "pr-1".into(),
            pull_request_name: "Add search".into(),
            author_id: "a".into(),
            status: PullRequestStatus::Open,
            assigned_reviewers: vec!["b".into(), "c".into()],
            created_at: from_millis(1_700_000_000_000).unwrap(),
            merged_at: None,
        }
    }

    #[test]
    fn test_status_round_trips_through_strings() {
        assert_eq!("OPEN".parse::<PullRequestStatus>().unwrap(), PullRequestStatus::Open);
        assert_eq!("merged".parse::<PullRequestStatus>().unwrap(), PullRequestStatus::Merged);
        assert!("CLOSED".parse::<PullRequestStatus>().is_err());
        assert_eq!(PullRequestStatus::Merged.to_string(), "MERGED");
        assert_eq!(serde_json::to_string(&PullRequestStatus::Open).unwrap(), "\"OPEN\"");
    }

    #[test]
    fn test_merge_sets_merged_at_once() {
        let mut pr = open_pr();
        let first = from_millis(1_700_000_100_000).unwrap();
        let second = from_millis(1_700_000_200_000).unwrap();

        assert!(pr.transition_to(PullRequestStatus::Merged, first).unwrap());
        assert_eq!(pr.merged_at, Some(first));

        assert!(!pr.transition_to(PullRequestStatus::Merged, second).unwrap());
        assert_eq!(pr.status, PullRequestStatus::Merged);
        assert_eq!(pr.merged_at, Some(first));
    }

    #[test]
    fn test_merged_cannot_reopen() {
        let mut pr = open_pr();
        let when = from_millis(1_700_000_100_000).unwrap();
        pr.transition_to(PullRequestStatus::Merged, when).unwrap();

        let err = pr.transition_to(PullRequestStatus::Open, when).unwrap_err();
        assert!(matches!(err, AppError::InvalidStatusTransition { .. }));
        assert_eq!(pr.status, PullRequestStatus::Merged);
    }

    #[test]
    fn test_reassignment_only_while_open() {
        let mut pr = open_pr();
        assert!(pr.ensure_reassignable().is_ok());

        pr.transition_to(PullRequestStatus::Merged, Utc::now()).unwrap();
        assert!(matches!(
            pr.ensure_reassignable(),
            Err(AppError::PullRequestMerged { .. })
        ));
    }

    #[test]
    fn test_replace_reviewer_keeps_slot() {
        let mut pr = open_pr();
        pr.replace_reviewer("c", "d").unwrap();
        assert_eq!(pr.assigned_reviewers, vec!["b", "d"]);

        let err = pr.replace_reviewer("z", "e").unwrap_err();
        assert!(matches!(err, AppError::ReviewerNotAssigned { .. }));
        assert_eq!(pr.assigned_reviewers, vec!["b", "d"]);
    }

    #[test]
    fn test_record_decodes_reviewers_and_timestamps() {
        let record = PullRequestRecord {
            pull_request_id: "pr-9".into(),
            pull_request_name: "Fix".into(),
            author_id: "a".into(),
            status: "MERGED".into(),
            assigned_reviewers: r#"["b"]"#.into(),
            created_at: 1_700_000_000_000,
            merged_at: Some(1_700_000_500_000),
        };

        let pr = record.into_pull_request().unwrap();
        assert_eq!(pr.status, PullRequestStatus::Merged);
        assert_eq!(pr.assigned_reviewers, vec!["b"]);
        assert_eq!(pr.merged_at.unwrap().timestamp_millis(), 1_700_000_500_000);
    }

    #[test]
    fn test_open_pr_serializes_without_merged_at() {
        let json = serde_json::to_value(open_pr()).unwrap();
        assert_eq!(json["status"], "OPEN");
        assert!(json.get("merged_at").is_none());
    }
}
