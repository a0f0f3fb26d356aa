//! Application error types.
//!
//! Every failure the store or the assignment rules can produce is a named
//! variant of [`AppError`]. Callers branch on [`AppError::kind`] instead of
//! inspecting messages; the retry executor uses [`AppError::is_retryable`].

use thiserror::Error;

/// Coarse classification of an [`AppError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A team, user or pull request is absent.
    NotFound,
    /// The request contradicts current state (already exists, already merged, ...).
    Conflict,
    /// No eligible reviewer could be found.
    ExhaustedCandidates,
    /// Store failure that may succeed on a later attempt.
    Transient,
    /// Store failure that will not go away by retrying (schema errors).
    Permanent,
    /// The operation context was cancelled or its deadline passed.
    Cancelled,
    /// Malformed caller input.
    InvalidInput,
    /// Bug or broken invariant inside the service.
    Internal,
}

/// Application-level errors.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Team already exists: {team_name}")]
    TeamAlreadyExists { team_name: String },

    #[error("Team not found: {team_name}")]
    TeamNotFound { team_name: String },

    #[error("User not found: {user_id}")]
    UserNotFound { user_id: String },

    #[error("Pull request already exists: {pull_request_id}")]
    PullRequestAlreadyExists { pull_request_id: String },

    #[error("Pull request not found: {pull_request_id}")]
    PullRequestNotFound { pull_request_id: String },

    #[error("Pull request is merged: {pull_request_id}")]
    PullRequestMerged { pull_request_id: String },

    #[error("Reviewer {user_id} is not assigned to pull request {pull_request_id}")]
    ReviewerNotAssigned {
        pull_request_id: String,
        user_id: String,
    },

    /// No active team member other than the author can review.
    #[error("No eligible reviewers for author {author_id}")]
    ReviewersNotFound { author_id: String },

    /// No replacement reviewer is available.
    #[error("No replacement candidate for pull request {pull_request_id}")]
    NoCandidate { pull_request_id: String },

    /// A uniqueness constraint rejected an insert.
    #[error("Duplicate key: {message}")]
    DuplicateKey {
        message: String,
        operation: Option<String>,
    },

    #[error("Invalid status transition for {pull_request_id}: {from} -> {to}")]
    InvalidStatusTransition {
        pull_request_id: String,
        from: String,
        to: String,
    },

    /// A conditional write matched no row because another writer got there first.
    #[error("Pull request {pull_request_id} was modified concurrently")]
    ConcurrentModification { pull_request_id: String },

    /// Database operation failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        operation: Option<String>,
        retryable: bool,
    },

    /// The retry budget ran out; `source` is the last failure.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        source: Box<AppError>,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    /// Invalid input provided.
    #[error("Invalid input: {message}")]
    InvalidInput {
        message: String,
        field: Option<String>,
    },

    /// Internal application error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Create a transient database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: None,
            retryable: true,
        }
    }

    /// Create a permanent database error with operation context.
    pub fn permanent_with_op(message: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: Some(operation.into()),
            retryable: false,
        }
    }

    /// Classify a sqlx error and attach the operation that produced it.
    pub fn store(operation: impl Into<String>, err: sqlx::Error) -> Self {
        let operation = operation.into();
        match Self::from(err) {
            Self::Database {
                message, retryable, ..
            } => Self::Database {
                message,
                operation: Some(operation),
                retryable,
            },
            Self::DuplicateKey { message, .. } => Self::DuplicateKey {
                message,
                operation: Some(operation),
            },
            other => other,
        }
    }

    pub fn team_not_found(team_name: impl Into<String>) -> Self {
        Self::TeamNotFound {
            team_name: team_name.into(),
        }
    }

    pub fn user_not_found(user_id: impl Into<String>) -> Self {
        Self::UserNotFound {
            user_id: user_id.into(),
        }
    }

    pub fn pull_request_not_found(pull_request_id: impl Into<String>) -> Self {
        Self::PullRequestNotFound {
            pull_request_id: pull_request_id.into(),
        }
    }

    /// Create an invalid input error with field name.
    pub fn invalid_input_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classify this error into the stable taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TeamNotFound { .. }
            | Self::UserNotFound { .. }
            | Self::PullRequestNotFound { .. } => ErrorKind::NotFound,
            Self::TeamAlreadyExists { .. }
            | Self::PullRequestAlreadyExists { .. }
            | Self::PullRequestMerged { .. }
            | Self::ReviewerNotAssigned { .. }
            | Self::DuplicateKey { .. }
            | Self::InvalidStatusTransition { .. } => ErrorKind::Conflict,
            Self::ReviewersNotFound { .. } | Self::NoCandidate { .. } => {
                ErrorKind::ExhaustedCandidates
            }
            Self::Database {
                retryable: false, ..
            } => ErrorKind::Permanent,
            Self::Database { .. }
            | Self::ConcurrentModification { .. }
            | Self::RetriesExhausted { .. } => ErrorKind::Transient,
            Self::Cancelled | Self::DeadlineExceeded => ErrorKind::Cancelled,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether another attempt of the same unit of work may succeed.
    ///
    /// `RetriesExhausted` is transient in kind but is never retried again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database {
                retryable: true,
                ..
            } | Self::ConcurrentModification { .. }
        )
    }
}

/// Errors that point at a broken schema rather than a busy store.
fn is_schema_error(message: &str, code: Option<&str>) -> bool {
    let message = message.to_lowercase();
    message.contains("no such table")
        || message.contains("no such column")
        || matches!(code, Some("42P01") | Some("42703"))
}

// Conversions from common error types

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                if db.is_unique_violation() {
                    return Self::DuplicateKey {
                        message: db.message().to_string(),
                        operation: None,
                    };
                }
                let code = db.code();
                let permanent = is_schema_error(db.message(), code.as_deref())
                    || db.is_foreign_key_violation()
                    || db.is_check_violation();
                Self::Database {
                    message: err.to_string(),
                    operation: None,
                    retryable: !permanent,
                }
            }
            sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::ColumnIndexOutOfBounds { .. }
            | sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. }
            | sqlx::Error::RowNotFound
            | sqlx::Error::Configuration(_)
            | sqlx::Error::PoolClosed => Self::Database {
                message: err.to_string(),
                operation: None,
                retryable: false,
            },
            // Io, Tls, Protocol, PoolTimedOut, WorkerCrashed and anything newer.
            _ => Self::database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("JSON error: {}", err))
    }
}

impl From<crate::db::DbError> for AppError {
    fn from(err: crate::db::DbError) -> Self {
        match err {
            crate::db::DbError::Sqlite(e) => Self::from(e),
            other => Self::Database {
                message: other.to_string(),
                operation: None,
                retryable: false,
            },
        }
    }
}
