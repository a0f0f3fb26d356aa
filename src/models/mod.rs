//! Data models for the reviewer service.
//!
//! Row types derive `FromRow` for SQLx queries; the domain types derive
//! `Serialize`/`Deserialize` and double as the HTTP payloads.

pub mod pull_request;
pub mod team;
pub mod user;

// Re-exports for convenient access
pub use pull_request::{
    NewPullRequest, PullRequest, PullRequestRecord, PullRequestStatus, PullRequestSummary,
    Reassignment, MAX_REVIEWERS,
};
pub use team::{Team, TeamMember};
pub use user::User;
