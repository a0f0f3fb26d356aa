//! Reviewer service - assigns pull request reviewers within teams.
//!
//! The core is [`services::reviewer_store::ReviewerStore`], which persists
//! teams and pull requests in SQLite, picks reviewers through
//! [`services::reviewer_selection`] and retries transient store failures
//! through [`services::retry`]. The HTTP layer in [`services::http_api`] is a
//! thin adapter over it.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use error::{AppError, ErrorKind};
