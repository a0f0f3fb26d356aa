//! User model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A team member as stored in the `users` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: String,
    pub username: String,
    /// The single team this user belongs to.
    pub team_name: String,
    /// Only active users are picked as reviewers.
    pub is_active: bool,
}
