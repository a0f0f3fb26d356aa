//! Team and team member models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A member as listed inside a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TeamMember {
    pub user_id: String,
    pub username: String,
    pub is_active: bool,
}

impl TeamMember {
    pub fn new(user_id: impl Into<String>, username: impl Into<String>, is_active: bool) -> Self {
        Self {
            user_id: user_id.into(),
            username: username.into(),
            is_active,
        }
    }
}

/// A named group of users sharing a reviewer pool.
///
/// `team_name` is the business key; members are created together with the
/// team and never spread across teams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub team_name: String,
    pub members: Vec<TeamMember>,
}

impl Team {
    pub fn new(team_name: impl Into<String>, members: Vec<TeamMember>) -> Self {
        Self {
            team_name: team_name.into(),
            members,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_team_json_shape() {
        let team = Team::new("backend", vec![TeamMember::new("u1", "Alice", true)]);
        let json = serde_json::to_value(&team).unwrap();
        assert_eq!(json["team_name"], "backend");
        assert_eq!(json["members"][0]["user_id"], "u1");
        assert_eq!(json["members"][0]["username"], "Alice");
        assert_eq!(json["members"][0]["is_active"], true);
    }
}
