use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::prelude::FromRow;
use uuid::Uuid;

/// User role mapping for core.user_role, ordered from least to most privileged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "core.user_role", rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Operator,
    Admin,
    SuperAdmin,
}

impl Role {
    /// Hierarchy level used by the policy checks.
    pub fn level(self) -> u8 {
        match self {
            Role::Viewer => 0,
            Role::Operator => 1,
            Role::Admin => 2,
            Role::SuperAdmin => 3,
        }
    }

    /// Parses a role claim as it appears in the session token.
    pub fn from_claim(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "VIEWER" => Some(Role::Viewer),
            "OPERATOR" => Some(Role::Operator),
            "ADMIN" => Some(Role::Admin),
            "SUPER_ADMIN" | "SUPER-ADMIN" => Some(Role::SuperAdmin),
            _ => None,
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Self::Viewer
    }
}

/// User model mapped to core.user. One user belongs to exactly one department.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub auth0_user_id: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub department_id: Uuid,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
