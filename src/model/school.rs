use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A member's role inside one school.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            other => Err(format!("Unknown role '{}'", other)),
        }
    }
}

/// Who is asking, and in which school. Resolved once per request and passed
/// down to every query so each one stays scoped to `school_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchoolContext {
    pub school_id: i64,
    pub user_id: i64,
    pub role: Role,
}

impl SchoolContext {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}
