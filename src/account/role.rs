/// Account roles
use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Role held by an account within its school
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    /// Runs a school: invites members, imports accounts, manages billing
    Admin,
    Teacher,
    Parent,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Teacher => "TEACHER",
            Role::Parent => "PARENT",
            Role::Student => "STUDENT",
        }
    }

    pub fn from_str(s: &str) -> AppResult<Self> {
        match s.to_uppercase().as_str() {
            "ADMIN" => Ok(Role::Admin),
            "TEACHER" => Ok(Role::Teacher),
            "PARENT" => Ok(Role::Parent),
            "STUDENT" => Ok(Role::Student),
            _ => Err(AppError::Validation(format!("Invalid role: {}", s))),
        }
    }

    /// Whether this role may issue invites, import accounts and toggle activation
    pub fn can_administer_school(&self) -> bool {
        match self {
            Role::Admin => true,
            Role::Teacher | Role::Parent | Role::Student => false,
        }
    }

    /// Whether this role may pay for, inspect or cancel the school subscription
    ///
    /// Independent teachers own their personal school and pay for it themselves.
    pub fn can_manage_billing(&self) -> bool {
        match self {
            Role::Admin | Role::Teacher => true,
            Role::Parent | Role::Student => false,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
