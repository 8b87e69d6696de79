/// Account-side database models
use crate::{
    account::Role,
    error::{AppError, AppResult},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row};

pub const ACCOUNT_COLUMNS: &str =
    "id, email, name, password_hash, role, school_id, is_active, created_at";

/// School (tenant) record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct School {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl School {
    pub fn from_row(row: &SqliteRow) -> AppResult<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Account record in the database
#[derive(Debug, Clone)]
pub struct Account {
    pub id: String,
    pub email: String,
    pub name: String,
    pub password_hash: String,
    pub role: Role,
    pub school_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn from_row(row: &SqliteRow) -> AppResult<Self> {
        let role: String = row.try_get("role")?;
        Ok(Self {
            id: row.try_get("id")?,
            email: row.try_get("email")?,
            name: row.try_get("name")?,
            password_hash: row.try_get("password_hash")?,
            role: Role::from_str(&role)?,
            school_id: row.try_get("school_id")?,
            is_active: row.try_get("is_active")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Account as returned to clients (no credential material)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    pub school_id: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id.clone(),
            email: account.email.clone(),
            name: account.name.clone(),
            role: account.role,
            school_id: account.school_id.clone(),
            is_active: account.is_active,
            created_at: account.created_at,
        }
    }
}

/// Invite record
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    pub id: String,
    pub token: String,
    pub email: String,
    pub role: Role,
    pub school_id: String,
    pub invited_by: String,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Invite {
    pub fn from_row(row: &SqliteRow) -> AppResult<Self> {
        let role: String = row.try_get("role")?;
        Ok(Self {
            id: row.try_get("id")?,
            token: row.try_get("token")?,
            email: row.try_get("email")?,
            role: Role::from_str(&role)?,
            school_id: row.try_get("school_id")?,
            invited_by: row.try_get("invited_by")?,
            used: row.try_get("used")?,
            used_at: row.try_get("used_at")?,
            expires_at: row.try_get("expires_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    /// Reject used or expired invites; used takes precedence over expired
    pub fn ensure_usable(&self, now: DateTime<Utc>) -> AppResult<()> {
        if self.used {
            return Err(AppError::TokenUsed);
        }
        if now >= self.expires_at {
            return Err(AppError::TokenExpired);
        }
        Ok(())
    }
}

/// What a password token lets its holder do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    /// First password for a bulk-imported account (48 hours)
    SetupPassword,
    /// Forgot-password reset (1 hour)
    ResetPassword,
}

impl TokenPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenPurpose::SetupPassword => "setup_password",
            TokenPurpose::ResetPassword => "reset_password",
        }
    }

    pub fn lifetime(&self) -> chrono::Duration {
        match self {
            TokenPurpose::SetupPassword => chrono::Duration::hours(48),
            TokenPurpose::ResetPassword => chrono::Duration::hours(1),
        }
    }
}

/// Single-use password token
#[derive(Debug, Clone)]
pub struct PasswordToken {
    pub token: String,
    pub account_id: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PasswordToken {
    pub fn from_row(row: &SqliteRow) -> AppResult<Self> {
        Ok(Self {
            token: row.try_get("token")?,
            account_id: row.try_get("account_id")?,
            expires_at: row.try_get("expires_at")?,
            used_at: row.try_get("used_at")?,
            created_at: row.try_get("created_at")?,
        })
    }

    /// A token is valid iff it is unused and not yet expired
    pub fn ensure_usable(&self, now: DateTime<Utc>) -> AppResult<()> {
        if self.used_at.is_some() {
            return Err(AppError::TokenUsed);
        }
        if now >= self.expires_at {
            return Err(AppError::TokenExpired);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn token(used_at: Option<DateTime<Utc>>, expires_in: Duration) -> PasswordToken {
        let now = Utc::now();
        PasswordToken {
            token: "t".into(),
            account_id: "a".into(),
            expires_at: now + expires_in,
            used_at,
            created_at: now,
        }
    }

    #[test]
    fn test_used_token_rejected_even_when_unexpired() {
        let t = token(Some(Utc::now()), Duration::hours(10));
        assert!(matches!(t.ensure_usable(Utc::now()), Err(AppError::TokenUsed)));
    }

    #[test]
    fn test_expired_token_rejected_even_when_unused() {
        let t = token(None, Duration::hours(-1));
        assert!(matches!(t.ensure_usable(Utc::now()), Err(AppError::TokenExpired)));
    }

    #[test]
    fn test_fresh_token_accepted() {
        let t = token(None, Duration::hours(1));
        assert!(t.ensure_usable(Utc::now()).is_ok());
    }
}
