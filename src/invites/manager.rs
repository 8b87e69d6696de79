/// Invite manager
use crate::{
    account::Role,
    crypto,
    db::models::{Account, Invite},
    error::{AppError, AppResult},
    invites::InviteSummary,
};
use chrono::{Duration, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;
use validator::ValidateEmail;

/// How long an invite stays acceptable
const INVITE_LIFETIME_DAYS: i64 = 7;

/// Invite manager
#[derive(Clone)]
pub struct InviteManager {
    db: SqlitePool,
}

impl InviteManager {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Create an invite for `email` to join the admin's school as `role`
    pub async fn create_invite(
        &self,
        admin: &Account,
        email: Option<&str>,
        role: Option<&str>,
    ) -> AppResult<Invite> {
        let school_id = admin_school(admin)?;

        let email = email
            .map(|e| e.trim().to_lowercase())
            .filter(|e| !e.is_empty())
            .ok_or(AppError::MissingField("email"))?;
        if !email.validate_email() {
            return Err(AppError::Validation("Invalid email format".to_string()));
        }
        let role = role
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .ok_or(AppError::MissingField("role"))
            .and_then(Role::from_str)?;

        let now = Utc::now();

        let pending: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM invite
            WHERE school_id = ?1 AND email = ?2 AND used = 0 AND expires_at > ?3
            "#,
        )
        .bind(school_id)
        .bind(&email)
        .bind(now)
        .fetch_one(&self.db)
        .await?;
        if pending > 0 {
            return Err(AppError::Conflict(
                "A pending invite already exists for this email".to_string(),
            ));
        }

        let member: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM account WHERE school_id = ?1 AND email = ?2",
        )
        .bind(school_id)
        .bind(&email)
        .fetch_one(&self.db)
        .await?;
        if member > 0 {
            return Err(AppError::Conflict(
                "An account with this email already belongs to the school".to_string(),
            ));
        }

        let invite = Invite {
            id: Uuid::new_v4().to_string(),
            token: crypto::generate_token(),
            email,
            role,
            school_id: school_id.to_string(),
            invited_by: admin.id.clone(),
            used: false,
            used_at: None,
            expires_at: now + Duration::days(INVITE_LIFETIME_DAYS),
            created_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO invite (id, token, email, role, school_id, invited_by, used, used_at, expires_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, NULL, ?7, ?8)
            "#,
        )
        .bind(&invite.id)
        .bind(&invite.token)
        .bind(&invite.email)
        .bind(invite.role.as_str())
        .bind(&invite.school_id)
        .bind(&invite.invited_by)
        .bind(invite.expires_at)
        .bind(invite.created_at)
        .execute(&self.db)
        .await?;

        tracing::info!(
            invite_id = %invite.id,
            school_id = %invite.school_id,
            role = %invite.role,
            invited_by = %admin.id,
            "Invite created"
        );

        Ok(invite)
    }

    /// Check an invite token without consuming it
    pub async fn validate_invite(&self, token: &str) -> AppResult<InviteSummary> {
        let row = sqlx::query(
            r#"
            SELECT i.*, s.name AS school_name
            FROM invite i
            JOIN school s ON s.id = i.school_id
            WHERE i.token = ?1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::InvalidToken)?;

        let invite = Invite::from_row(&row)?;
        invite.ensure_usable(Utc::now())?;

        Ok(InviteSummary {
            email: invite.email,
            role: invite.role,
            school_name: row.try_get("school_name")?,
            expires_at: invite.expires_at,
        })
    }

    /// All invites issued for the admin's school, newest first
    pub async fn list_invites(&self, admin: &Account) -> AppResult<Vec<Invite>> {
        let school_id = admin_school(admin)?;

        let rows = sqlx::query("SELECT * FROM invite WHERE school_id = ?1 ORDER BY created_at DESC")
            .bind(school_id)
            .fetch_all(&self.db)
            .await?;

        rows.iter().map(Invite::from_row).collect()
    }

    /// Revoke (delete) an invite from the admin's school
    pub async fn revoke_invite(&self, admin: &Account, invite_id: &str) -> AppResult<()> {
        let school_id = admin_school(admin)?;

        let owner: Option<String> =
            sqlx::query_scalar("SELECT school_id FROM invite WHERE id = ?1")
                .bind(invite_id)
                .fetch_optional(&self.db)
                .await?;

        match owner {
            None => return Err(AppError::NotFound("Invite not found".to_string())),
            Some(owner) if owner != school_id => {
                return Err(AppError::Authorization(
                    "Invite belongs to another school".to_string(),
                ))
            }
            Some(_) => {}
        }

        sqlx::query("DELETE FROM invite WHERE id = ?1")
            .bind(invite_id)
            .execute(&self.db)
            .await?;

        tracing::info!(invite_id, school_id, revoked_by = %admin.id, "Invite revoked");

        Ok(())
    }
}

/// The school an admin may issue invites for
fn admin_school(admin: &Account) -> AppResult<&str> {
    if !admin.role.can_administer_school() {
        return Err(AppError::Authorization("Admin access required".to_string()));
    }
    admin
        .school_id
        .as_deref()
        .ok_or_else(|| AppError::Authorization("Admin is not attached to a school".to_string()))
}
