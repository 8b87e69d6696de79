/// Account manager implementation using runtime queries
/// Queries are built at runtime with sqlx so no DATABASE_URL is needed at compile time

use crate::{
    account::{
        session, MaskedIdentity, RegisterRequest, RegistrationType, Role, SessionClaims,
        ImportRow,
    },
    config::ServerConfig,
    crypto,
    db::models::{Account, Invite, PasswordToken, School, TokenPurpose, ACCOUNT_COLUMNS},
    error::{AppError, AppResult},
};
use chrono::{Duration, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::sync::Arc;
use uuid::Uuid;
use validator::ValidateEmail;

/// Minimum length for passwords set through setup and reset tokens
const MIN_PASSWORD_LENGTH: usize = 8;

/// Result of importing one row
#[derive(Debug, Clone)]
pub enum ImportOutcome {
    Created {
        account: Account,
        setup_token: String,
    },
    Skipped {
        row: usize,
        email: Option<String>,
        reason: String,
    },
}

/// Account manager service
pub struct AccountManager {
    db: SqlitePool,
    config: Arc<ServerConfig>,
}

impl AccountManager {
    /// Create a new account manager
    pub fn new(db: SqlitePool, config: Arc<ServerConfig>) -> Self {
        Self { db, config }
    }

    /// Register a new account through one of the three registration paths
    ///
    /// All field checks happen before any write; every branch writes inside a
    /// single transaction so a failure leaves no account, school or consumed
    /// invite behind.
    pub async fn register(&self, req: RegisterRequest) -> AppResult<Account> {
        let email = normalize_email(required(&req.email, "email")?);
        let password = req
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(AppError::MissingField("password"))?;
        let name = required(&req.name, "name")?.to_string();

        if !email.validate_email() {
            return Err(AppError::Validation("Invalid email format".to_string()));
        }

        // Branch-specific inputs are checked up front as well
        let school_name = match req.registration_type {
            RegistrationType::SchoolAdmin => Some(required(&req.school_name, "schoolName")?.to_string()),
            RegistrationType::Invite | RegistrationType::Teacher => None,
        };
        let invite_token = match req.registration_type {
            RegistrationType::Invite => Some(required(&req.invite_token, "inviteToken")?.to_string()),
            RegistrationType::SchoolAdmin | RegistrationType::Teacher => None,
        };

        if self.email_exists(&email).await? {
            return Err(AppError::DuplicateEmail);
        }

        let password_hash = crypto::hash_password(password)?;

        let account = match req.registration_type {
            RegistrationType::SchoolAdmin => {
                let school_name = school_name.unwrap_or_default();
                self.create_with_school(&email, &name, &password_hash, Role::Admin, &school_name)
                    .await?
            }
            RegistrationType::Teacher => {
                let school_name = format!("{}'s Classroom", name);
                self.create_with_school(&email, &name, &password_hash, Role::Teacher, &school_name)
                    .await?
            }
            RegistrationType::Invite => {
                let token = invite_token.unwrap_or_default();
                self.create_from_invite(&email, &name, &password_hash, &token)
                    .await?
            }
        };

        tracing::info!(
            account_id = %account.id,
            role = %account.role,
            school_id = ?account.school_id,
            registration_type = ?req.registration_type,
            "Account registered"
        );

        Ok(account)
    }

    /// Create a school and its owning account in one transaction
    async fn create_with_school(
        &self,
        email: &str,
        name: &str,
        password_hash: &str,
        role: Role,
        school_name: &str,
    ) -> AppResult<Account> {
        let now = Utc::now();
        let school_id = Uuid::new_v4().to_string();

        let mut tx = self.db.begin().await?;

        sqlx::query("INSERT INTO school (id, name, created_at) VALUES (?1, ?2, ?3)")
            .bind(&school_id)
            .bind(school_name)
            .bind(now)
            .execute(&mut *tx)
            .await?;

        let account =
            insert_account(&mut tx, email, name, password_hash, role, Some(&school_id)).await?;

        tx.commit().await?;

        Ok(account)
    }

    /// Create an account from an invite and consume the invite atomically
    async fn create_from_invite(
        &self,
        email: &str,
        name: &str,
        password_hash: &str,
        token: &str,
    ) -> AppResult<Account> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let row = sqlx::query("SELECT * FROM invite WHERE token = ?1")
            .bind(token)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(AppError::InvalidToken)?;
        let invite = Invite::from_row(&row)?;

        invite.ensure_usable(now)?;

        if !invite.email.eq_ignore_ascii_case(email) {
            return Err(AppError::EmailMismatch);
        }

        let account = insert_account(
            &mut tx,
            email,
            name,
            password_hash,
            invite.role,
            Some(&invite.school_id),
        )
        .await?;

        let result = sqlx::query(
            "UPDATE invite SET used = 1, used_at = ?1 WHERE id = ?2 AND used = 0",
        )
        .bind(now)
        .bind(&invite.id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // Consumed by a concurrent registration; dropping tx rolls back the account
            return Err(AppError::TokenUsed);
        }

        tx.commit().await?;

        tracing::info!(invite_id = %invite.id, school_id = %invite.school_id, "Invite consumed");

        Ok(account)
    }

    /// Authenticate by email and password
    pub async fn login(&self, email: Option<&str>, password: Option<&str>) -> AppResult<Account> {
        let email = email
            .map(normalize_email)
            .filter(|e| !e.is_empty())
            .ok_or(AppError::MissingField("email"))?;
        let password = password
            .filter(|p| !p.is_empty())
            .ok_or(AppError::MissingField("password"))?;

        let account = self
            .get_account_by_email(&email)
            .await?
            .ok_or_else(|| AppError::Authentication("Invalid credentials".to_string()))?;

        if !crypto::verify_password(password, &account.password_hash)? {
            tracing::debug!(account_id = %account.id, "Login rejected: wrong password");
            return Err(AppError::Authentication("Invalid credentials".to_string()));
        }

        if !account.is_active {
            return Err(AppError::AccountDisabled);
        }

        Ok(account)
    }

    /// Issue a session token for an account
    pub fn issue_session(&self, account: &Account) -> AppResult<String> {
        session::issue_token(
            account,
            &self.config.authentication.jwt_secret,
            Duration::days(self.config.authentication.session_ttl_days),
        )
    }

    /// Validate a session token and return its claims
    pub fn validate_session(&self, token: &str) -> AppResult<SessionClaims> {
        session::verify_token(token, &self.config.authentication.jwt_secret)
    }

    /// Get account by id
    pub async fn get_account(&self, id: &str) -> AppResult<Account> {
        let row = sqlx::query(&format!("SELECT {} FROM account WHERE id = ?1", ACCOUNT_COLUMNS))
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("Account not found".to_string()))?;

        Account::from_row(&row)
    }

    /// Get account by (normalized) email
    pub async fn get_account_by_email(&self, email: &str) -> AppResult<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM account WHERE email = ?1",
            ACCOUNT_COLUMNS
        ))
        .bind(normalize_email(email))
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(Account::from_row).transpose()
    }

    /// Get school by id
    pub async fn get_school(&self, id: &str) -> AppResult<School> {
        let row = sqlx::query("SELECT id, name, created_at FROM school WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.db)
            .await?
            .ok_or_else(|| AppError::NotFound("School not found".to_string()))?;

        School::from_row(&row)
    }

    /// Check if email exists
    pub async fn email_exists(&self, email: &str) -> AppResult<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM account WHERE email = ?1")
            .bind(normalize_email(email))
            .fetch_one(&self.db)
            .await?;

        Ok(count > 0)
    }

    /// Activate or deactivate an account in the admin's school
    pub async fn set_active(
        &self,
        admin: &Account,
        account_id: &str,
        is_active: bool,
    ) -> AppResult<Account> {
        let school_id = admin
            .school_id
            .as_deref()
            .ok_or_else(|| AppError::Authorization("Admin is not attached to a school".to_string()))?;

        if admin.id == account_id && !is_active {
            return Err(AppError::Validation(
                "Cannot deactivate your own account".to_string(),
            ));
        }

        let target = self.get_account(account_id).await?;
        if target.school_id.as_deref() != Some(school_id) {
            return Err(AppError::Authorization(
                "Account belongs to another school".to_string(),
            ));
        }

        sqlx::query("UPDATE account SET is_active = ?1 WHERE id = ?2")
            .bind(is_active)
            .bind(account_id)
            .execute(&self.db)
            .await?;

        tracing::info!(admin_id = %admin.id, account_id, is_active, "Account activation changed");

        self.get_account(account_id).await
    }

    // ==================== Bulk import ====================

    /// Create accounts for imported rows, each with a password-setup token
    ///
    /// Rows are independent: a bad or duplicate row is skipped and reported
    /// without affecting the others. Each created account and its token are
    /// written in one transaction.
    pub async fn import_accounts(
        &self,
        school_id: &str,
        rows: Vec<ImportRow>,
    ) -> AppResult<Vec<ImportOutcome>> {
        let mut outcomes = Vec::with_capacity(rows.len());

        for (index, row) in rows.into_iter().enumerate() {
            let row_number = index + 1;
            let email = row.email.as_deref().map(normalize_email);

            match self.import_one(school_id, &row).await {
                Ok((account, setup_token)) => outcomes.push(ImportOutcome::Created {
                    account,
                    setup_token,
                }),
                Err(e) if e.status().is_server_error() => return Err(e),
                Err(e) => {
                    tracing::debug!(row = row_number, reason = %e, "Import row skipped");
                    outcomes.push(ImportOutcome::Skipped {
                        row: row_number,
                        email,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(outcomes)
    }

    async fn import_one(&self, school_id: &str, row: &ImportRow) -> AppResult<(Account, String)> {
        let name = required(&row.name, "name")?.to_string();
        let email = normalize_email(required(&row.email, "email")?);
        if !email.validate_email() {
            return Err(AppError::Validation("Invalid email format".to_string()));
        }

        let role = match row.role.as_deref().map(str::trim).filter(|r| !r.is_empty()) {
            Some(role) => Role::from_str(role)?,
            None => Role::Student,
        };
        if role.can_administer_school() {
            return Err(AppError::Validation(
                "Admins cannot be created by import; send an invite instead".to_string(),
            ));
        }

        if self.email_exists(&email).await? {
            return Err(AppError::DuplicateEmail);
        }

        // The account cannot log in until its owner sets a password
        let placeholder_hash = crypto::hash_password(&crypto::generate_token())?;

        let mut tx = self.db.begin().await?;
        let account =
            insert_account(&mut tx, &email, &name, &placeholder_hash, role, Some(school_id)).await?;
        let token = insert_password_token(&mut tx, &account.id, TokenPurpose::SetupPassword).await?;
        tx.commit().await?;

        tracing::info!(account_id = %account.id, school_id, role = %role, "Imported account");

        Ok((account, token))
    }

    // ==================== Password tokens ====================

    /// Look up a setup token without consuming it
    pub async fn validate_setup_token(&self, token: Option<&str>) -> AppResult<MaskedIdentity> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AppError::MissingField("token"))?;

        let record = self.get_password_token(token, TokenPurpose::SetupPassword).await?;
        record.ensure_usable(Utc::now())?;

        let account = self.get_account(&record.account_id).await?;

        Ok(MaskedIdentity {
            name: account.name,
            email: mask_email(&account.email),
            expires_at: record.expires_at,
        })
    }

    /// Set the first password of an imported account
    pub async fn setup_password(&self, token: Option<&str>, password: Option<&str>) -> AppResult<()> {
        self.set_password_with_token(token, password, TokenPurpose::SetupPassword)
            .await
    }

    /// Issue a forgot-password token if an active account has this email
    ///
    /// Returns `None` for unknown or inactive accounts so callers can respond
    /// identically either way.
    pub async fn request_password_reset(
        &self,
        email: Option<&str>,
    ) -> AppResult<Option<(Account, String)>> {
        let email = email
            .map(normalize_email)
            .filter(|e| !e.is_empty())
            .ok_or(AppError::MissingField("email"))?;

        let account = match self.get_account_by_email(&email).await? {
            Some(account) if account.is_active => account,
            _ => return Ok(None),
        };

        let mut tx = self.db.begin().await?;
        let token = insert_password_token(&mut tx, &account.id, TokenPurpose::ResetPassword).await?;
        tx.commit().await?;

        tracing::info!(account_id = %account.id, "Password reset requested");

        Ok(Some((account, token)))
    }

    /// Reset a password with a forgot-password token
    pub async fn reset_password(&self, token: Option<&str>, password: Option<&str>) -> AppResult<()> {
        self.set_password_with_token(token, password, TokenPurpose::ResetPassword)
            .await
    }

    /// Consume a password token and store the new password atomically
    async fn set_password_with_token(
        &self,
        token: Option<&str>,
        password: Option<&str>,
        purpose: TokenPurpose,
    ) -> AppResult<()> {
        let token = token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AppError::MissingField("token"))?;
        let password = password
            .filter(|p| !p.is_empty())
            .ok_or(AppError::MissingField("password"))?;

        if password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(AppError::Validation(format!(
                "Password must be at least {} characters",
                MIN_PASSWORD_LENGTH
            )));
        }

        let record = self.get_password_token(token, purpose).await?;
        let now = Utc::now();
        record.ensure_usable(now)?;

        let password_hash = crypto::hash_password(password)?;

        let mut tx = self.db.begin().await?;

        let result = sqlx::query(
            "UPDATE password_token SET used_at = ?1 WHERE token = ?2 AND used_at IS NULL",
        )
        .bind(now)
        .bind(token)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::TokenUsed);
        }

        sqlx::query("UPDATE account SET password_hash = ?1 WHERE id = ?2")
            .bind(&password_hash)
            .bind(&record.account_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(account_id = %record.account_id, purpose = purpose.as_str(), "Password set from token");

        Ok(())
    }

    async fn get_password_token(&self, token: &str, purpose: TokenPurpose) -> AppResult<PasswordToken> {
        let row = sqlx::query(
            r#"
            SELECT token, account_id, expires_at, used_at, created_at
            FROM password_token
            WHERE token = ?1 AND purpose = ?2
            "#,
        )
        .bind(token)
        .bind(purpose.as_str())
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::InvalidToken)?;

        PasswordToken::from_row(&row)
    }
}

/// Insert an account row inside a transaction
async fn insert_account(
    tx: &mut Transaction<'_, Sqlite>,
    email: &str,
    name: &str,
    password_hash: &str,
    role: Role,
    school_id: Option<&str>,
) -> AppResult<Account> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    sqlx::query(
        "INSERT INTO account (id, email, name, password_hash, role, school_id, is_active, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )
    .bind(&id)
    .bind(email)
    .bind(name)
    .bind(password_hash)
    .bind(role.as_str())
    .bind(school_id)
    .bind(true)
    .bind(now)
    .execute(&mut **tx)
    .await
    .map_err(|e| match e {
        // Lost a race with a concurrent registration for the same email
        sqlx::Error::Database(ref db) if db.is_unique_violation() => AppError::DuplicateEmail,
        e => AppError::Database(e),
    })?;

    Ok(Account {
        id,
        email: email.to_string(),
        name: name.to_string(),
        password_hash: password_hash.to_string(),
        role,
        school_id: school_id.map(str::to_string),
        is_active: true,
        created_at: now,
    })
}

/// Insert a single-use password token inside a transaction
async fn insert_password_token(
    tx: &mut Transaction<'_, Sqlite>,
    account_id: &str,
    purpose: TokenPurpose,
) -> AppResult<String> {
    let token = crypto::generate_token();
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO password_token (token, account_id, purpose, expires_at, used_at, created_at)
        VALUES (?1, ?2, ?3, ?4, NULL, ?5)
        "#,
    )
    .bind(&token)
    .bind(account_id)
    .bind(purpose.as_str())
    .bind(now + purpose.lifetime())
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(token)
}

/// Trimmed, non-empty field or `MissingField`
fn required<'a>(value: &'a Option<String>, field: &'static str) -> AppResult<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(AppError::MissingField(field))
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Mask the local part of an email for display: `jane@example.com` -> `j***@example.com`
pub fn mask_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) => {
            let first: String = local.chars().take(1).collect();
            format!("{}***@{}", first, domain)
        }
        None => "***".to_string(),
    }
}
