/// Authentication extractors
use crate::{
    account::SessionClaims,
    api::middleware::extract_bearer_token,
    context::AppContext,
    db::models::Account,
    error::AppError,
};
use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

/// Authenticated context - validates the session token and loads the account
///
/// Deactivated accounts are refused even while their token is unexpired.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub account: Account,
    pub claims: SessionClaims,
}

#[async_trait]
impl FromRequestParts<AppContext> for AuthContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_bearer_token(&parts.headers)
            .ok_or_else(|| AppError::Authentication("Missing authorization header".to_string()))?;

        let claims = state.account_manager.validate_session(&token)?;

        let account = match state.account_manager.get_account(&claims.sub).await {
            Ok(account) => account,
            Err(AppError::NotFound(_)) => {
                return Err(AppError::Authentication("Account no longer exists".to_string()))
            }
            Err(e) => return Err(e),
        };

        if !account.is_active {
            return Err(AppError::AccountDisabled);
        }

        Ok(AuthContext { account, claims })
    }
}

/// Admin authentication context - requires the Admin role and a school
#[derive(Debug, Clone)]
pub struct AdminAuthContext {
    pub account: Account,
    pub school_id: String,
}

#[async_trait]
impl FromRequestParts<AppContext> for AdminAuthContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppContext,
    ) -> Result<Self, Self::Rejection> {
        let AuthContext { account, .. } = AuthContext::from_request_parts(parts, state).await?;

        if !account.role.can_administer_school() {
            tracing::warn!(account_id = %account.id, role = %account.role, "Admin route refused");
            return Err(AppError::Authorization("Admin role required".to_string()));
        }

        let school_id = account
            .school_id
            .clone()
            .ok_or_else(|| AppError::Authorization("Admin is not attached to a school".to_string()))?;

        Ok(AdminAuthContext { account, school_id })
    }
}
