/// Registration, login and password token endpoints
use crate::{
    api::middleware::ApiJson,
    account::{
        ForgotPasswordRequest, LoginRequest, MaskedIdentity, RegisterRequest, SessionResponse,
        SetPasswordRequest, TokenRequest,
    },
    auth::AuthContext,
    context::AppContext,
    db::models::AccountView,
    error::AppResult,
};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

/// Build auth routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
        .route("/auth/validate-setup-token", post(validate_setup_token))
        .route("/auth/setup-password", post(setup_password))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
}

/// Register endpoint
async fn register(
    State(ctx): State<AppContext>,
    ApiJson(req): ApiJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<SessionResponse>)> {
    let account = ctx.account_manager.register(req).await?;
    let token = ctx.account_manager.issue_session(&account)?;

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            token,
            account: AccountView::from(&account),
        }),
    ))
}

/// Login endpoint
async fn login(
    State(ctx): State<AppContext>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> AppResult<Json<SessionResponse>> {
    let account = ctx
        .account_manager
        .login(req.email.as_deref(), req.password.as_deref())
        .await?;
    let token = ctx.account_manager.issue_session(&account)?;

    tracing::info!(account_id = %account.id, "Login succeeded");

    Ok(Json(SessionResponse {
        token,
        account: AccountView::from(&account),
    }))
}

/// Current account
async fn me(auth: AuthContext) -> Json<AccountView> {
    Json(AccountView::from(&auth.account))
}

async fn validate_setup_token(
    State(ctx): State<AppContext>,
    ApiJson(req): ApiJson<TokenRequest>,
) -> AppResult<Json<MaskedIdentity>> {
    let identity = ctx
        .account_manager
        .validate_setup_token(req.token.as_deref())
        .await?;

    Ok(Json(identity))
}

async fn setup_password(
    State(ctx): State<AppContext>,
    ApiJson(req): ApiJson<SetPasswordRequest>,
) -> AppResult<Json<serde_json::Value>> {
    ctx.account_manager
        .setup_password(req.token.as_deref(), req.password.as_deref())
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Password set. You can now log in."
    })))
}

/// Forgot password: the response is identical whether or not the account exists
async fn forgot_password(
    State(ctx): State<AppContext>,
    ApiJson(req): ApiJson<ForgotPasswordRequest>,
) -> AppResult<Json<serde_json::Value>> {
    if let Some((account, token)) = ctx
        .account_manager
        .request_password_reset(req.email.as_deref())
        .await?
    {
        let delivered = ctx
            .mailer
            .send_password_reset_email(&account.email, &account.name, &token)
            .await;
        if !delivered {
            tracing::warn!(account_id = %account.id, "Password reset email not delivered");
        }
    }

    Ok(Json(json!({
        "success": true,
        "message": "If an account exists for that email, a reset link has been sent."
    })))
}

async fn reset_password(
    State(ctx): State<AppContext>,
    ApiJson(req): ApiJson<SetPasswordRequest>,
) -> AppResult<Json<serde_json::Value>> {
    ctx.account_manager
        .reset_password(req.token.as_deref(), req.password.as_deref())
        .await?;

    Ok(Json(json!({
        "success": true,
        "message": "Password has been reset."
    })))
}
