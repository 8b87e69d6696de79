/// Invite endpoints
use crate::{
    api::middleware::ApiJson,
    auth::AdminAuthContext,
    context::AppContext,
    error::AppResult,
    invites::{CreateInviteRequest, CreateInviteResponse, InviteSummary, InviteView},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::json;

/// Build invite routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/invites", post(create_invite).get(list_invites))
        .route("/invites/validate/:token", get(validate_invite))
        .route("/invites/:id", delete(revoke_invite))
}

/// Create an invite and email it; the link is returned when the email was not sent
async fn create_invite(
    State(ctx): State<AppContext>,
    admin: AdminAuthContext,
    ApiJson(req): ApiJson<CreateInviteRequest>,
) -> AppResult<(StatusCode, Json<CreateInviteResponse>)> {
    let invite = ctx
        .invite_manager
        .create_invite(&admin.account, req.email.as_deref(), req.role.as_deref())
        .await?;

    let school = ctx.account_manager.get_school(&admin.school_id).await?;
    let delivered = ctx
        .mailer
        .send_invite_email(&invite.email, &school.name, invite.role.as_str(), &invite.token)
        .await;

    Ok((
        StatusCode::CREATED,
        Json(CreateInviteResponse {
            invite: InviteView::new(&invite, Utc::now()),
            invite_link: (!delivered).then(|| ctx.mailer.invite_link(&invite.token)),
        }),
    ))
}

async fn list_invites(
    State(ctx): State<AppContext>,
    admin: AdminAuthContext,
) -> AppResult<Json<Vec<InviteView>>> {
    let now = Utc::now();
    let invites = ctx.invite_manager.list_invites(&admin.account).await?;

    Ok(Json(
        invites
            .iter()
            .map(|invite| InviteView::new(invite, now))
            .collect(),
    ))
}

/// Read-only check used by the registration page
async fn validate_invite(
    State(ctx): State<AppContext>,
    Path(token): Path<String>,
) -> AppResult<Json<InviteSummary>> {
    Ok(Json(ctx.invite_manager.validate_invite(&token).await?))
}

async fn revoke_invite(
    State(ctx): State<AppContext>,
    admin: AdminAuthContext,
    Path(invite_id): Path<String>,
) -> AppResult<Json<serde_json::Value>> {
    ctx.invite_manager
        .revoke_invite(&admin.account, &invite_id)
        .await?;

    Ok(Json(json!({ "success": true })))
}
