/// School account administration
use crate::{
    api::middleware::ApiJson,
    account::SetActiveRequest, auth::AdminAuthContext, context::AppContext,
    db::models::AccountView, error::AppResult,
};
use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};

pub fn routes() -> Router<AppContext> {
    Router::new().route("/accounts/:id/active", post(set_active))
}

/// Activate or deactivate an account in the admin's school
async fn set_active(
    State(ctx): State<AppContext>,
    admin: AdminAuthContext,
    Path(account_id): Path<String>,
    ApiJson(req): ApiJson<SetActiveRequest>,
) -> AppResult<Json<AccountView>> {
    let account = ctx
        .account_manager
        .set_active(&admin.account, &account_id, req.is_active)
        .await?;

    Ok(Json(AccountView::from(&account)))
}
