/// Billing endpoints
use crate::{
    api::middleware::{header_str, ApiJson},
    auth::AuthContext,
    billing::{
        webhook::SIGNATURE_HEADER, InitializePaymentRequest, InitializePaymentResponse,
        Subscription,
    },
    context::AppContext,
    error::AppResult,
};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

/// Build billing routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/billing/initialize", post(initialize))
        .route("/billing/verify", get(verify))
        .route("/billing/webhook", post(webhook))
        .route("/billing/cancel", post(cancel))
        .route("/billing/subscription", get(subscription))
}

#[derive(Debug, Deserialize)]
struct VerifyQuery {
    reference: Option<String>,
}

async fn initialize(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    ApiJson(req): ApiJson<InitializePaymentRequest>,
) -> AppResult<Json<InitializePaymentResponse>> {
    let initialized = ctx
        .billing_manager
        .initialize(&auth.account, req.plan.as_deref(), req.interval.as_deref())
        .await?;

    Ok(Json(InitializePaymentResponse {
        authorization_url: initialized.authorization_url,
        reference: initialized.payment.reference,
    }))
}

async fn verify(
    State(ctx): State<AppContext>,
    auth: AuthContext,
    Query(query): Query<VerifyQuery>,
) -> AppResult<Json<Subscription>> {
    let subscription = ctx
        .billing_manager
        .verify(&auth.account, query.reference.as_deref())
        .await?;

    Ok(Json(subscription))
}

/// Provider webhook; the signature covers the raw body bytes
async fn webhook(
    State(ctx): State<AppContext>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<serde_json::Value>> {
    let outcome = ctx
        .billing_manager
        .handle_webhook(&body, header_str(&headers, SIGNATURE_HEADER))
        .await?;

    tracing::debug!(outcome = ?outcome, "Webhook processed");

    Ok(Json(json!({ "received": true })))
}

async fn cancel(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> AppResult<Json<Subscription>> {
    Ok(Json(ctx.billing_manager.cancel(&auth.account).await?))
}

async fn subscription(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> AppResult<Json<Option<Subscription>>> {
    Ok(Json(ctx.billing_manager.subscription_for(&auth.account).await?))
}
