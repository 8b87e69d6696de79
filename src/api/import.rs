/// Bulk account import
use crate::{
    api::middleware::ApiJson,
    account::{ImportOutcome, ImportRequest},
    auth::AdminAuthContext,
    context::AppContext,
    db::models::AccountView,
    error::AppResult,
};
use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

pub fn routes() -> Router<AppContext> {
    Router::new().route("/import/accounts", post(import_accounts))
}

/// One created account
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedAccount {
    pub account: AccountView,
    /// Present when the setup email was not delivered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub setup_link: Option<String>,
}

/// One rejected row (1-based)
#[derive(Debug, Serialize, Deserialize)]
pub struct SkippedRow {
    pub row: usize,
    pub email: Option<String>,
    pub reason: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportReport {
    pub created: Vec<ImportedAccount>,
    pub skipped: Vec<SkippedRow>,
}

/// Create accounts in the admin's school and send each a setup link
async fn import_accounts(
    State(ctx): State<AppContext>,
    admin: AdminAuthContext,
    ApiJson(req): ApiJson<ImportRequest>,
) -> AppResult<Json<ImportReport>> {
    let outcomes = ctx
        .account_manager
        .import_accounts(&admin.school_id, req.accounts)
        .await?;

    let mut report = ImportReport {
        created: Vec::new(),
        skipped: Vec::new(),
    };

    for outcome in outcomes {
        match outcome {
            ImportOutcome::Created {
                account,
                setup_token,
            } => {
                let delivered = ctx
                    .mailer
                    .send_setup_password_email(&account.email, &account.name, &setup_token)
                    .await;
                report.created.push(ImportedAccount {
                    account: AccountView::from(&account),
                    setup_link: (!delivered).then(|| ctx.mailer.setup_link(&setup_token)),
                });
            }
            ImportOutcome::Skipped { row, email, reason } => {
                report.skipped.push(SkippedRow { row, email, reason });
            }
        }
    }

    tracing::info!(
        school_id = %admin.school_id,
        created = report.created.len(),
        skipped = report.skipped.len(),
        "Bulk import finished"
    );

    Ok(Json(report))
}
