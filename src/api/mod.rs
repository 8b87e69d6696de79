/// API routes and handlers
pub mod accounts;
pub mod auth;
pub mod billing;
pub mod health;
pub mod import;
pub mod invites;
pub mod middleware;

use crate::context::AppContext;
use axum::Router;

/// Build API routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .merge(health::routes())
        .merge(auth::routes())
        .merge(accounts::routes())
        .merge(invites::routes())
        .merge(import::routes())
        .merge(billing::routes())
}
