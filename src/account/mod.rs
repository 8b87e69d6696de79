/// Account management system
///
/// Handles registration (school admin, independent teacher, invited member),
/// login, session tokens, and the single-use password tokens used by bulk
/// import and forgot-password.

mod manager;
mod role;
pub mod session;

pub use manager::{mask_email, AccountManager, ImportOutcome};
pub use role::Role;
pub use session::SessionClaims;

use crate::db::models::AccountView;
use serde::{Deserialize, Serialize};

/// Which registration branch to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationType {
    /// New school plus its first admin
    SchoolAdmin,
    /// Member joining a school through an invite token
    Invite,
    /// Independent teacher with a personal school; any unrecognized type lands here
    #[default]
    #[serde(other)]
    Teacher,
}

/// Registration request
///
/// Fields are optional so that absent values surface as `MissingField`
/// rather than a JSON rejection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
    #[serde(default)]
    pub registration_type: RegistrationType,
    pub school_name: Option<String>,
    pub invite_token: Option<String>,
}

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Session response for register and login
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub token: String,
    pub account: AccountView,
}

/// Token-only request (validate setup token)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRequest {
    pub token: Option<String>,
}

/// Set a password from a single-use token (setup or reset)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetPasswordRequest {
    pub token: Option<String>,
    pub password: Option<String>,
}

/// Forgot-password request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: Option<String>,
}

/// Identity shown on the setup-password page
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaskedIdentity {
    pub name: String,
    pub email: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
}

/// One account to create through bulk import
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRow {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<String>,
}

/// Bulk import request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRequest {
    pub accounts: Vec<ImportRow>,
}

/// Activation toggle request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetActiveRequest {
    pub is_active: bool,
}
