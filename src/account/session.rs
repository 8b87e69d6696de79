/// Signed session tokens
///
/// Sessions are stateless HS256 JWTs with a fixed lifetime. There is no
/// refresh or server-side revocation; expiry forces a new login.
use crate::{
    account::Role,
    db::models::Account,
    error::{AppError, AppResult},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Claims embedded in a session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Account id
    pub sub: String,
    pub role: Role,
    pub school_id: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Issue a session token for an account
pub fn issue_token(account: &Account, secret: &str, ttl: Duration) -> AppResult<String> {
    let now = Utc::now();
    let claims = SessionClaims {
        sub: account.id.clone(),
        role: account.role,
        school_id: account.school_id.clone(),
        iat: now.timestamp(),
        exp: (now + ttl).timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Jwt(format!("Failed to generate token: {}", e)))
}

/// Verify a session token's signature and expiry
pub fn verify_token(token: &str, secret: &str) -> AppResult<SessionClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = 0;

    decode::<SessionClaims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map(|data| data.claims)
        .map_err(|e| {
            tracing::debug!("Session token rejected: {}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    AppError::Authentication("Session has expired".to_string())
                }
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    AppError::Authentication("Invalid token signature".to_string())
                }
                _ => AppError::Authentication("Invalid session token".to_string()),
            }
        })
}
