/// Configuration management for the Schoolhouse server
use crate::{
    billing::PlanTable,
    error::{AppError, AppResult},
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub authentication: AuthConfig,
    pub email: Option<EmailConfig>,
    pub billing: BillingConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    /// Public URL of the web app, used to build invite and password links
    pub app_base_url: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    /// SQLite database file, or `:memory:`
    pub database: PathBuf,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    /// Session token lifetime in days
    pub session_ttl_days: i64,
}

/// Email configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_url: String,
    pub from_address: String,
}

/// Payment provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    /// Provider secret key; also the webhook signing secret
    pub secret_key: String,
    pub api_base_url: String,
    /// Where the provider sends the user after checkout
    pub callback_url: String,
    pub plans: PlanTable,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `pretty`
    pub format: String,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        dotenv::dotenv().ok();

        let hostname = env::var("SCHOOLHOUSE_HOSTNAME").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("SCHOOLHOUSE_PORT")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()
            .map_err(|_| AppError::Validation("Invalid port number".to_string()))?;
        let app_base_url = env::var("SCHOOLHOUSE_APP_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .trim_end_matches('/')
            .to_string();

        let data_directory: PathBuf = env::var("SCHOOLHOUSE_DATA_DIRECTORY")
            .unwrap_or_else(|_| "./data".to_string())
            .into();
        let database = env::var("SCHOOLHOUSE_DATABASE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("schoolhouse.sqlite"));

        let jwt_secret = env::var("SCHOOLHOUSE_JWT_SECRET")
            .map_err(|_| AppError::Validation("JWT secret required".to_string()))?;
        let session_ttl_days = env::var("SCHOOLHOUSE_SESSION_TTL_DAYS")
            .unwrap_or_else(|_| "7".to_string())
            .parse()
            .unwrap_or(7);

        let email = if let Ok(smtp_url) = env::var("SCHOOLHOUSE_SMTP_URL") {
            Some(EmailConfig {
                smtp_url,
                from_address: env::var("SCHOOLHOUSE_EMAIL_FROM_ADDRESS")
                    .unwrap_or_else(|_| "noreply@schoolhouse.local".to_string()),
            })
        } else {
            None
        };

        let secret_key = env::var("PAYSTACK_SECRET_KEY")
            .map_err(|_| AppError::Validation("Payment provider secret key required".to_string()))?;
        let api_base_url = env::var("PAYSTACK_API_BASE_URL")
            .unwrap_or_else(|_| "https://api.paystack.co".to_string())
            .trim_end_matches('/')
            .to_string();
        let callback_url = env::var("SCHOOLHOUSE_BILLING_CALLBACK_URL")
            .unwrap_or_else(|_| format!("{}/billing/callback", app_base_url));
        let plans = match env::var("SCHOOLHOUSE_BILLING_PLANS") {
            Ok(json) => PlanTable::from_json(&json)?,
            Err(_) => PlanTable::default(),
        };

        let log_level = env::var("RUST_LOG")
            .unwrap_or_else(|_| "schoolhouse=debug,tower_http=debug".to_string());
        let log_format = env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                app_base_url,
            },
            storage: StorageConfig {
                data_directory,
                database,
            },
            authentication: AuthConfig {
                jwt_secret,
                session_ttl_days,
            },
            email,
            billing: BillingConfig {
                secret_key,
                api_base_url,
                callback_url,
                plans,
            },
            logging: LoggingConfig {
                level: log_level,
                format: log_format,
            },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> AppResult<()> {
        if self.service.hostname.is_empty() {
            return Err(AppError::Validation("Hostname cannot be empty".to_string()));
        }

        if self.authentication.jwt_secret.len() < 32 {
            return Err(AppError::Validation(
                "JWT secret must be at least 32 characters".to_string(),
            ));
        }

        if self.authentication.session_ttl_days <= 0 {
            return Err(AppError::Validation(
                "Session lifetime must be positive".to_string(),
            ));
        }

        if self.billing.plans.is_empty() {
            return Err(AppError::Validation("Billing plan table is empty".to_string()));
        }

        Ok(())
    }
}
