/// Schoolhouse
///
/// Multi-tenant school management server: account onboarding (school
/// admins, independent teachers, invited members, bulk-imported accounts)
/// and subscription billing reconciled against a payment provider.

pub mod account;
pub mod api;
pub mod auth;
pub mod billing;
pub mod config;
pub mod context;
pub mod crypto;
pub mod db;
pub mod error;
pub mod invites;
pub mod mailer;
pub mod server;

#[cfg(test)]
pub(crate) mod test_support {
    use crate::{
        billing::PlanTable,
        config::{
            AuthConfig, BillingConfig, LoggingConfig, ServerConfig, ServiceConfig, StorageConfig,
        },
    };
    use sqlx::SqlitePool;
    use std::path::PathBuf;

    pub fn test_config() -> ServerConfig {
        ServerConfig {
            service: ServiceConfig {
                hostname: "127.0.0.1".to_string(),
                port: 5000,
                app_base_url: "http://localhost:3000".to_string(),
            },
            storage: StorageConfig {
                data_directory: PathBuf::from("./data"),
                database: PathBuf::from(":memory:"),
            },
            authentication: AuthConfig {
                jwt_secret: "test-secret-key-for-testing-only-32chars".to_string(),
                session_ttl_days: 7,
            },
            email: None,
            billing: BillingConfig {
                secret_key: "sk_test_webhook_secret".to_string(),
                api_base_url: "http://127.0.0.1:9".to_string(),
                callback_url: "http://localhost:3000/billing/callback".to_string(),
                plans: PlanTable::default(),
            },
            logging: LoggingConfig {
                level: "debug".to_string(),
                format: "pretty".to_string(),
            },
        }
    }

    pub async fn test_pool() -> SqlitePool {
        crate::db::connect_in_memory()
            .await
            .expect("in-memory database")
    }
}
