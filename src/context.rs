/// Application context and dependency injection
use crate::{
    account::AccountManager,
    billing::{BillingManager, HttpPaymentProvider, PaymentProvider},
    config::ServerConfig,
    db,
    error::{AppError, AppResult},
    invites::InviteManager,
    mailer::Mailer,
};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub account_manager: Arc<AccountManager>,
    pub invite_manager: Arc<InviteManager>,
    pub billing_manager: Arc<BillingManager>,
    pub mailer: Arc<Mailer>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> AppResult<Self> {
        // Validate configuration
        config.validate()?;

        // Create data directories if they don't exist
        Self::ensure_directories(&config).await?;

        // Open the database and apply migrations
        let pool = db::create_pool(&config.storage.database, db::DatabaseOptions::default()).await?;
        db::run_migrations(&pool).await?;
        db::test_connection(&pool).await?;

        let provider: Arc<dyn PaymentProvider> = Arc::new(HttpPaymentProvider::new(&config.billing)?);

        Self::with_parts(config, pool, provider)
    }

    /// Assemble the context from an open pool and a payment provider
    pub fn with_parts(
        config: ServerConfig,
        pool: SqlitePool,
        provider: Arc<dyn PaymentProvider>,
    ) -> AppResult<Self> {
        let config = Arc::new(config);

        let account_manager = Arc::new(AccountManager::new(pool.clone(), config.clone()));
        let invite_manager = Arc::new(InviteManager::new(pool.clone()));
        let billing_manager = Arc::new(BillingManager::new(pool.clone(), provider, &config.billing));
        let mailer = Arc::new(Mailer::new(
            config.email.clone(),
            &config.service.app_base_url,
        )?);

        if !mailer.is_configured() {
            tracing::warn!("SMTP not configured; invite and password links will be returned in responses");
        }

        Ok(Self {
            config,
            db: pool,
            account_manager,
            invite_manager,
            billing_manager,
            mailer,
        })
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> AppResult<()> {
        if config.storage.database == Path::new(":memory:") {
            return Ok(());
        }

        let dir = &config.storage.data_directory;
        if !dir.exists() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                AppError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
            })?;
        }

        Ok(())
    }

    /// Get service URL
    pub fn service_url(&self) -> String {
        format!(
            "http://{}:{}",
            self.config.service.hostname, self.config.service.port
        )
    }
}
