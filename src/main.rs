/// Schoolhouse server
///
/// Onboarding and billing API for multi-tenant school management.
use schoolhouse::{config::ServerConfig, context::AppContext, error::AppResult, server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> AppResult<()> {
    // Load configuration (also reads .env)
    let config = ServerConfig::from_env()?;

    // Initialize logging
    let filter = EnvFilter::try_new(&config.logging.level)
        .unwrap_or_else(|_| "schoolhouse=debug,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format.eq_ignore_ascii_case("json") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    print_banner();

    tracing::info!(
        database = %config.storage.database.display(),
        email_enabled = config.email.is_some(),
        plans = ?config.billing.plans,
        "Configuration loaded"
    );

    // Create application context
    let ctx = AppContext::new(config).await?;

    // Start server
    server::serve(ctx).await?;

    Ok(())
}

fn print_banner() {
    println!(
        r#"
   ____      _                 _ _
  / ___|  __| |__   ___   ___ | | |__   ___  _   _ ___  ___
  \___ \ / __| '_ \ / _ \ / _ \| | '_ \ / _ \| | | / __|/ _ \
   ___) | (__| | | | (_) | (_) | | | | | (_) | |_| \__ \  __/
  |____/ \___|_| |_|\___/ \___/|_|_| |_|\___/ \__,_|___/\___|

        Onboarding & Billing Server v{}
        "#,
        env!("CARGO_PKG_VERSION")
    );
}
