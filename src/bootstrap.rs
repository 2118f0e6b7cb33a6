use sqlx::{postgres::PgPoolOptions, PgPool};
use std::{sync::Arc, time::Duration};
use tracing::{error, info, warn};

use crate::{
    api::handlers::AppState,
    cache::{AttemptLimiter, InMemoryTtlCache, TtlCache},
    config::AppConfig,
    error::AppResult,
    ledger::repository::LedgerRepository,
    notifications::OutboxNotifier,
    payments::{
        gateway::{PaymentGateway, PaystackGateway},
        reconciler::{PaymentReconciler, PaymentSettings},
    },
};

pub async fn initialize_app_state(config: &AppConfig) -> AppResult<AppState> {
    info!("Initializing application components ...");

    let pool = initialize_database(&config.database_url).await?;

    let ledger = Arc::new(LedgerRepository::new(pool.clone()));
    let notifications = Arc::new(OutboxNotifier::new(pool));

    let gateway: Option<Arc<dyn PaymentGateway>> = match &config.paystack_secret_key {
        Some(secret) if !secret.trim().is_empty() => {
            let gateway = PaystackGateway::new(
                config.paystack_base_url.clone(),
                secret.clone(),
                config.gateway_timeout(),
            )?;
            info!("✅ Paystack gateway configured ({})", config.paystack_base_url);
            Some(Arc::new(gateway))
        }
        _ => {
            warn!("⚠️  PAYSTACK_SECRET_KEY not set - payment endpoints disabled");
            None
        }
    };
    let payments_configured = gateway.is_some();

    let reconciler = Arc::new(PaymentReconciler::new(
        ledger.clone(),
        gateway,
        notifications.clone(),
        PaymentSettings::from(config),
    ));
    info!(
        "✅ Payment reconciler ready ({} {} - {})",
        config.currency, config.min_payment_amount, config.max_payment_amount
    );

    let attempt_cache: Arc<InMemoryTtlCache<u32>> = Arc::new(InMemoryTtlCache::new());
    let init_limiter = Arc::new(AttemptLimiter::new(
        attempt_cache.clone(),
        config.max_init_attempts,
        config.init_window(),
    ));

    spawn_cache_sweeper(attempt_cache);

    Ok(AppState {
        ledger,
        reconciler,
        init_limiter,
        notifications,
        payments_configured,
    })
}

/// Drop expired limiter keys every minute
fn spawn_cache_sweeper(cache: Arc<dyn TtlCache<u32>>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            cache.sweep().await;
        }
    });
    info!("✅ Cache sweeper task started (every minute)");
}

async fn initialize_database(database_url: &str) -> AppResult<PgPool> {
    info!("📊 Connecting to database...");

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(30))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
        .map_err(|e| {
            error!("Database connection failed: {}", e);
            e
        })?;

    info!("✓ Database pool configured: 20 max connections");

    info!("🔄 Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;

    info!("✓ Database initialized");
    Ok(pool)
}
