use axum::{
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, trace::TraceLayer};
use tracing::{error, info};

use crate::{
    api::handlers::{
        get_annual_statement, get_member_ledger, get_member_summary, get_pending_notifications,
        get_quarterly_interest, health_check, initialize_payment, verify_payment, AppState,
    },
    config::AppConfig,
    middleware::{create_cors_layer, rate_limit_middleware, RateLimitLayer},
};

pub fn create_app(state: AppState, config: &AppConfig) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let rate_limit = RateLimitLayer::per_minute(config.rate_limit_per_minute);

    let payments = Router::new()
        .route("/initialize", post(initialize_payment))
        .route("/verify/:reference", get(verify_payment))
        .layer(from_fn_with_state(rate_limit, rate_limit_middleware));

    let members = Router::new()
        .route("/:member_id/ledger", get(get_member_ledger))
        .route("/:member_id/summary", get(get_member_summary))
        .route("/:member_id/statement/:year", get(get_annual_statement))
        .route("/:member_id/interest", get(get_quarterly_interest))
        .route("/:member_id/notifications", get(get_pending_notifications));

    let app = Router::new()
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                .nest("/payments", payments)
                .nest("/members", members),
        )
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(create_cors_layer(&config.allowed_origins))
                .layer(CompressionLayer::new()),
        )
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("🛑 Shutdown signal received");
}
