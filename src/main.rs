mod api;
mod bootstrap;
mod cache;
mod config;
mod error;
mod ledger;
mod middleware;
mod notifications;
mod payments;
mod retry;
mod server;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,savings_backend=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 Starting savings backend");

    let config = config::AppConfig::from_env()?;

    let state = bootstrap::initialize_app_state(&config).await?;

    let app = server::create_app(state, &config);

    server::run_server(app, &config.bind_address).await?;

    info!("👋 Server stopped");
    Ok(())
}
