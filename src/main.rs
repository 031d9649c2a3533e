use std::sync::Arc;

use lireddit::config::Config;
use lireddit::redis::RedisClient;
use lireddit::store::PgStore;
use lireddit::{AppState, create_app};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lireddit=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    let store = PgStore::connect(&config.database_url).await?;
    tracing::info!("Database connection pool created");

    store.run_migrations().await?;
    tracing::info!("Database migrations completed");

    let redis = RedisClient::new(&config.redis_url).await?;
    tracing::info!("Redis client created");

    let addr = format!("{}:{}", config.host, config.port);
    let app = create_app(AppState::new(store, Arc::new(redis), config));

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
