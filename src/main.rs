//! crud-starter - HTTP API server

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crud_starter::{
    api::{self, AppState},
    cache::create_cache,
    config::{Config, LogFormat},
    db,
};

const DEFAULT_CONFIG_PATH: &str = "config.yml";
const LIMITER_CLEANUP_SECS: u64 = 300;

fn init_tracing(config: &Config) {
    let level = &config.logging.log_level;
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("crud_starter={level},tower_http={level}").into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    match config.logging.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::var("CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = Config::load_with_env(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;
    config.validate().context("Invalid configuration")?;

    init_tracing(&config);
    tracing::info!(
        environment = ?config.app.environment,
        "Starting {} v{}",
        config.app.name,
        config.app.version
    );

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    // Initialize cache
    let cache = create_cache(&config.cache).await?;
    tracing::info!("Cache initialized: {:?}", config.cache.driver);

    let addr = config.bind_address();
    let state = AppState::new(config, pool.clone(), cache);

    // Sweep expired rate limiter windows every 5 minutes
    {
        let requests = state.request_limiter.clone();
        let logins = state.login_limiter.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(LIMITER_CLEANUP_SECS));
            loop {
                interval.tick().await;
                let removed = requests.cleanup().await + logins.cleanup().await;
                tracing::debug!(removed, "Rate limiter cleanup");
            }
        });
    }

    let app = api::build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    pool.close().await;
    Ok(())
}
