//! Homer Enrichment Hub - guardian portal server

use anyhow::Result;
use std::net::SocketAddr;
use std::path::Path;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use homer_hub::{
    api::{self, AppState},
    config::Config,
    db::{self, DatabasePool},
};

/// How often expired sessions and stale rate-limit entries are purged
const CLEANUP_INTERVAL_SECS: u64 = 300;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "homer_hub=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Homer Enrichment Hub...");

    // Load configuration
    let config_path = std::env::var("HOMER_CONFIG").unwrap_or_else(|_| "config.yml".to_string());
    let config = Config::load_with_env(Path::new(&config_path))?;
    tracing::info!("Configuration loaded from {}", config_path);

    // Initialize database
    let pool = db::create_pool(&config.database).await?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    // Bring the schema up to date
    let pending = db::migrations::pending_count(&pool).await?;
    if pending > 0 {
        let ran = db::migrations::run_migrations(&pool).await?;
        tracing::info!("Applied {} of {} pending migration(s)", ran, pending);
    }

    if config.email.enabled {
        tracing::info!("SMTP delivery via {}", config.email.smtp_host);
    } else {
        tracing::info!("Email delivery disabled; messages will be logged");
    }
    if config.webhook.secret.is_none() {
        tracing::warn!("No webhook secret configured; email webhook signatures are not checked");
    }

    // Build application state
    let state = AppState::build(pool.clone(), &config)?;

    // Periodic cleanup of sessions and rate limiter entries
    {
        let users = state.user_service.clone();
        let limiter = state.rate_limiter.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_secs(CLEANUP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                match users.cleanup_expired_sessions().await {
                    Ok(0) => {}
                    Ok(n) => tracing::debug!("Removed {} expired session(s)", n),
                    Err(e) => tracing::warn!("Session cleanup failed: {}", e),
                }
                let purged = limiter.cleanup().await;
                if purged > 0 {
                    tracing::debug!("Purged {} rate limiter entr(ies)", purged);
                }
            }
        });
    }

    // Build router
    let app = api::build_router(state, &config.server.cors_origin);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    pool.close().await;
    Ok(())
}
