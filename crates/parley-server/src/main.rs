mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_api::auth::{AppState, AppStateInner};
use parley_api::observers::{HistoryObserver, MessageObserver, NotificationObserver};
use parley_api::rate_limit::RateLimiter;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(parley_db::Database::open(&PathBuf::from(&config.db_path))?);

    // Rate limiter with a background eviction task bounding its memory
    let limiter = RateLimiter::new(config.rate_limit_per_minute, 60);
    tokio::spawn(limiter.clone().run_eviction_loop(60));

    // Observers fire synchronously after message writes commit
    let observers: Vec<Arc<dyn MessageObserver>> = vec![
        Arc::new(NotificationObserver::new(db.clone())),
        Arc::new(HistoryObserver::new(db.clone())),
    ];

    let state: AppState = Arc::new(AppStateInner {
        db,
        jwt_secret: config.jwt_secret.clone(),
        observers,
        limiter,
    });

    let app = parley_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
