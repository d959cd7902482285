mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use duo_api::identity::GoogleVerifier;
use duo_api::storage::ObjectStore;
use duo_api::{AppState, AppStateInner};
use duo_db::Database;
use duo_gateway::Dispatcher;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "duo=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database and object storage
    let db = Arc::new(Database::open(&config.db_path)?);
    let store = ObjectStore::new(config.storage_dir.clone()).await?;

    let state: AppState = Arc::new(AppStateInner {
        dispatcher: Dispatcher::new(db.clone()),
        db,
        store,
        identity: GoogleVerifier::new(
            config.google_tokeninfo_url.clone(),
            config.google_client_id.clone(),
        ),
        jwt_secret: config.jwt_secret.clone(),
        public_url: config.public_url.clone(),
        invite_base: config.invite_base.clone(),
        call_base: config.call_base.clone(),
        max_upload_bytes: config.max_upload_bytes,
    });

    // Prune abandoned upload sessions
    tokio::spawn(duo_api::cleanup::run_cleanup_loop(
        state.clone(),
        Duration::from_secs(config.cleanup_interval_secs),
        Duration::from_secs(config.upload_ttl_secs),
    ));
    info!(
        "Upload cleanup every {}s, TTL {}s",
        config.cleanup_interval_secs, config.upload_ttl_secs
    );

    let app = duo_api::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Duo server listening on {}", addr);
    info!("Max upload size: {} bytes", config.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
