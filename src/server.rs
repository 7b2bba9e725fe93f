use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, extract::DefaultBodyLimit, routing::get};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;

use crate::api::{self, AppState};
use crate::config::Config;
use crate::db::{CaseDb, DbHandle};
use crate::notify::Notifier;
use crate::storage::BlobStore;
use crate::ws;

/// Body limit: large enough for a capped attachment plus form overhead.
const MAX_BODY_BYTES: usize = 12 * 1024 * 1024;

/// Build the full application router with API and WebSocket endpoints.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router()
        .route("/ws", get(ws::ws_handler))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Start the caseboard server and run until shutdown.
pub async fn start_server(config: Config) -> Result<()> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let db = DbHandle::new(CaseDb::new(&config.db_path).context("Failed to initialize database")?);
    let (ws_tx, _rx) = broadcast::channel::<String>(256);
    let notifier = Notifier::new(db.clone(), ws_tx.clone());
    let blobs = BlobStore::new(&config.storage_dir)?;

    let state = Arc::new(AppState {
        db,
        ws_tx,
        notifier,
        blobs,
        admin_token: config.admin_token.clone(),
    });

    let mut app = build_router(state);
    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!("caseboard running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
        return;
    }
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_router() -> (Router, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = DbHandle::new(CaseDb::new_in_memory().unwrap());
        let (ws_tx, _) = broadcast::channel(16);
        let notifier = Notifier::new(db.clone(), ws_tx.clone());
        let state = Arc::new(AppState {
            db,
            ws_tx,
            notifier,
            blobs: BlobStore::new(dir.path().join("voice-notes")).unwrap(),
            admin_token: None,
        });
        (build_router(state), dir)
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let (app, _dir) = test_router();
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_routes_mounted() {
        let (app, _dir) = test_router();
        let req = Request::builder()
            .uri("/api/projects")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_ws_route_requires_upgrade() {
        let (app, _dir) = test_router();
        let req = Request::builder().uri("/ws").body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        // A plain GET without the upgrade headers is rejected.
        assert_ne!(resp.status(), StatusCode::OK);
    }
}
