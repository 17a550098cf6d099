//! HTTP surface
//!
//! Routes:
//! - `GET /assets/{*path}` with optional `p=<preset>`
//! - `GET|POST /api/clear-cache`
//! - `GET /health`
//!
//! Everything else is a plain-text 404.

use crate::config::Config;
use crate::error::{ImgCacheError, ImgCacheResult};
use crate::gateway::{AssetResponse, CacheGateway};
use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Response header reporting HIT, MISS or PASS
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

type AppState = Arc<CacheGateway>;

/// Build the application router
pub fn router(gateway: Arc<CacheGateway>) -> Router {
    Router::new()
        .route("/assets/{*path}", get(serve_asset))
        .route("/api/clear-cache", get(clear_cache).post(clear_cache))
        .route("/health", get(health))
        .fallback(not_found)
        .with_state(gateway)
}

/// Bind `bind` and serve until ctrl-c
pub async fn serve(gateway: CacheGateway, bind: &str) -> ImgCacheResult<()> {
    let listener = TcpListener::bind(bind)
        .await
        .map_err(|e| ImgCacheError::io(format!("binding {bind}"), e))?;
    let local = listener
        .local_addr()
        .map_err(|e| ImgCacheError::io("reading listener address", e))?;

    info!(addr = %local, "listening");

    axum::serve(listener, router(Arc::new(gateway)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ImgCacheError::io("serving HTTP", e))?;

    info!("server stopped");
    Ok(())
}

/// Serve with a gateway built from configuration
pub async fn serve_config(config: &Config) -> ImgCacheResult<()> {
    let gateway = CacheGateway::from_config(config)?;
    serve(gateway, &config.server.bind).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not found")
}

async fn serve_asset(
    State(gateway): State<AppState>,
    Path(path): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ImgCacheError> {
    debug!(path = %path, params = ?params, "asset request");
    let asset = gateway.serve_asset(&path, &params).await?;
    asset_response(asset)
}

async fn clear_cache(State(gateway): State<AppState>) -> Result<String, ImgCacheError> {
    let deleted = gateway.clear_cache().await?;
    Ok(format!("OK ({deleted} deleted)"))
}

fn asset_response(asset: AssetResponse) -> ImgCacheResult<Response> {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, asset.content_type)
        .header(X_CACHE, asset.status.as_header());

    if let Some(len) = asset.content_length {
        builder = builder.header(header::CONTENT_LENGTH, len);
    }
    if let Some(etag) = asset.etag {
        builder = builder.header(header::ETAG, etag);
    }
    if let Some(cache_control) = asset.cache_control {
        builder = builder.header(header::CACHE_CONTROL, cache_control);
    }

    builder
        .body(Body::from_stream(asset.body))
        .map_err(|e| ImgCacheError::Internal(format!("building response: {e}")))
}

impl IntoResponse for ImgCacheError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = if self.is_client_error() {
            warn!(status = %status, "{}", self);
            self.to_string()
        } else {
            error!(status = %status, "{}", self);
            status
                .canonical_reason()
                .unwrap_or("internal server error")
                .to_lowercase()
        };

        let body = serde_json::json!({ "error": message });
        (status, Json(body)).into_response()
    }
}
