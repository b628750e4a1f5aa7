//! # Upload Service Module
//!
//! Servizio HTTP che espone la pipeline:
//!
//! - `POST /optimize`: multipart con campo `file` (un archivio `.zip`),
//!   risponde con `optimized_assets.zip`
//! - `GET /health`: `200 ok`
//!
//! Gli errori tornano come JSON `{"detail": "..."}`: 400 per upload non
//! validi, 500 per tutto il resto. I fallimenti dei singoli file non sono
//! errori della richiesta; finiscono solo nei log.

use crate::{
    config::{Config, ServerConfig},
    error::OptimizeError,
    workspace::optimize_upload,
};
use anyhow::Result;
use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// Name of the archive returned to the client
pub const RESPONSE_FILE_NAME: &str = "optimized_assets.zip";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub server: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(config: Config, server: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            server: Arc::new(server),
        }
    }
}

/// Error returned by a handler, rendered as `{"detail": ...}`
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            detail: detail.into(),
        }
    }
}

impl From<OptimizeError> for ApiError {
    fn from(err: OptimizeError) -> Self {
        if err.is_client_error() {
            Self::bad_request(err.public_message())
        } else {
            error!("Upload failed: {}", err);
            Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                detail: err.public_message(),
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.server.max_upload_bytes;
    Router::new()
        .route("/optimize", post(optimize))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Bind and serve until Ctrl-C
pub async fn serve(config: Config, server: ServerConfig) -> Result<()> {
    config.validate()?;
    let listener = tokio::net::TcpListener::bind(server.bind).await?;
    info!("🚀 Asset optimizer listening on http://{}", listener.local_addr()?);
    if let Some(ref scratch) = server.scratch_root {
        info!("Scratch directory: {}", scratch.display());
    }

    axum::serve(listener, router(AppState::new(config, server)))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested, draining in-flight requests");
}

async fn health() -> &'static str {
    "ok"
}

async fn optimize(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let mut multipart =
        multipart.map_err(|e| ApiError::bad_request(format!("Expected a multipart upload: {}", e)))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        // optimize_upload rejects bad names before allocating scratch space
        let file_name = field.file_name().unwrap_or_default().to_string();
        info!("Received upload {}", file_name);

        let archive = optimize_upload(
            &file_name,
            field,
            state.server.scratch_root.as_deref(),
            state.config.as_ref().clone(),
        )
        .await?;

        let disposition = format!("attachment; filename=\"{}\"", RESPONSE_FILE_NAME);
        return Ok((
            [
                (header::CONTENT_TYPE, "application/zip".to_string()),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            archive,
        )
            .into_response());
    }

    Err(ApiError::bad_request("Missing multipart field \"file\""))
}
