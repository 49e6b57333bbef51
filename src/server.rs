//! Read-only status HTTP server.
//!
//! Enabled by a `[server]` section in the config. Exposes what the cache is
//! currently holding so operators can check tier membership and delivery
//! state without attaching to logs.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/status` | Tiers, scores, last refresh and delivery outcome |
//! | `GET`  | `/context` | The current context document as `text/plain` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "no context document assembled yet" } }
//! ```
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::scheduler::{SharedStatus, StatusSnapshot};

/// Build the router over a shared status handle.
pub fn router(status: SharedStatus) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/status", get(handle_status))
        .route("/context", get(handle_context))
        .layer(cors)
        .with_state(status)
}

/// Bind `bind_addr` and serve until the listener fails.
pub async fn run_status_server(bind_addr: &str, status: SharedStatus) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %listener.local_addr()?, "status server listening");
    axum::serve(listener, router(status)).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /status ============

async fn handle_status(State(status): State<SharedStatus>) -> Json<StatusSnapshot> {
    Json(status.read().await.clone())
}

// ============ GET /context ============

/// Returns the exact bytes last assembled, with the fingerprint in
/// `x-context-fingerprint`.
async fn handle_context(State(status): State<SharedStatus>) -> Result<Response, AppError> {
    let status = status.read().await;
    let document = status
        .document
        .as_ref()
        .ok_or_else(|| not_found("no context document assembled yet"))?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8".to_string()),
            (
                header::HeaderName::from_static("x-context-fingerprint"),
                document.fingerprint.to_string(),
            ),
        ],
        document.text.clone(),
    )
        .into_response())
}
