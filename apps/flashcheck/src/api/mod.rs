//! # Query API
//!
//! Read-only HTTP view of the result store, built on axum.
//!
//! ## Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /sessions?date=YYYY-MM-DD` - Session list
//! - `GET /sessions/{id}` - One session with every stage outcome
//! - `GET /serials/verify` - Serial ledger integrity report
//! - `GET /serials/{bucket}` - Ledger records of one bucket
//!
//! ## Configuration (Environment Variables)
//!
//! - `FLASHCHECK_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)

mod handlers;
mod types;

pub use handlers::{
    health_handler, serial_bucket_handler, session_handler, sessions_handler,
    verify_ledger_handler,
};
pub use types::{
    ApiError, ErrorResponse, HealthResponse, SerialBucketResponse, SessionSummary, SessionsQuery,
    SessionsResponse,
};

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::get,
};
use flashcheck_core::{FlashcheckError, ResultStore};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ResultStore>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn ResultStore>) -> Self {
        Self { store }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build the CORS layer from `FLASHCHECK_CORS_ORIGINS`.
///
/// - "*": any origin
/// - unset, or no valid entries: localhost only
/// - otherwise: the listed origins
fn build_cors_layer() -> CorsLayer {
    let origins_env = std::env::var("FLASHCHECK_CORS_ORIGINS").ok();

    match origins_env.as_deref() {
        Some("*") => {
            tracing::warn!("CORS: allowing all origins (FLASHCHECK_CORS_ORIGINS=*)");
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed.is_empty() {
                tracing::warn!(
                    "CORS: no valid origins in FLASHCHECK_CORS_ORIGINS, defaulting to localhost only"
                );
                build_localhost_cors()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed)
                    .allow_methods([Method::GET, Method::OPTIONS])
                    .allow_headers([header::CONTENT_TYPE])
            }
        }
        None => build_localhost_cors(),
    }
}

fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the router with all endpoints and middleware.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/sessions", get(handlers::sessions_handler))
        .route("/sessions/{id}", get(handlers::session_handler))
        .route("/serials/verify", get(handlers::verify_ledger_handler))
        .route("/serials/{bucket}", get(handlers::serial_bucket_handler))
        .layer(build_cors_layer())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Serve the query API until the process stops.
pub async fn run_server(addr: &str, store: Arc<dyn ResultStore>) -> Result<(), FlashcheckError> {
    let router = create_router(AppState::new(store));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| FlashcheckError::Io(format!("Bind failed: {}", e)))?;

    tracing::info!("flashcheck query API listening on {}", addr);

    axum::serve(listener, router)
        .await
        .map_err(|e| FlashcheckError::Io(format!("Server error: {}", e)))
}
