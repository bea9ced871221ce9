//! # API Endpoint Handlers
//!
//! All handlers are read-only views over the shared store.

use super::{
    AppState,
    types::{
        ApiError, HealthResponse, SerialBucketResponse, SessionSummary, SessionsQuery,
        SessionsResponse,
    },
};
use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use flashcheck_core::{LedgerReport, TestSession};

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// SESSION HANDLERS
// =============================================================================

/// List sessions, optionally for one day.
pub async fn sessions_handler(
    State(state): State<AppState>,
    Query(query): Query<SessionsQuery>,
) -> Result<Json<SessionsResponse>, ApiError> {
    let date = query.parse_date()?;
    let sessions: Vec<SessionSummary> = state
        .store
        .sessions()?
        .iter()
        .filter(|s| date.is_none_or(|d| s.started_at.date_naive() == d))
        .map(SessionSummary::from)
        .collect();

    Ok(Json(SessionsResponse {
        count: sessions.len(),
        sessions,
    }))
}

/// One full session record.
pub async fn session_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TestSession>, ApiError> {
    state
        .store
        .session(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("session {} not found", id)))
}

// =============================================================================
// SERIAL LEDGER HANDLERS
// =============================================================================

/// Ledger records for one bucket.
pub async fn serial_bucket_handler(
    State(state): State<AppState>,
    Path(bucket): Path<String>,
) -> Result<Json<SerialBucketResponse>, ApiError> {
    let records = state.store.serial_records(Some(&bucket))?;
    let max_sequence = state.store.query_max_sequence(&bucket)?;
    Ok(Json(SerialBucketResponse {
        bucket,
        max_sequence,
        records,
    }))
}

/// Recompute ledger digests and check contiguity.
pub async fn verify_ledger_handler(
    State(state): State<AppState>,
) -> Result<Json<LedgerReport>, ApiError> {
    let report = state.store.verify_serial_ledger()?;
    if !report.is_clean() {
        tracing::warn!(problems = report.problems.len(), "serial ledger has problems");
    }
    Ok(Json(report))
}
