//! # API Request/Response Types
//!
//! JSON structures for the query API.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::NaiveDate;
use flashcheck_core::{FlashcheckError, SerialNumberRecord, TestSession};
use serde::{Deserialize, Serialize};

// =============================================================================
// HEALTH RESPONSE
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

// =============================================================================
// SESSIONS
// =============================================================================

/// `GET /sessions` query string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionsQuery {
    /// `YYYY-MM-DD`, matched against the UTC start date.
    pub date: Option<String>,
}

impl SessionsQuery {
    pub fn parse_date(&self) -> Result<Option<NaiveDate>, FlashcheckError> {
        self.date
            .as_deref()
            .map(|d| {
                NaiveDate::parse_from_str(d.trim(), "%Y-%m-%d").map_err(|_| {
                    FlashcheckError::InvalidInput(format!(
                        "invalid date '{}': expected YYYY-MM-DD",
                        d
                    ))
                })
            })
            .transpose()
    }
}

/// One line of the session list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub port: String,
    pub chip_type: String,
    pub mode: String,
    pub mac_address: Option<String>,
    pub serial_number: Option<String>,
    pub verdict: String,
    pub aborted: bool,
    pub failed_stages: Vec<String>,
}

impl From<&TestSession> for SessionSummary {
    fn from(session: &TestSession) -> Self {
        Self {
            session_id: session.session_id.clone(),
            started_at: session.started_at.to_rfc3339(),
            ended_at: session.ended_at.map(|t| t.to_rfc3339()),
            port: session.port.clone(),
            chip_type: session.chip_type.clone(),
            mode: session.mode.to_string(),
            mac_address: session.mac_address.clone(),
            serial_number: session.serial_number.clone(),
            verdict: session
                .verdict
                .as_ref()
                .map(|v| v.as_str().to_string())
                .unwrap_or_else(|| "INCOMPLETE".to_string()),
            aborted: session.aborted,
            failed_stages: session
                .verdict
                .as_ref()
                .map(|v| v.failed_stages().iter().map(|s| s.name().to_string()).collect())
                .unwrap_or_default(),
        }
    }
}

/// Session list response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsResponse {
    pub count: usize,
    pub sessions: Vec<SessionSummary>,
}

// =============================================================================
// SERIALS
// =============================================================================

/// Ledger records of one bucket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialBucketResponse {
    pub bucket: String,
    pub max_sequence: Option<u32>,
    pub records: Vec<SerialNumberRecord>,
}

// =============================================================================
// ERRORS
// =============================================================================

/// Error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// An error with its HTTP status.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<FlashcheckError> for ApiError {
    fn from(e: FlashcheckError) -> Self {
        let status = match &e {
            FlashcheckError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            FlashcheckError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}
