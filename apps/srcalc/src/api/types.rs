//! Request/response bodies and the API error type.

use crate::cli::{CliError, Rejection};
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use srcalc_core::{
    CalculationError, DataAccessError, DisplayGroup, MissingValue, RawInput, SaveNoteCode,
    StorageError,
};
use std::collections::BTreeMap;
use thiserror::Error;

// =============================================================================
// REQUESTS
// =============================================================================

/// Body of `POST /calculations`.
#[derive(Debug, Clone, Deserialize)]
pub struct CalculationRequest {
    pub specialty_id: u32,
    /// Patient to pre-fill values from.
    #[serde(default)]
    pub dfn: Option<u32>,
    #[serde(default)]
    pub values: BTreeMap<String, RawInput>,
}

/// Body of `POST /notes`. The calculation is re-run before the note is
/// built, so the saved note always matches the inputs.
#[derive(Debug, Clone, Deserialize)]
pub struct NoteRequest {
    pub dfn: u32,
    pub signature: String,
    pub specialty_id: u32,
    #[serde(default)]
    pub values: BTreeMap<String, RawInput>,
}

// =============================================================================
// RESPONSES
// =============================================================================

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct VariablesResponse {
    pub specialty_id: u32,
    pub groups: Vec<DisplayGroup>,
}

#[derive(Debug, Serialize)]
pub struct NoteResponse {
    pub result: SaveNoteCode,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct InvalidValue {
    pub key: String,
    pub message: String,
}

/// Body of a 422 response.
#[derive(Debug, Serialize)]
pub struct RejectionBody {
    pub code: &'static str,
    pub invalid: Vec<InvalidValue>,
    pub missing: Vec<MissingValue>,
}

impl From<Rejection> for RejectionBody {
    fn from(rejection: Rejection) -> Self {
        Self {
            code: "INVALID_VALUES",
            invalid: rejection
                .invalid
                .into_iter()
                .map(|i| InvalidValue {
                    key: i.key,
                    message: i.error.to_string(),
                })
                .collect(),
            missing: rejection.missing,
        }
    }
}

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication required")]
    Unauthorized,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Rejected(Rejection),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            ApiError::Rejected(rejection) => {
                let body = RejectionBody::from(rejection);
                return (StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response();
            }
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "AUTH_REQUIRED",
                "Missing or invalid API key".to_string(),
            ),
            ApiError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "Rate limit exceeded".to_string(),
            ),
            ApiError::Forbidden(detail) => (StatusCode::FORBIDDEN, "FORBIDDEN", detail),
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "NOT_FOUND", detail),
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail),
            ApiError::Unavailable(detail) => {
                tracing::warn!(detail, "VistA unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", detail)
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
        };
        (status, Json(ErrorBody { code, message })).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<CalculationError> for ApiError {
    fn from(e: CalculationError) -> Self {
        match e {
            CalculationError::UnknownSpecialty(_) => ApiError::NotFound(e.to_string()),
            CalculationError::MissingValues(missing) => ApiError::Rejected(Rejection {
                invalid: Vec::new(),
                missing,
            }),
            CalculationError::UnknownModel(_) | CalculationError::UnknownVariable(_) => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl From<DataAccessError> for ApiError {
    fn from(e: DataAccessError) -> Self {
        match e {
            DataAccessError::PermissionDenied(detail) => ApiError::Forbidden(detail),
            DataAccessError::NonTransient(detail) => ApiError::NotFound(detail),
            DataAccessError::Recoverable(detail) => ApiError::Unavailable(detail),
        }
    }
}

impl From<CliError> for ApiError {
    fn from(e: CliError) -> Self {
        match e {
            CliError::Rejected(rejection) => ApiError::Rejected(rejection),
            CliError::Calculation(e) => e.into(),
            CliError::DataAccess(e) => e.into(),
            CliError::Storage(e) => e.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        ApiError::Internal(e.to_string())
    }
}
