//! Error taxonomy for the caseboard API.
//!
//! `ApiError` is the single error type surfaced by route handlers. Store
//! failures are classified once in [`ApiError::from_store`]: constraint
//! violations become 400s, everything else a 500. Best-effort side effects
//! never produce an `ApiError`; they are logged and reported via response
//! warnings instead.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    /// Classify a storage-layer failure. Constraint violations (foreign key,
    /// uniqueness, NOT NULL) are client errors; anything else is unexpected.
    pub fn from_store(err: anyhow::Error) -> Self {
        if let Some(rusqlite::Error::SqliteFailure(failure, _)) =
            err.downcast_ref::<rusqlite::Error>()
        {
            if failure.code == rusqlite::ErrorCode::ConstraintViolation {
                return Self::BadRequest(err.to_string());
            }
        }
        Self::Internal(err.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::NotFound("x".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Unauthorized("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Forbidden("x".into()).status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::Internal("x".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_constraint_violation_classified_as_bad_request() {
        let failure = rusqlite::ffi::Error {
            code: rusqlite::ErrorCode::ConstraintViolation,
            extended_code: 787, // SQLITE_CONSTRAINT_FOREIGNKEY
        };
        let sql_err = rusqlite::Error::SqliteFailure(failure, Some("FOREIGN KEY failed".into()));
        let api_err = ApiError::from_store(anyhow::Error::new(sql_err));
        assert!(matches!(api_err, ApiError::BadRequest(_)));
    }

    #[test]
    fn test_other_store_errors_are_internal() {
        let api_err = ApiError::from_store(anyhow::anyhow!("connection lost"));
        assert!(matches!(api_err, ApiError::Internal(_)));
    }

    #[test]
    fn test_error_message_preserved() {
        let err = ApiError::NotFound("Ticket 42 not found".into());
        assert_eq!(err.to_string(), "Ticket 42 not found");
    }
}
