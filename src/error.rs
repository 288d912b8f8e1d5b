// src/error.rs
// Crate-wide error type and Result alias.

use actix_web::http::StatusCode;
use actix_web::HttpResponse;
use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AegisError>;

/// Errors surfaced by the AEGIS engines.
///
/// Note that two conditions deliberately are NOT errors: an insufficient
/// behavioral baseline (carried as a neutral `AnomalyResult`) and policy
/// conflicts (reported by `detect_conflicts`, never fatal).
#[derive(Debug, Error)]
pub enum AegisError {
    /// Malformed caller input, e.g. a missing entity identifier.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unknown profile, session, segment or policy.
    #[error("not found: {0}")]
    NotFound(String),

    /// Conflicting state change, e.g. registering a duplicate identifier.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Bad or unreadable configuration file.
    #[error("configuration error: {0}")]
    Config(String),

    /// Unexpected internal failure; propagate with context.
    #[error("internal error: {0}")]
    Internal(String),
}

impl actix_web::ResponseError for AegisError {
    fn status_code(&self) -> StatusCode {
        match self {
            AegisError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AegisError::NotFound(_) => StatusCode::NOT_FOUND,
            AegisError::Conflict(_) => StatusCode::CONFLICT,
            AegisError::Config(_) | AegisError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(serde_json::json!({
            "error": self.to_string()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::ResponseError;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            AegisError::InvalidInput("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AegisError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AegisError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AegisError::Internal("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_display_includes_kind() {
        let err = AegisError::NotFound("profile user-001".into());
        assert_eq!(err.to_string(), "not found: profile user-001");
    }
}
