#[cfg(feature = "web")]
use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use log::error;
use thiserror::Error;

use crate::sheets::SheetsError;
use crate::store::StoreError;

/// Every failure a portal operation can report to a caller.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    AuthRequired(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    ValidationFailed(String),

    #[error("Spreadsheet service unavailable")]
    AdapterUnavailable,

    #[error("Column \"{0}\" not found")]
    UnknownField(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Internal(String),
}

impl AppError {
    /// Map a spreadsheet failure, keeping the detail in the log only.
    ///
    /// `context` is the generic message the caller sees for remote failures.
    pub fn from_sheets(e: SheetsError, context: &str) -> Self {
        match e {
            SheetsError::Unavailable(detail) => {
                error!("{context}: spreadsheet client unavailable: {detail}");
                AppError::AdapterUnavailable
            }
            SheetsError::UnknownField(field) => AppError::UnknownField(field),
            SheetsError::InvalidRange(detail) => AppError::ValidationFailed(detail),
            other => {
                error!("{context}: {other}");
                AppError::Internal(context.to_string())
            }
        }
    }

    /// Map a store failure, keeping the detail in the log only.
    pub fn from_store(e: StoreError, context: &str) -> Self {
        match e {
            StoreError::Conflict(what) => AppError::Conflict(format!("{what} already exists")),
            other => {
                error!("{context}: {other}");
                AppError::Internal(context.to_string())
            }
        }
    }
}

#[cfg(feature = "web")]
impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::AuthRequired(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            AppError::AdapterUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::UnknownField(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(feature = "web")]
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

// Extractor rejections carry the same JSON body as every other failure.
#[cfg(feature = "web")]
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::ValidationFailed(rejection.body_text())
    }
}

#[cfg(feature = "web")]
impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::ValidationFailed(rejection.body_text())
    }
}

#[cfg(feature = "web")]
impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::ValidationFailed(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_hides_detail() {
        let e = AppError::from_sheets(
            SheetsError::Unavailable("GOOGLE_CREDENTIALS_BASE64 not set".into()),
            "Failed to fetch applications",
        );
        assert!(matches!(e, AppError::AdapterUnavailable));
        assert!(!e.to_string().contains("GOOGLE"));
    }

    #[test]
    fn remote_failures_are_generic() {
        let e = AppError::from_sheets(
            SheetsError::Remote {
                status: 500,
                message: "backend exploded".into(),
            },
            "Failed to fetch applications",
        );
        assert_eq!(e.to_string(), "Failed to fetch applications");
    }

    #[test]
    fn unknown_field_keeps_name() {
        let e = AppError::from_sheets(SheetsError::UnknownField("Status".into()), "x");
        assert_eq!(e.to_string(), "Column \"Status\" not found");
    }

    #[test]
    fn conflict_from_store() {
        let e = AppError::from_store(StoreError::Conflict("User ana".into()), "x");
        assert_eq!(e.to_string(), "User ana already exists");
    }

    #[cfg(feature = "web")]
    #[test]
    fn status_codes() {
        assert_eq!(
            AppError::AuthRequired("x".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AppError::AdapterUnavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(AppError::Conflict("x".into()).status(), StatusCode::CONFLICT);
    }
}
