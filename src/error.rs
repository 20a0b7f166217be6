use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::fmt::Display;
use thiserror::Error;

use crate::models::Platform;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("duplicate content hash {hash}")]
    Duplicate { hash: String },
    #[error("record {0} not found")]
    NotFound(i64),
    #[error("content {0} has been posted and can no longer be changed")]
    PostedImmutable(i64),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("persistence error: {0}")]
    Persistence(String),
}

impl StoreError {
    pub fn persistence<E: Display>(error: E) -> Self {
        StoreError::Persistence(error.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<diesel::result::Error> for StoreError {
    fn from(value: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};
        match value {
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                StoreError::Conflict(info.message().to_string())
            }
            other => StoreError::persistence(other),
        }
    }
}

/// A candidate that cannot be stored at all.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("candidate has no original URL")]
    MissingUrl,
    #[error("candidate has neither text nor media")]
    NoPayload,
}

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("scan already in progress for {0}")]
    InProgress(Platform),
    #[error("scanning disabled for {0}")]
    Disabled(Platform),
    #[error("{0} is not authenticated")]
    NotAuthenticated(Platform),
    #[error("{0} is not configured")]
    NotConfigured(Platform),
    #[error("no scanner registered for {0}")]
    NoScanner(Platform),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ScanError {
    /// In-progress rejections are a normal outcome for callers, not a fault.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ScanError::InProgress(_))
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("invalid request: {0}")]
    Invalid(String),
}

pub type PipelineResult<T> = Result<T, PipelineError>;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "resource not found")
    }

    pub fn internal<E: Display>(error: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl From<StoreError> for AppError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::NotFound(_) => AppError::not_found(),
            StoreError::Duplicate { .. }
            | StoreError::PostedImmutable(_)
            | StoreError::Conflict(_) => AppError::new(StatusCode::CONFLICT, value.to_string()),
            StoreError::Persistence(_) => AppError::internal(value),
        }
    }
}

impl From<ScanError> for AppError {
    fn from(value: ScanError) -> Self {
        match value {
            ScanError::InProgress(_) => AppError::new(StatusCode::CONFLICT, value.to_string()),
            ScanError::Disabled(_) | ScanError::NotConfigured(_) | ScanError::NoScanner(_) => {
                AppError::bad_request(value.to_string())
            }
            ScanError::NotAuthenticated(_) => {
                AppError::new(StatusCode::UNPROCESSABLE_ENTITY, value.to_string())
            }
            ScanError::Store(err) => err.into(),
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        match value {
            PipelineError::Store(err) => err.into(),
            PipelineError::Scan(err) => err.into(),
            PipelineError::Invalid(message) => AppError::bad_request(message),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_progress_is_retryable_conflict() {
        let err = ScanError::InProgress(Platform::Instagram);
        assert!(err.is_retryable());
        assert_eq!(err.to_string(), "scan already in progress for instagram");
        assert_eq!(AppError::from(err).status(), StatusCode::CONFLICT);
    }

    #[test]
    fn configuration_failures_are_client_errors() {
        assert_eq!(
            AppError::from(ScanError::Disabled(Platform::Reddit)).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(ScanError::NotAuthenticated(Platform::Youtube)).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }

    #[test]
    fn store_errors_map_to_http_status() {
        assert_eq!(
            AppError::from(StoreError::NotFound(4)).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(StoreError::PostedImmutable(4)).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(StoreError::Persistence("boom".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
