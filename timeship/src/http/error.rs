//! Error envelope for the API: every error response is
//! `{"message": "<title>: <detail>", "status": false}` with
//! `Content-Type: application/problem+json`.

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::storage::errors::StorageError;

pub const PROBLEM_JSON: &str = "application/problem+json";

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    title: &'static str,
    detail: String,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    message: String,
    status: bool,
}

impl ApiError {
    fn new(status: StatusCode, title: &'static str, detail: impl Into<String>) -> Self {
        Self {
            status,
            title,
            detail: detail.into(),
        }
    }

    pub fn storage_not_found(name: &str) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "Storage Not Found",
            format!("unknown storage: {name}"),
        )
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "Not Found", detail)
    }

    pub fn invalid_parameter(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "Invalid Parameter", detail)
    }

    pub fn not_supported(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_IMPLEMENTED, "Not Supported", detail)
    }

    pub fn not_implemented() -> Self {
        Self::new(
            StatusCode::NOT_IMPLEMENTED,
            "Not Implemented",
            "this operation is not implemented",
        )
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error", detail)
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match &err {
            StorageError::InvalidPath(_) => {
                Self::new(StatusCode::BAD_REQUEST, "Invalid Path", err.to_string())
            }
            StorageError::InvalidSnapshot(_) => {
                Self::new(StatusCode::BAD_REQUEST, "Invalid Snapshot", err.to_string())
            }
            StorageError::NotFound(_) => Self::not_found(err.to_string()),
            StorageError::PermissionDenied(_) | StorageError::Io(_) => {
                Self::internal(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let envelope = ErrorEnvelope {
            message: format!("{}: {}", self.title, self.detail),
            status: false,
        };
        let body = serde_json::to_string(&envelope)
            .unwrap_or_else(|_| r#"{"message":"Internal Server Error","status":false}"#.to_string());
        (
            self.status,
            [(header::CONTENT_TYPE, PROBLEM_JSON)],
            body,
        )
            .into_response()
    }
}
