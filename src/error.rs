use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::fmt;

use crate::collector::CollectError;
use crate::store::StoreError;

/// Application error types
#[derive(Debug)]
pub enum AppError {
    /// Malformed or incomplete query parameters
    BadRequest(String),
    /// Application not in the monitored set
    UnknownApplication(String),
    /// Every pod of a cycle failed
    CollectionFailed { application: String, errors: Vec<String> },
    /// Store read or write failure
    StoreError(String),
    /// Internal server error
    InternalError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            Self::UnknownApplication(app) => write!(f, "Unknown application: {}", app),
            Self::CollectionFailed { application, errors } => {
                write!(f, "Collection failed for {}: {}", application, errors.join("; "))
            }
            Self::StoreError(msg) => write!(f, "Store error: {}", msg),
            Self::InternalError(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnknownApplication(_) => StatusCode::NOT_FOUND,
            Self::CollectionFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::StoreError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let mut error = json!({
            "message": self.to_string(),
            "type": error_type_name(&self),
        });
        if let Self::CollectionFailed { errors, .. } = &self {
            error["errors"] = json!(errors);
        }

        (status, Json(json!({ "error": error }))).into_response()
    }
}

fn error_type_name(error: &AppError) -> &'static str {
    match error {
        AppError::BadRequest(_) => "bad_request",
        AppError::UnknownApplication(_) => "unknown_application",
        AppError::CollectionFailed { .. } => "collection_failed",
        AppError::StoreError(_) => "store_error",
        AppError::InternalError(_) => "internal_error",
    }
}

// Implement conversions from common error types
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::InternalError(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        Self::StoreError(err.to_string())
    }
}

impl From<CollectError> for AppError {
    fn from(err: CollectError) -> Self {
        match err {
            CollectError::UnknownApplication(app) => Self::UnknownApplication(app),
            CollectError::AllTargetsFailed { application, errors } => {
                Self::CollectionFailed { application, errors }
            }
            CollectError::Store(e) => e.into(),
        }
    }
}
