use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::store::StoreError;

pub const RETRY_AFTER_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid input data")]
    Validation(Vec<FieldError>),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Admin access required")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("User not found")]
    UserNotFound,

    #[error("You have already rated this vehicle today")]
    DuplicateRating,

    #[error("You have already submitted a similar report recently")]
    DuplicateReport,

    #[error("Vehicle with this registration plate already exists")]
    VehicleExists,

    #[error("Report has already been moderated ({0})")]
    AlreadyModerated(&'static str),

    #[error("{0}")]
    RateLimited(&'static str),

    #[error("Only JPEG, PNG, and WebP images are allowed")]
    InvalidFileType,

    #[error("Image must be less than 5MB")]
    FileTooLarge,

    #[error("Photo upload failed")]
    Upload(#[source] anyhow::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("An unexpected error occurred")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation(vec![FieldError::new(field, message)])
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Unauthorized => "UNAUTHORIZED",
            AppError::Forbidden => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::UserNotFound => "USER_NOT_FOUND",
            AppError::DuplicateRating => "DUPLICATE_RATING",
            AppError::DuplicateReport => "DUPLICATE_REPORT",
            AppError::VehicleExists => "VEHICLE_EXISTS",
            AppError::AlreadyModerated(_) => "REPORT_ALREADY_MODERATED",
            AppError::RateLimited(_) => "RATE_LIMIT_EXCEEDED",
            AppError::InvalidFileType => "INVALID_FILE_TYPE",
            AppError::FileTooLarge => "FILE_TOO_LARGE",
            AppError::Upload(_) => "UPLOAD_FAILED",
            AppError::Store(_) => "DATABASE_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::InvalidFileType | AppError::FileTooLarge => {
                StatusCode::BAD_REQUEST
            }
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) | AppError::UserNotFound => StatusCode::NOT_FOUND,
            AppError::DuplicateRating
            | AppError::DuplicateReport
            | AppError::VehicleExists
            | AppError::AlreadyModerated(_) => StatusCode::CONFLICT,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Upload(_) => StatusCode::BAD_GATEWAY,
            AppError::Store(e) => e.status(),
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            AppError::Upload(e) => error!("Photo upload failed: {:?}", e),
            AppError::Store(e) => error!("Store error: {:?}", e),
            AppError::Internal(e) => error!("Unhandled error: {:?}", e),
            _ => {}
        }

        let mut body = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        if let AppError::Validation(details) = &self {
            body["details"] = json!(details);
        }
        if matches!(self, AppError::RateLimited(_)) {
            body["retryAfter"] = json!(RETRY_AFTER_SECS);
        }

        let mut response = (status, Json(json!({ "success": false, "error": body }))).into_response();
        if matches!(self, AppError::RateLimited(_)) {
            response.headers_mut().insert(
                header::RETRY_AFTER,
                HeaderValue::from(RETRY_AFTER_SECS),
            );
        }
        response
    }
}

/// Success envelope: `{"success": true, "data": ..., "message"?: ...}`.
pub fn success<T: Serialize>(status: StatusCode, data: T, message: Option<&str>) -> Response {
    let mut body = json!({ "success": true, "data": data });
    if let Some(message) = message {
        body["message"] = json!(message);
    }
    (status, Json(body)).into_response()
}
