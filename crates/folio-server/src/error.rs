//! HTTP error responses.

use axum::extract::rejection::JsonRejection;
use axum::extract::FromRequest;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(format!("Invalid JSON body: {}", rejection.body_text()))
    }
}

impl From<folio_core::Error> for ApiError {
    fn from(err: folio_core::Error) -> Self {
        use folio_core::Error;

        let (status, public) = match &err {
            Error::InvalidInput(_) => return Self::bad_request(err.to_string()),
            Error::Busy(_) => return Self::new(StatusCode::TOO_MANY_REQUESTS, err.to_string()),
            Error::Configuration(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Service is not configured",
            ),
            Error::Network(_) | Error::Api { .. } => {
                (StatusCode::BAD_GATEWAY, "Upstream service unavailable")
            }
            Error::Load(_) | Error::Inference(_) | Error::Serialization(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };
        // Upstream bodies and local diagnostics stay in the log.
        error!(status = status.as_u16(), "{err}");
        Self::new(status, public)
    }
}

/// `Json` extractor whose rejections render as [`ApiError`].
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);
