use crate::error::CommerceError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

impl CommerceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            CommerceError::ValidationError(_) | CommerceError::CsvError(_) => StatusCode::BAD_REQUEST,
            CommerceError::SignatureError(_) => StatusCode::UNAUTHORIZED,
            CommerceError::PreconditionError(_) => StatusCode::FORBIDDEN,
            CommerceError::NotFound(_) => StatusCode::NOT_FOUND,
            CommerceError::ProviderError(_) => StatusCode::BAD_GATEWAY,
            CommerceError::ConfigError(_)
            | CommerceError::SerializationError(_)
            | CommerceError::IoError(_)
            | CommerceError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// `{"error": "<message>"}` with the status for the error class.
///
/// Server-side failures are logged in full and answered with a generic
/// message.
impl IntoResponse for CommerceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
            "Internal server error".to_string()
        } else {
            if status.is_server_error() {
                tracing::warn!(error = %self, "Upstream failure");
            }
            self.to_string()
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
