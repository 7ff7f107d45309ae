use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use loomgate_common::Error;
use serde_json::json;

/// Wraps the shared error taxonomy for the HTTP surface, mapping each
/// variant to a status code (spec §7).
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Conflict(_) => StatusCode::CONFLICT,
            Error::BadInput(_) => StatusCode::BAD_REQUEST,
            Error::KeyMissing(_) => StatusCode::CONFLICT,
            Error::DecryptFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Transient(_) => StatusCode::BAD_GATEWAY,
            Error::Fatal(_) | Error::Io(_) | Error::Other { .. } | Error::Message(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        };

        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
