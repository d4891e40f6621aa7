use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use crate::RagError;

/// Failure of one HTTP request, rendered as `{"status": "error", "message": ...}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Rag(#[from] RagError),
}

impl ApiError {
    #[inline]
    pub fn bad_request(message: impl ToString) -> Self {
        Self::BadRequest(message.to_string())
    }

    #[inline]
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Rag(error) => match error {
                RagError::UnsupportedFormat { .. } | RagError::LoadFailure { .. } => {
                    StatusCode::BAD_REQUEST
                }
                RagError::NoDocumentsAdded => StatusCode::UNPROCESSABLE_ENTITY,
                RagError::Provider(_) => StatusCode::BAD_GATEWAY,
                RagError::DimensionMismatch { .. } => StatusCode::CONFLICT,
                RagError::IndexCorrupt { .. }
                | RagError::ConfigurationMissing(_)
                | RagError::Config(_)
                | RagError::Database(_)
                | RagError::Io(_)
                | RagError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    #[inline]
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        } else {
            warn!("Request rejected: {}", self);
        }

        let body = Json(json!({
            "status": "error",
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}
