use axum::http::StatusCode;
use axum::Json;
use tracing::{error, warn};

use crate::session::Phase;

#[derive(Debug, thiserror::Error)]
pub enum AuraError {
    #[error("{0} must not be empty")]
    MissingField(&'static str),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("upload of {size} bytes exceeds the {limit} byte limit")]
    UploadTooLarge { size: usize, limit: usize },

    #[error("request body exceeds the {limit} byte limit")]
    BodyTooLarge { limit: usize },

    #[error("unsupported document type: {0}")]
    UnsupportedDocument(String),

    #[error("{op} is not allowed in phase {phase}")]
    InvalidPhase { op: &'static str, phase: Phase },

    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,

    #[error("generation backend not configured (set GEMINI_API_KEY)")]
    AiNotConfigured,

    #[error("generation backend error: {0}")]
    AiBackend(String),

    #[error("generation backend returned no text")]
    EmptyGeneration,

    #[error("document store error: {0}")]
    DocumentStore(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AuraError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::InvalidPhase { .. } => StatusCode::CONFLICT,
            Self::UploadTooLarge { .. } | Self::BodyTooLarge { .. } => {
                StatusCode::PAYLOAD_TOO_LARGE
            }
            Self::UnsupportedDocument(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::AiNotConfigured => StatusCode::SERVICE_UNAVAILABLE,
            Self::AiBackend(_) | Self::EmptyGeneration | Self::DocumentStore(_) => {
                StatusCode::BAD_GATEWAY
            }
            Self::MissingField(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// True for failures of an external collaborator (gateway or store),
    /// as opposed to bad input or local faults.
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            Self::AiBackend(_) | Self::EmptyGeneration | Self::DocumentStore(_)
        )
    }
}

impl axum::response::IntoResponse for AuraError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        if self.is_external() {
            warn!(error = %self, "upstream failure");
        } else if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, "request failed");
        }
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}
