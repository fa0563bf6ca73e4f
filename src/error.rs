use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum PythiaError {
    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{column}' does not exist in table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("Table '{0}' has no primary key")]
    NoPrimaryKey(String),

    #[error("Row with {pk}={id} not found")]
    RowNotFound { pk: String, id: String },

    #[error("{0}")]
    InvalidRequest(String),

    #[error("Support for {0} not yet implemented")]
    UnsupportedModel(String),

    #[error("LLM provider not configured: {0}")]
    LlmNotConfigured(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("HTTP request error: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stream protocol error: {0}")]
    StreamProtocol(String),
}

impl PythiaError {
    pub fn status(&self) -> StatusCode {
        match self {
            PythiaError::TableNotFound(_) | PythiaError::RowNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            PythiaError::UnknownColumn { .. }
            | PythiaError::NoPrimaryKey(_)
            | PythiaError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            PythiaError::UnsupportedModel(_) => StatusCode::NOT_IMPLEMENTED,
            PythiaError::LlmNotConfigured(_) => StatusCode::SERVICE_UNAVAILABLE,
            PythiaError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PythiaError::Upstream(_)
            | PythiaError::Json(_)
            | PythiaError::StreamProtocol(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for PythiaError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();

        // Internal detail stays in the log; the client gets a generic message.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Internal server error: {self}");
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        (status, Json(ErrorEnvelope::new(message))).into_response()
    }
}

/// Standardized API error envelope, `{"status":"error","message":"..."}`.
#[derive(Serialize)]
pub struct ErrorEnvelope {
    pub status: &'static str,
    pub message: String,
}

impl ErrorEnvelope {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(
            PythiaError::TableNotFound("users".into()).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            PythiaError::NoPrimaryKey("logs".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            PythiaError::UnsupportedModel("claude-2".into()).status(),
            StatusCode::NOT_IMPLEMENTED
        );
        assert_eq!(
            PythiaError::LlmNotConfigured("OpenAI API key is required".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            PythiaError::StreamProtocol("truncated".into()).status(),
            StatusCode::BAD_GATEWAY
        );
    }
}
