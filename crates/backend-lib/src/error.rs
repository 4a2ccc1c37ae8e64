// ============================
// crates/backend-lib/src/error.rs
// ============================
//! Central error type + Axum integration.
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Chat-layer error types with error codes and context
#[derive(Error, Debug)]
pub enum ChatError {
    /// Missing or invalid credential. Connection-fatal at handshake time.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Identity resolved but not a participant of the target chat.
    #[error("Not a participant: {0}")]
    Unauthorized(String),

    /// Malformed payload or empty content. No side effects.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Chat not found: {0}")]
    NotFound(String),

    /// Persistence failure. The ack reports it; no broadcast follows.
    #[error("Store error: {0}")]
    Store(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ChatError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ChatError::Auth(_) => StatusCode::UNAUTHORIZED,
            ChatError::Unauthorized(_) => StatusCode::FORBIDDEN,
            ChatError::Validation(_) => StatusCode::BAD_REQUEST,
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the stable error code for this error
    pub fn error_code(&self) -> &'static str {
        match self {
            ChatError::Auth(_) => "AUTH_001",
            ChatError::Unauthorized(_) => "PART_001",
            ChatError::Validation(_) => "VAL_001",
            ChatError::NotFound(_) => "CHAT_001",
            ChatError::Store(_) => "STORE_001",
            ChatError::Internal(_) => "INT_001",
            ChatError::Json(_) => "JSON_001",
        }
    }

    /// Get a sanitized message suitable for production use
    pub fn sanitized_message(&self) -> String {
        match self {
            ChatError::Auth(_) => "Authentication failed".to_string(),
            ChatError::Unauthorized(_) => "Not a participant of this chat".to_string(),
            ChatError::Validation(_) => "Invalid input provided".to_string(),
            ChatError::NotFound(_) => "Chat not found".to_string(),
            ChatError::Store(_) => "Message could not be saved".to_string(),
            ChatError::Internal(_) => "An internal server error occurred".to_string(),
            ChatError::Json(_) => "Invalid request format".to_string(),
        }
    }
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_code = self.error_code();

        // Use detailed messages in development, sanitized in production
        let message = if cfg!(debug_assertions) {
            self.to_string()
        } else {
            self.sanitized_message()
        };

        let body = serde_json::json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ChatError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ChatError::Internal("Failed to send event".to_string())
    }
}
