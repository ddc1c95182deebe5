//! Error taxonomy shared by the store, the session manager and the handlers.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
  #[error("Not found: {0}")]
  NotFound(String),

  #[error("Invalid state: {0}")]
  InvalidState(String),

  #[error("Validation error: {0}")]
  Validation(String),

  /// Duplicate key on insert. Callers that expect races resolve it by re-reading.
  #[error("Conflict: {0}")]
  Conflict(String),

  #[error("Internal error: {0}")]
  Internal(String),
}

impl AppError {
  pub fn kind(&self) -> &'static str {
    match self {
      AppError::NotFound(_) => "not_found",
      AppError::InvalidState(_) => "invalid_state",
      AppError::Validation(_) => "validation_error",
      AppError::Conflict(_) | AppError::Internal(_) => "internal_error",
    }
  }

  pub fn status(&self) -> StatusCode {
    match self {
      AppError::NotFound(_) => StatusCode::NOT_FOUND,
      AppError::InvalidState(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
      AppError::Conflict(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl IntoResponse for AppError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      error!(target: "quiz_engine", error = %self, "Request failed");
    }
    let message = match &self {
      AppError::NotFound(m) | AppError::InvalidState(m) | AppError::Validation(m) => m.clone(),
      AppError::Conflict(_) | AppError::Internal(_) => "Internal server error".to_string(),
    };
    (status, Json(json!({ "error": self.kind(), "message": message }))).into_response()
  }
}

impl From<JsonRejection> for AppError {
  fn from(rejection: JsonRejection) -> Self {
    AppError::Validation(rejection.body_text())
  }
}

pub type AppResult<T> = Result<T, AppError>;
