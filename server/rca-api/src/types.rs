//! Response types for the upload service.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use rca_engine::RcaError;

/// Error document returned for every failed request.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
  pub success: bool,
  pub error_code: String,
  pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
  pub status: StatusCode,
  pub body: ErrorBody,
}

impl ApiError {
  pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
    Self {
      status,
      body: ErrorBody {
        success: false,
        error_code: code.to_string(),
        message: message.into(),
      },
    }
  }
}

/// HTTP status for an `E.*` code.
pub fn status_for(code: &str) -> StatusCode {
  match code {
    "E.REQ.001" => StatusCode::UNSUPPORTED_MEDIA_TYPE,
    "E.REQ.002" => StatusCode::PAYLOAD_TOO_LARGE,
    c if c.starts_with("E.REQ.") => StatusCode::BAD_REQUEST,
    c if c.starts_with("E.SEC.") => StatusCode::SERVICE_UNAVAILABLE,
    _ => StatusCode::INTERNAL_SERVER_ERROR,
  }
}

impl From<RcaError> for ApiError {
  fn from(err: RcaError) -> Self {
    let code = err.code();
    Self::new(status_for(code), code, err.public_message())
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    (self.status, Json(self.body)).into_response()
  }
}
