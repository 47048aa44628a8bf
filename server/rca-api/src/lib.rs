//! RCA upload service.
//!
//! HTTP boundary in front of the rca-engine pipeline: `POST /upload` takes one
//! multipart upload and returns the RcaReport JSON. Bind to 127.0.0.1 by
//! default (internal only).

mod handlers;
mod state;
mod types;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub use handlers::{health, upload};
pub use state::AppState;
pub use types::{status_for, ApiError, ErrorBody};

/// Headroom for multipart framing and the small text fields.
const FORM_OVERHEAD_BYTES: u64 = 64 * 1024;

pub fn app(state: Arc<AppState>) -> Router {
  let limit = state.orchestrator.config().intake.max_upload_bytes + FORM_OVERHEAD_BYTES;
  Router::new()
    .route("/health", get(health))
    .route("/upload", post(upload))
    .layer(DefaultBodyLimit::max(usize::try_from(limit).unwrap_or(usize::MAX)))
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}
