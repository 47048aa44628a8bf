//! HTTP handlers for the upload service.

use std::sync::Arc;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use tracing::{debug, info, warn};

use rca_engine::types::{AnalysisContext, RcaReport};
use rca_engine::{CancelToken, RcaError, RunOptions, TestPlan, Upload};

use crate::state::AppState;
use crate::types::ApiError;

pub async fn health() -> &'static str {
  "ok"
}

#[derive(Default)]
struct UploadForm {
  upload: Option<Upload>,
  test_plan: Option<String>,
  context: AnalysisContext,
}

pub async fn upload(
  State(state): State<Arc<AppState>>,
  multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<RcaReport>, ApiError> {
  let result = run_upload(state, multipart).await;
  if let Err(e) = &result {
    warn!(code = %e.body.error_code, status = %e.status, "upload rejected");
  }
  result
}

async fn run_upload(
  state: Arc<AppState>,
  multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<RcaReport>, ApiError> {
  let mut multipart = multipart
    .map_err(|_| RcaError::InvalidContentType("expected multipart/form-data".into()))?;
  let form = read_form(&mut multipart).await?;

  let upload = form.upload.ok_or_else(|| RcaError::MissingField("file".into()))?;
  let test_plan = form
    .test_plan
    .filter(|p| !p.trim().is_empty())
    .map(|p| TestPlan::from_json(&p))
    .transpose()?;

  let orchestrator = Arc::clone(&state.orchestrator);
  let intake = tokio::task::spawn_blocking(move || orchestrator.accept(upload))
    .await
    .map_err(|e| RcaError::internal(format!("intake task failed: {}", e)))??;

  let redactor = state.redaction.snapshot()?;

  // Client disconnect drops this future, and with it the guard.
  let cancel = CancelToken::new();
  let _guard = cancel.drop_guard();

  let options = RunOptions {
    test_plan,
    context: form.context,
    ..RunOptions::default()
  };
  let report = Arc::clone(&state.orchestrator)
    .analyze_with_insights(intake, redactor, options, cancel.clone())
    .await?;

  info!(
    run_id = %report.run_id,
    events = report.events.len(),
    issues = report.issues.len(),
    "upload analyzed"
  );
  Ok(Json(report))
}

async fn read_form(multipart: &mut Multipart) -> Result<UploadForm, ApiError> {
  let mut form = UploadForm::default();
  while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
    let name = field.name().unwrap_or_default().to_string();
    match name.as_str() {
      "file" => {
        let file_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(multipart_error)?;
        form.upload = Some(Upload {
          file_name,
          content_type,
          declared_size: None,
          bytes: bytes.to_vec(),
        });
      }
      "test_plan" => {
        form.test_plan = Some(field.text().await.map_err(multipart_error)?);
      }
      "deployment_method" | "test_environment" | "app_version" | "previous_version" | "build_changes" => {
        let value = field.text().await.map_err(multipart_error)?;
        let value = Some(value.trim().to_string()).filter(|v| !v.is_empty());
        let ctx = &mut form.context;
        match name.as_str() {
          "deployment_method" => ctx.deployment_method = value,
          "test_environment" => ctx.test_environment = value,
          "app_version" => ctx.app_version = value,
          "previous_version" => ctx.previous_version = value,
          _ => ctx.build_changes = value,
        }
      }
      other => debug!(field = other, "ignoring unknown form field"),
    }
  }
  Ok(form)
}

fn multipart_error(err: MultipartError) -> ApiError {
  if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
    ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, "E.REQ.002", "upload exceeds the size limit")
  } else {
    ApiError::from(RcaError::InvalidContentType("malformed multipart body".into()))
  }
}
