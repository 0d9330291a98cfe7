//! HTTP endpoint handlers. These are thin wrappers that forward to the session engine.
//! Each handler is instrumented; failures render through `AssessmentError`.

use std::sync::Arc;
use axum::{extract::{Path, State}, http::StatusCode, Json, response::IntoResponse};
use tracing::{info, instrument};

use crate::error::AssessmentError;
use crate::protocol::*;
use crate::state::AppState;

#[instrument(level = "info")]
pub async fn http_health() -> impl IntoResponse { Json(HealthOut { ok: true }) }

#[instrument(level = "info", skip(state))]
pub async fn http_get_sources(State(state): State<Arc<AppState>>) -> impl IntoResponse {
  Json(sources_out(state.engine.documents(), state.cfg.question_count, state.engine.generation_enabled()))
}

#[instrument(level = "info", skip(state, body), fields(source = %body.source, id_len = body.candidate_id.len()))]
pub async fn http_post_start(
  State(state): State<Arc<AppState>>,
  Json(body): Json<StartIn>,
) -> Result<(StatusCode, Json<StartOut>), AssessmentError> {
  let started = state.engine.start(body.into()).await?;
  info!(target: "assessment", attempt_id = %started.attempt_id, total = started.questions.len(), "HTTP attempt started");
  Ok((StatusCode::CREATED, Json(StartOut::from(started))))
}

#[instrument(level = "info", skip(state))]
pub async fn http_get_attempt(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<StatusOut>, AssessmentError> {
  Ok(Json(state.engine.status(&id).await?.into()))
}

#[instrument(level = "info", skip(state, body), fields(question_id = %body.question_id))]
pub async fn http_post_answer(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
  Json(body): Json<AnswerIn>,
) -> Result<Json<AnswerOut>, AssessmentError> {
  let ack = state.engine.record_answer(&id, &body.question_id, &body.choice_letter).await?;
  Ok(Json(ack.into()))
}

#[instrument(level = "info", skip(state))]
pub async fn http_post_finish(
  State(state): State<Arc<AppState>>,
  Path(id): Path<String>,
) -> Result<Json<FinishOut>, AssessmentError> {
  let finished = state.engine.finish(&id).await?;
  info!(target: "assessment", attempt_id = %id, display = %finished.summary.display, delivery = ?finished.delivery, "HTTP attempt finished");
  Ok(Json(finished.into()))
}
