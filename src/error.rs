//! Error taxonomy for the assessment engine and its HTTP rendering.

use axum::{
  http::StatusCode,
  response::{IntoResponse, Response},
  Json,
};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssessmentError {
  #[error("invalid request: {0}")]
  Validation(String),

  #[error("source unreachable ({url}): {cause}")]
  SourceUnreachable { url: String, cause: String },

  #[error("no readable text in source '{source_key}': {reason}")]
  ExtractionEmpty { source_key: String, reason: String },

  #[error("source '{source_key}' yielded {chars} characters, at least {min} required")]
  ExtractionInsufficient { source_key: String, chars: usize, min: usize },

  #[error("every configured source failed; first failure: {first}")]
  AllSourcesFailed { first: Box<AssessmentError> },

  #[error("question generation unavailable: {0}")]
  GenerationUnavailable(String),

  #[error("generated questions are malformed: {0}")]
  GenerationMalformed(String),

  #[error("generation returned {got} questions, {needed} required")]
  GenerationInsufficient { got: usize, needed: usize },

  #[error("generated question #{position} is invalid: {reason}")]
  QuestionInvalid { position: usize, reason: String },

  #[error("attempt not found: {0}")]
  AttemptNotFound(String),

  #[error("question not found in attempt: {0}")]
  QuestionNotFound(String),

  #[error("invalid choice '{0}', expected one of A, B, C, D")]
  InvalidChoice(String),

  #[error("attempt incomplete: {answered} of {total} questions answered")]
  IncompleteAttempt { answered: usize, total: usize },

  #[error("attempt already finished: {0}")]
  AttemptFinished(String),
}

impl AssessmentError {
  /// Stable machine-readable code for clients and logs.
  pub fn kind(&self) -> &'static str {
    match self {
      AssessmentError::Validation(_) => "validation_error",
      AssessmentError::SourceUnreachable { .. } => "source_unreachable",
      AssessmentError::ExtractionEmpty { .. } => "extraction_empty",
      AssessmentError::ExtractionInsufficient { .. } => "extraction_insufficient",
      AssessmentError::AllSourcesFailed { .. } => "all_sources_failed",
      AssessmentError::GenerationUnavailable(_) => "generation_unavailable",
      AssessmentError::GenerationMalformed(_) => "generation_malformed",
      AssessmentError::GenerationInsufficient { .. } => "generation_insufficient",
      AssessmentError::QuestionInvalid { .. } => "question_invalid",
      AssessmentError::AttemptNotFound(_) => "attempt_not_found",
      AssessmentError::QuestionNotFound(_) => "question_not_found",
      AssessmentError::InvalidChoice(_) => "invalid_choice",
      AssessmentError::IncompleteAttempt { .. } => "incomplete_attempt",
      AssessmentError::AttemptFinished(_) => "attempt_finished",
    }
  }

  pub fn status(&self) -> StatusCode {
    match self {
      AssessmentError::Validation(_) | AssessmentError::InvalidChoice(_) => StatusCode::BAD_REQUEST,
      AssessmentError::AttemptNotFound(_) | AssessmentError::QuestionNotFound(_) => StatusCode::NOT_FOUND,
      AssessmentError::IncompleteAttempt { .. } | AssessmentError::AttemptFinished(_) => StatusCode::CONFLICT,
      AssessmentError::GenerationUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
      AssessmentError::SourceUnreachable { .. }
      | AssessmentError::ExtractionEmpty { .. }
      | AssessmentError::ExtractionInsufficient { .. }
      | AssessmentError::AllSourcesFailed { .. }
      | AssessmentError::GenerationMalformed(_)
      | AssessmentError::GenerationInsufficient { .. }
      | AssessmentError::QuestionInvalid { .. } => StatusCode::BAD_GATEWAY,
    }
  }
}

impl IntoResponse for AssessmentError {
  fn into_response(self) -> Response {
    let status = self.status();
    if status.is_server_error() {
      warn!(target: "assessment", kind = self.kind(), error = %self, "Request failed upstream");
    } else {
      info!(target: "assessment", kind = self.kind(), error = %self, "Request rejected");
    }
    let body = serde_json::json!({
      "error": self.kind(),
      "message": self.to_string(),
    });
    (status, Json(body)).into_response()
  }
}
