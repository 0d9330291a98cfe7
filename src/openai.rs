//! Minimal OpenAI-compatible client for question generation.
//!
//! One call shape: chat.completions with a strict `json_schema` response format.
//! Calls are instrumented and log model name, latency, and token usage (not contents).
//!
//! NOTE: We never log the API key, and response previews are truncated.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use crate::bank::{GenerationRequest, QuestionGenerator};
use crate::config::GenerationConfig;
use crate::error::AssessmentError;
use crate::util::trunc_for_log;

#[derive(Clone)]
pub struct OpenAI {
  pub client: reqwest::Client,
  pub api_key: String,
  pub base_url: String,
  pub model: String,
  pub temperature: f32,
}

impl OpenAI {
  /// Construct the client if we find OPENAI_API_KEY; otherwise return None.
  pub fn from_env(cfg: &GenerationConfig) -> Option<Self> {
    let api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.trim().is_empty())?;
    let base_url = std::env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());

    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(cfg.timeout_secs))
      .build()
      .ok()?;

    Some(Self { client, api_key, base_url, model: cfg.model.clone(), temperature: cfg.temperature })
  }

  /// Schema-constrained chat completion; returns the message content verbatim.
  #[instrument(level = "info", skip(self, system, user, schema), fields(model = %self.model))]
  async fn chat_schema(&self, system: &str, user: &str, schema: serde_json::Value) -> Result<String, AssessmentError> {
    let url = format!("{}/chat/completions", self.base_url);
    let req = ChatCompletionRequest {
      model: self.model.clone(),
      messages: vec![
        ChatMessageReq { role: "system".into(), content: system.into() },
        ChatMessageReq { role: "user".into(), content: user.into() },
      ],
      temperature: self.temperature,
      response_format: ResponseFormat {
        r#type: "json_schema".into(),
        json_schema: JsonSchemaSpec { name: "question_bank".into(), strict: true, schema },
      },
    };

    let res = self.client.post(&url)
      .header(USER_AGENT, "assessment-engine/0.1")
      .header(CONTENT_TYPE, "application/json")
      .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
      .json(&req).send().await
      .map_err(|e| AssessmentError::GenerationUnavailable(e.to_string()))?;

    if !res.status().is_success() {
      let status = res.status();
      let body = res.text().await.unwrap_or_default();
      let msg = extract_openai_error(&body).unwrap_or_else(|| trunc_for_log(&body, 200));
      return Err(AssessmentError::GenerationUnavailable(format!("OpenAI HTTP {}: {}", status, msg)));
    }

    let body: ChatCompletionResponse = res.json().await
      .map_err(|e| AssessmentError::GenerationMalformed(format!("unexpected completion body: {e}")))?;
    if let Some(usage) = &body.usage {
      info!(prompt_tokens = ?usage.prompt_tokens, completion_tokens = ?usage.completion_tokens, total_tokens = ?usage.total_tokens, "OpenAI usage");
    }
    let choice = body.choices.into_iter().next();
    if let Some(refusal) = choice.as_ref().and_then(|c| c.message.refusal.clone()) {
      return Err(AssessmentError::GenerationMalformed(format!("model refused: {refusal}")));
    }
    let text = choice.and_then(|c| c.message.content).unwrap_or_default();
    if text.trim().is_empty() {
      return Err(AssessmentError::GenerationMalformed("empty completion".into()));
    }
    Ok(text)
  }
}

#[async_trait]
impl QuestionGenerator for OpenAI {
  #[instrument(level = "info", skip(self, request), fields(source_key = %request.source_key, count = request.count, user_len = request.user.len()))]
  async fn generate(&self, request: &GenerationRequest) -> Result<String, AssessmentError> {
    let start = Instant::now();
    let result = self.chat_schema(&request.system, &request.user, request.schema.clone()).await;
    let elapsed = start.elapsed();

    match &result {
      Ok(text) => info!(target: "generation", ?elapsed, bytes = text.len(), "Model response received"),
      Err(e) => error!(target: "generation", ?elapsed, error = %e, "Model call failed during question generation"),
    }
    result
  }
}

// --- Chat DTOs ---

#[derive(Serialize)]
struct ChatCompletionRequest {
  model: String,
  messages: Vec<ChatMessageReq>,
  temperature: f32,
  response_format: ResponseFormat,
}
#[derive(Serialize)]
struct ChatMessageReq { role: String, content: String }
#[derive(Serialize)]
struct ResponseFormat {
  #[serde(rename = "type")] r#type: String,
  json_schema: JsonSchemaSpec,
}
#[derive(Serialize)]
struct JsonSchemaSpec { name: String, strict: bool, schema: serde_json::Value }

#[derive(Deserialize)]
struct ChatCompletionResponse {
  choices: Vec<ChatChoice>,
  #[serde(default)] usage: Option<Usage>,
}
#[derive(Deserialize)]
struct ChatChoice { message: ChatMessageResp }
#[derive(Deserialize)]
struct ChatMessageResp {
  content: Option<String>,
  #[serde(default)] refusal: Option<String>,
}
#[derive(Deserialize)]
struct Usage {
  #[serde(default)] prompt_tokens: Option<u32>,
  #[serde(default)] completion_tokens: Option<u32>,
  #[serde(default)] total_tokens: Option<u32>,
}

/// Try to extract a clean error message from OpenAI error body.
fn extract_openai_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  struct EWrap { error: EObj }
  #[derive(Deserialize)]
  struct EObj { message: String }
  match serde_json::from_str::<EWrap>(body) {
    Ok(w) => Some(w.error.message),
    Err(_) => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::{Arc, Mutex};

  use axum::{extract::State, http::StatusCode, routing::post, Json, Router};

  #[test]
  fn error_bodies_yield_their_message() {
    assert_eq!(extract_openai_error(r#"{"error": {"message": "bad key"}}"#).as_deref(), Some("bad key"));
    assert_eq!(extract_openai_error("gateway exploded"), None);
  }

  type Seen = Arc<Mutex<Option<serde_json::Value>>>;

  async fn completions(State(seen): State<Seen>, Json(body): Json<serde_json::Value>) -> Json<serde_json::Value> {
    *seen.lock().unwrap() = Some(body);
    Json(serde_json::json!({
      "choices": [{ "message": { "content": "{\"questions\": []}" } }],
      "usage": { "prompt_tokens": 10, "completion_tokens": 3, "total_tokens": 13 }
    }))
  }

  async fn unauthorized() -> (StatusCode, &'static str) {
    (StatusCode::UNAUTHORIZED, r#"{"error": {"message": "Incorrect API key"}}"#)
  }

  async fn client_for(app: Router) -> OpenAI {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    OpenAI {
      client: reqwest::Client::new(),
      api_key: "test-key".into(),
      base_url: format!("http://{addr}/v1"),
      model: "test-model".into(),
      temperature: 0.2,
    }
  }

  fn request() -> GenerationRequest {
    GenerationRequest {
      source_key: "ops".into(),
      count: 5,
      system: "sys".into(),
      user: "usr".into(),
      schema: crate::bank::question_schema(5),
    }
  }

  #[tokio::test]
  async fn sends_schema_and_returns_content() {
    let seen: Seen = Arc::default();
    let app = Router::new().route("/v1/chat/completions", post(completions)).with_state(seen.clone());
    let client = client_for(app).await;

    let raw = client.generate(&request()).await.unwrap();
    assert_eq!(raw, "{\"questions\": []}");

    let body = seen.lock().unwrap().clone().unwrap();
    assert_eq!(body["model"], "test-model");
    assert_eq!(body["response_format"]["type"], "json_schema");
    assert_eq!(body["response_format"]["json_schema"]["strict"], true);
    assert_eq!(body["messages"][0]["role"], "system");
  }

  #[tokio::test]
  async fn http_errors_are_generation_unavailable() {
    let app = Router::new().route("/v1/chat/completions", post(unauthorized));
    let client = client_for(app).await;
    let err = client.generate(&request()).await.unwrap_err();
    assert!(matches!(err, AssessmentError::GenerationUnavailable(ref m) if m.contains("Incorrect API key")));
  }
}
