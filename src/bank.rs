//! Question bank generation: build the generation request for one extracted
//! source, then parse, sample, normalize and validate what comes back.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use rand::{seq::SliceRandom, Rng};
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, info, instrument};

use crate::config::Prompts;
use crate::domain::{ExtractedText, QuestionRecord};
use crate::error::AssessmentError;
use crate::util::{fill_template, trunc_for_log, truncate_chars};

/// One call to the generative capability.
#[derive(Clone, Debug)]
pub struct GenerationRequest {
  pub source_key: String,
  /// Items requested (already oversampled).
  pub count: usize,
  pub system: String,
  pub user: String,
  /// JSON schema the response must follow.
  pub schema: serde_json::Value,
}

/// Black-box "produce N graded multiple-choice items from text" capability.
/// Returns the raw structured output; parsing and validation happen here, not in the backend.
#[async_trait]
pub trait QuestionGenerator: Send + Sync {
  async fn generate(&self, request: &GenerationRequest) -> Result<String, AssessmentError>;
}

/// Ask for more than needed so the served subset is a random draw.
pub fn oversampled(target: usize) -> usize {
  target + (target / 2).max(2)
}

/// Output schema: `{ questions: [{ id, prompt, options[4], correctIndex 0..=3 }] }`.
pub fn question_schema(count: usize) -> serde_json::Value {
  serde_json::json!({
    "type": "object",
    "additionalProperties": false,
    "required": ["questions"],
    "properties": {
      "questions": {
        "type": "array",
        "minItems": count,
        "items": {
          "type": "object",
          "additionalProperties": false,
          "required": ["id", "prompt", "options", "correctIndex"],
          "properties": {
            "id": { "type": "string" },
            "prompt": { "type": "string" },
            "options": { "type": "array", "items": { "type": "string" }, "minItems": 4, "maxItems": 4 },
            "correctIndex": { "type": "integer", "minimum": 0, "maximum": 3 }
          }
        }
      }
    }
  })
}

/// Builds requests from configured prompts and forwards them to the generator.
#[derive(Clone)]
pub struct BankGenerator {
  generator: Arc<dyn QuestionGenerator>,
  prompts: Prompts,
  role_hint: Option<String>,
  max_source_chars: usize,
}

impl BankGenerator {
  pub fn new(generator: Arc<dyn QuestionGenerator>, prompts: Prompts, role_hint: Option<String>, max_source_chars: usize) -> Self {
    Self { generator, prompts, role_hint, max_source_chars }
  }

  pub fn request_for(&self, source_key: &str, source: &ExtractedText, target: usize) -> GenerationRequest {
    let count = oversampled(target);
    let count_s = count.to_string();
    let role = self.role_hint.as_deref().unwrap_or("a general position");
    let text = truncate_chars(&source.text, self.max_source_chars);
    let user = fill_template(
      &self.prompts.question_user_template,
      &[("count", &count_s), ("role", role), ("title", &source.title), ("text", text)],
    );
    GenerationRequest {
      source_key: source_key.to_string(),
      count,
      system: fill_template(&self.prompts.question_system, &[("count", &count_s)]),
      user,
      schema: question_schema(count),
    }
  }

  /// One generation call for `target` served questions; returns the raw output.
  #[instrument(level = "info", skip(self, source), fields(%source_key, target, text_len = source.text.len()))]
  pub async fn request_raw(&self, source_key: &str, source: &ExtractedText, target: usize) -> Result<String, AssessmentError> {
    let request = self.request_for(source_key, source, target);
    let raw = self.generator.generate(&request).await?;
    debug!(target: "generation", %source_key, preview = %trunc_for_log(&raw, 120), "Raw bank received");
    Ok(raw)
  }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEnvelope {
  Wrapped { questions: Vec<RawQuestion> },
  Bare(Vec<RawQuestion>),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuestion {
  #[serde(default)]
  id: serde_json::Value,
  #[serde(default)]
  prompt: String,
  #[serde(default)]
  options: Vec<String>,
  #[serde(default = "missing_index")]
  correct_index: i64,
}

fn missing_index() -> i64 {
  -1
}

fn parse_bank(raw: &str) -> Result<Vec<RawQuestion>, AssessmentError> {
  let body = strip_code_fence(raw);
  let envelope: RawEnvelope =
    serde_json::from_str(body).map_err(|e| AssessmentError::GenerationMalformed(format!("not a question array: {e}")))?;
  Ok(match envelope {
    RawEnvelope::Wrapped { questions } => questions,
    RawEnvelope::Bare(questions) => questions,
  })
}

/// Tolerate a ```json fence around otherwise valid output.
fn strip_code_fence(raw: &str) -> &str {
  let t = raw.trim();
  let Some(rest) = t.strip_prefix("```") else { return t };
  let rest = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
  rest.strip_suffix("```").unwrap_or(rest).trim()
}

const MAX_LABEL_PASSES: usize = 16;

fn label_re() -> Option<&'static Regex> {
  static LABEL: OnceLock<Option<Regex>> = OnceLock::new();
  LABEL
    .get_or_init(|| Regex::new(r"^\s*\(?(?:[A-Da-d]|[0-9]{1,2})(?:\)\s*|[.:\-]\s+)").ok())
    .as_ref()
}

/// Remove a leading enumeration label ("A)", "1.", "(b)", "a- ") from generated text.
/// Stacked prefixes like "A) 1. text" are removed until none is left.
pub fn strip_label(text: &str) -> String {
  let Some(re) = label_re() else {
    return text.trim().to_string();
  };
  let mut out = text.trim().to_string();
  for _ in 0..MAX_LABEL_PASSES {
    let next = re.replace(&out, "").trim().to_string();
    if next == out {
      break;
    }
    out = next;
  }
  out
}

fn id_string(v: &serde_json::Value) -> String {
  match v {
    serde_json::Value::String(s) => s.trim().to_string(),
    serde_json::Value::Number(n) => n.to_string(),
    _ => String::new(),
  }
}

fn into_record(position: usize, q: RawQuestion) -> Result<QuestionRecord, AssessmentError> {
  let invalid = |reason: String| AssessmentError::QuestionInvalid { position, reason };

  let id = id_string(&q.id);
  if id.is_empty() {
    return Err(invalid("missing id".into()));
  }
  let prompt = strip_label(&q.prompt);
  if prompt.is_empty() {
    return Err(invalid(format!("question '{id}' has an empty prompt")));
  }
  let options: Vec<String> = q.options.iter().map(|o| strip_label(o)).collect();
  let options: [String; 4] = options
    .try_into()
    .map_err(|v: Vec<String>| invalid(format!("question '{id}' has {} options, expected 4", v.len())))?;
  if options.iter().any(|o| o.is_empty()) {
    return Err(invalid(format!("question '{id}' has an empty option")));
  }
  let correct_index = usize::try_from(q.correct_index)
    .ok()
    .filter(|i| *i < 4)
    .ok_or_else(|| invalid(format!("question '{id}' has correctIndex {}", q.correct_index)))?;

  Ok(QuestionRecord { id, prompt, options, correct_index, source: None })
}

/// Parse raw generator output and draw exactly `target` valid questions from it.
pub fn build_bank<R: Rng + ?Sized>(raw: &str, target: usize, rng: &mut R) -> Result<Vec<QuestionRecord>, AssessmentError> {
  let mut items = parse_bank(raw)?;
  if items.len() < target {
    return Err(AssessmentError::GenerationInsufficient { got: items.len(), needed: target });
  }
  let returned = items.len();
  items.shuffle(rng);
  items.truncate(target);

  let mut seen = HashSet::new();
  let mut bank = Vec::with_capacity(target);
  for (i, item) in items.into_iter().enumerate() {
    let record = into_record(i + 1, item)?;
    if !seen.insert(record.id.clone()) {
      return Err(AssessmentError::QuestionInvalid { position: i + 1, reason: format!("duplicate id '{}'", record.id) });
    }
    bank.push(record);
  }
  info!(target: "generation", returned, served = bank.len(), "Question bank built");
  Ok(bank)
}
