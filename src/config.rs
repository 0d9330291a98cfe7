//! Loading assessment configuration (documents, counts, prompts, delivery) from TOML + env.
//!
//! See `AssessmentConfig` and `Prompts` for expected schema; a commented sample lives in
//! `config/assessment.example.toml`.

use std::collections::HashSet;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::allocate::ID_SEPARATOR;
use crate::dispatch::DeliveryMode;
use crate::domain::{DocumentRef, ALL_SOURCES};

pub const DEFAULT_QUESTION_COUNT: usize = 10;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct AssessmentConfig {
  /// Questions served per attempt.
  pub question_count: usize,
  /// Result collector endpoint; `None` disables delivery.
  pub collector_url: Option<String>,
  pub delivery_mode: DeliveryMode,
  pub delivery_timeout_secs: u64,
  /// Literal the candidate must type before an attempt starts.
  pub confirmation_phrase: String,
  /// Optional role/context hint passed to the generator.
  pub role_hint: Option<String>,
  pub min_text_chars: usize,
  pub max_source_chars: usize,
  pub fetch: FetchConfig,
  pub generation: GenerationConfig,
  pub prompts: Prompts,
  pub documents: Vec<DocumentRef>,
}

impl Default for AssessmentConfig {
  fn default() -> Self {
    Self {
      question_count: DEFAULT_QUESTION_COUNT,
      collector_url: None,
      delivery_mode: DeliveryMode::Detached,
      delivery_timeout_secs: 10,
      confirmation_phrase: "REALIZAR TEST".into(),
      role_hint: None,
      min_text_chars: 200,
      max_source_chars: 18_000,
      fetch: FetchConfig::default(),
      generation: GenerationConfig::default(),
      prompts: Prompts::default(),
      documents: Vec::new(),
    }
  }
}

impl AssessmentConfig {
  pub fn delivery_timeout(&self) -> Duration {
    Duration::from_secs(self.delivery_timeout_secs)
  }

  pub fn document(&self, key: &str) -> Option<&DocumentRef> {
    self.documents.iter().find(|d| d.key == key)
  }
}

/// Source retrieval policy.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
  pub timeout_secs: u64,
  pub max_attempts: usize,
  pub backoff_step_ms: u64,
}

impl Default for FetchConfig {
  fn default() -> Self {
    Self { timeout_secs: 20, max_attempts: 3, backoff_step_ms: 500 }
  }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
  pub model: String,
  pub timeout_secs: u64,
  pub temperature: f32,
}

impl Default for GenerationConfig {
  fn default() -> Self {
    Self { model: "gpt-4o-mini".into(), timeout_secs: 90, temperature: 0.4 }
  }
}

/// Prompts used by the generation client. Override them in TOML to tune tone or language.
/// The user template understands `{count}`, `{role}`, `{title}` and `{text}`.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Prompts {
  pub question_system: String,
  pub question_user_template: String,
}

impl Default for Prompts {
  fn default() -> Self {
    Self {
      question_system: "You write single-best-answer multiple-choice assessment items of medium to hard difficulty. \
        Every item must be answerable strictly from the supplied reference text; never rely on outside knowledge. \
        Each item has exactly 4 options, exactly one of them correct, and plausible distractors. \
        Do not prefix prompts or options with letters or numbers. Respond ONLY with JSON matching the schema.".into(),
      question_user_template: "Write {count} questions for a candidate applying as: {role}.\n\
        Reference document: {title}\n\n\
        Return JSON {\"questions\": [{\"id\": string, \"prompt\": string, \"options\": [4 strings], \"correctIndex\": 0-3}]}.\n\n\
        Reference text:\n\"\"\"\n{text}\n\"\"\"".into(),
    }
  }
}

/// Build configuration from ASSESSMENT_CONFIG_PATH (optional TOML) plus env overrides.
/// Read/parse failures are logged and defaults are used.
pub fn load_config_from_env() -> AssessmentConfig {
  let mut cfg = match std::env::var("ASSESSMENT_CONFIG_PATH") {
    Ok(path) => match std::fs::read_to_string(&path) {
      Ok(s) => match toml::from_str::<AssessmentConfig>(&s) {
        Ok(cfg) => {
          info!(target: "assessment_engine", %path, "Loaded assessment config (TOML)");
          cfg
        }
        Err(e) => {
          error!(target: "assessment_engine", %path, error = %e, "Failed to parse TOML config; using defaults");
          AssessmentConfig::default()
        }
      },
      Err(e) => {
        error!(target: "assessment_engine", %path, error = %e, "Failed to read TOML config file; using defaults");
        AssessmentConfig::default()
      }
    },
    Err(_) => AssessmentConfig::default(),
  };

  apply_env_overrides(&mut cfg, |k| std::env::var(k).ok());
  sanitize(&mut cfg);
  cfg
}

fn apply_env_overrides(cfg: &mut AssessmentConfig, var: impl Fn(&str) -> Option<String>) {
  if let Some(n) = var("QUESTION_COUNT").and_then(|v| v.parse::<usize>().ok()) {
    cfg.question_count = n;
  }
  if let Some(url) = var("RESULT_COLLECTOR_URL") {
    cfg.collector_url = Some(url);
  }
  if let Some(mode) = var("DELIVERY_MODE") {
    match mode.parse::<DeliveryMode>() {
      Ok(m) => cfg.delivery_mode = m,
      Err(e) => warn!(target: "assessment_engine", %mode, error = %e, "Ignoring DELIVERY_MODE"),
    }
  }
  if let Some(phrase) = var("CONFIRMATION_PHRASE") {
    cfg.confirmation_phrase = phrase;
  }
  if let Some(model) = var("OPENAI_MODEL") {
    cfg.generation.model = model;
  }
}

/// Drop unusable document entries and clamp nonsensical counts.
fn sanitize(cfg: &mut AssessmentConfig) {
  if cfg.question_count == 0 {
    warn!(target: "assessment_engine", default = DEFAULT_QUESTION_COUNT, "question_count = 0; using default");
    cfg.question_count = DEFAULT_QUESTION_COUNT;
  }
  if cfg.fetch.max_attempts == 0 {
    cfg.fetch.max_attempts = 1;
  }
  if cfg.collector_url.as_deref().is_some_and(|u| u.trim().is_empty()) {
    cfg.collector_url = None;
  }

  let mut seen = HashSet::new();
  cfg.documents.retain(|d| {
    let key = d.key.trim();
    if key.is_empty()
      || key.eq_ignore_ascii_case(ALL_SOURCES)
      || key.contains(ID_SEPARATOR)
      || !seen.insert(key.to_string())
    {
      error!(target: "assessment_engine", key = %d.key, url = %d.url, "Skipping document: empty, reserved, duplicate or contains ':'");
      return false;
    }
    true
  });
  if cfg.documents.is_empty() {
    warn!(target: "assessment_engine", "No documents configured; every start request will be rejected");
  }
}
