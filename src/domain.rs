//! Domain models: document references, extracted text, question records,
//! attempts with their answers, and the scored result payload.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Selector value that asks for every configured document at once.
pub const ALL_SOURCES: &str = "all";

/// Option letters in display order; index = `correct_index` / `choice_index`.
pub const LETTERS: [char; 4] = ['A', 'B', 'C', 'D'];

/// A configured reference document: where to fetch it and its logical key.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentRef {
  pub key: String,
  pub url: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub title: Option<String>,
}

/// Resolved form of the `source` field of a start request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceSelector {
  One(String),
  All,
}

impl SourceSelector {
  pub fn parse(raw: &str) -> Self {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case(ALL_SOURCES) { SourceSelector::All } else { SourceSelector::One(raw.to_string()) }
  }
}

/// Output of the text extractor for one document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtractedText {
  pub title: String,
  pub text: String,
}

/// One graded multiple-choice item. `correct_index` never leaves the server
/// except inside the result payload.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuestionRecord {
  pub id: String,
  pub prompt: String,
  pub options: [String; 4],
  pub correct_index: usize,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub source: Option<String>,
}

/// A recorded choice, derived from a single submitted letter.
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
  pub choice_index: usize,
  pub choice_letter: char,
}

impl Answer {
  /// Map "A".."D" (case-insensitive, surrounding whitespace ignored) to an answer.
  pub fn from_letter(raw: &str) -> Option<Self> {
    let mut chars = raw.trim().chars();
    let letter = chars.next()?.to_ascii_uppercase();
    if chars.next().is_some() {
      return None;
    }
    let choice_index = LETTERS.iter().position(|l| *l == letter)?;
    Some(Answer { choice_index, choice_letter: letter })
  }
}

/// One candidate's session. Owned exclusively by the attempt store.
#[derive(Clone, Debug)]
pub struct Attempt {
  pub id: String,
  pub candidate_id: String,
  pub candidate_name: String,
  pub sources: Vec<DocumentRef>,
  pub title: String,
  pub started_at: DateTime<Utc>,
  pub deck: Vec<QuestionRecord>,
  pub answers: HashMap<String, Answer>,
  pub finished_at: Option<DateTime<Utc>>,
}

impl Attempt {
  pub fn is_finished(&self) -> bool {
    self.finished_at.is_some()
  }

  pub fn question(&self, question_id: &str) -> Option<&QuestionRecord> {
    self.deck.iter().find(|q| q.id == question_id)
  }
}

#[derive(Clone, Debug, Serialize)]
pub struct CandidateInfo {
  pub id: String,
  pub name: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct LetteredOption {
  pub letter: char,
  pub text: String,
}

/// Per-question breakdown inside the result payload.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResult {
  pub id: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub source: Option<String>,
  pub prompt: String,
  pub options: Vec<LetteredOption>,
  pub selected_letter: char,
  pub selected_text: String,
  pub correct_letter: char,
  pub correct_text: String,
  pub is_correct: bool,
}

/// Scored projection of a finished attempt, sent to the result collector.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultPayload {
  pub attempt_id: String,
  pub candidate: CandidateInfo,
  pub score: usize,
  pub total: usize,
  pub fraction: String,
  pub percent: u32,
  pub display: String,
  pub source_title: String,
  pub sources: Vec<DocumentRef>,
  pub started_at: DateTime<Utc>,
  pub finished_at: DateTime<Utc>,
  pub duration_seconds: i64,
  pub questions: Vec<QuestionResult>,
}
