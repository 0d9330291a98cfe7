//! Attempt lifecycle: start → answering → finished.
//!
//! `SessionEngine` validates start input before touching the network, acquires
//! text, builds the deck, and only then stores the attempt, so a failed start
//! leaves nothing behind. Answers are first-wins; finish is gated on a complete
//! answer set and closes the attempt for good.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rand::{rngs::StdRng, SeedableRng};
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::allocate::{combine, split, SourceDraw};
use crate::bank::{build_bank, BankGenerator};
use crate::config::AssessmentConfig;
use crate::dispatch::{DeliveryStatus, ResultDispatcher};
use crate::domain::{
  Answer, Attempt, CandidateInfo, DocumentRef, LetteredOption, QuestionRecord, QuestionResult, ResultPayload,
  SourceSelector, LETTERS,
};
use crate::error::AssessmentError;
use crate::extract::TextExtractor;
use crate::store::AttemptStore;

const MIN_NAME_CHARS: usize = 3;
const MIN_ID_CHARS: usize = 5;

/// Raw start input, exactly as the candidate typed it.
#[derive(Clone, Debug)]
pub struct StartRequest {
  pub candidate_name: String,
  pub candidate_id: String,
  pub confirmation: String,
  pub source: String,
}

/// Candidate-safe view of a question: no correct index.
#[derive(Clone, Debug, Serialize)]
pub struct PublicQuestion {
  pub id: String,
  pub prompt: String,
  pub options: [String; 4],
}

impl From<&QuestionRecord> for PublicQuestion {
  fn from(q: &QuestionRecord) -> Self {
    Self { id: q.id.clone(), prompt: q.prompt.clone(), options: q.options.clone() }
  }
}

#[derive(Clone, Debug)]
pub struct StartedAttempt {
  pub attempt_id: String,
  pub source_title: String,
  pub questions: Vec<PublicQuestion>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnswerAck {
  pub question_id: String,
  /// False when an answer for this question already existed.
  pub recorded: bool,
  pub answered: usize,
  pub total: usize,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSummary {
  pub score: usize,
  pub total: usize,
  pub fraction: String,
  pub percent: u32,
  pub display: String,
}

#[derive(Clone, Debug)]
pub struct FinishedAttempt {
  pub summary: ScoreSummary,
  pub result: ResultPayload,
  pub delivery: DeliveryStatus,
}

#[derive(Clone, Debug)]
pub struct AttemptStatus {
  pub attempt_id: String,
  pub source_title: String,
  pub total: usize,
  pub answers: BTreeMap<String, char>,
  pub finished: bool,
}

/// Validated start input.
struct Admission {
  name: String,
  id: String,
  selector: SourceSelector,
  docs: Vec<DocumentRef>,
}

/// A deck ready to be stored, with the documents it was actually drawn from.
struct Deck {
  questions: Vec<QuestionRecord>,
  title: String,
  sources: Vec<DocumentRef>,
}

pub struct SessionEngine {
  cfg: Arc<AssessmentConfig>,
  store: Arc<AttemptStore>,
  extractor: TextExtractor,
  banks: Option<BankGenerator>,
  dispatcher: ResultDispatcher,
  rng: Mutex<StdRng>,
}

impl SessionEngine {
  pub fn new(
    cfg: Arc<AssessmentConfig>,
    store: Arc<AttemptStore>,
    extractor: TextExtractor,
    banks: Option<BankGenerator>,
    dispatcher: ResultDispatcher,
  ) -> Self {
    Self::with_rng(cfg, store, extractor, banks, dispatcher, StdRng::from_entropy())
  }

  pub fn with_rng(
    cfg: Arc<AssessmentConfig>,
    store: Arc<AttemptStore>,
    extractor: TextExtractor,
    banks: Option<BankGenerator>,
    dispatcher: ResultDispatcher,
    rng: StdRng,
  ) -> Self {
    Self { cfg, store, extractor, banks, dispatcher, rng: Mutex::new(rng) }
  }

  pub fn documents(&self) -> &[DocumentRef] {
    &self.cfg.documents
  }

  pub fn generation_enabled(&self) -> bool {
    self.banks.is_some()
  }

  // Only held in synchronous sections; a poisoned lock still holds a usable generator.
  fn rng(&self) -> MutexGuard<'_, StdRng> {
    self.rng.lock().unwrap_or_else(|e| e.into_inner())
  }

  fn admit(&self, req: &StartRequest) -> Result<Admission, AssessmentError> {
    let name = req.candidate_name.trim();
    if name.chars().count() < MIN_NAME_CHARS {
      return Err(AssessmentError::Validation(format!("candidate name must have at least {MIN_NAME_CHARS} characters")));
    }
    let id = req.candidate_id.trim();
    if id.chars().count() < MIN_ID_CHARS || !id.chars().all(|c| c.is_alphanumeric() || c == '-') {
      return Err(AssessmentError::Validation(format!(
        "candidate id must be at least {MIN_ID_CHARS} letters, digits or hyphens"
      )));
    }
    if req.confirmation != self.cfg.confirmation_phrase {
      return Err(AssessmentError::Validation(format!("type '{}' exactly to begin", self.cfg.confirmation_phrase)));
    }

    let selector = SourceSelector::parse(&req.source);
    let docs = match &selector {
      SourceSelector::All if self.cfg.documents.is_empty() => {
        return Err(AssessmentError::Validation("no documents are configured".into()))
      }
      SourceSelector::All => self.cfg.documents.clone(),
      SourceSelector::One(key) => match self.cfg.document(key) {
        Some(doc) => vec![doc.clone()],
        None => return Err(AssessmentError::Validation(format!("unknown source '{key}'"))),
      },
    };
    Ok(Admission { name: name.to_string(), id: id.to_string(), selector, docs })
  }

  /// Validate, acquire, generate, allocate and store a new attempt.
  #[instrument(level = "info", skip(self, req), fields(source = %req.source))]
  pub async fn start(&self, req: StartRequest) -> Result<StartedAttempt, AssessmentError> {
    let admission = self.admit(&req)?;
    let Some(banks) = &self.banks else {
      return Err(AssessmentError::GenerationUnavailable("no generation backend is configured".into()));
    };

    let total = self.cfg.question_count;
    let deck = match &admission.selector {
      SourceSelector::One(_) => self.single_source_deck(banks, &admission.docs[0], total).await?,
      SourceSelector::All => self.combined_deck(banks, &admission.docs, total).await?,
    };

    let attempt = Attempt {
      id: Uuid::new_v4().to_string(),
      candidate_id: admission.id,
      candidate_name: admission.name,
      sources: deck.sources,
      title: deck.title,
      started_at: Utc::now(),
      deck: deck.questions,
      answers: Default::default(),
      finished_at: None,
    };
    let started = StartedAttempt {
      attempt_id: attempt.id.clone(),
      source_title: attempt.title.clone(),
      questions: attempt.deck.iter().map(PublicQuestion::from).collect(),
    };
    self.store.insert(attempt).await;
    info!(target: "assessment", attempt_id = %started.attempt_id, title = %started.source_title, total = started.questions.len(), "Attempt started");
    Ok(started)
  }

  async fn single_source_deck(&self, banks: &BankGenerator, doc: &DocumentRef, total: usize) -> Result<Deck, AssessmentError> {
    let text = self.extractor.extract(doc).await?;
    let raw = banks.request_raw(&doc.key, &text, total).await?;
    let mut questions = build_bank(&raw, total, &mut *self.rng())?;
    for q in &mut questions {
      q.source = Some(doc.key.clone());
    }
    Ok(Deck { questions, title: text.title, sources: vec![doc.clone()] })
  }

  async fn combined_deck(&self, banks: &BankGenerator, docs: &[DocumentRef], total: usize) -> Result<Deck, AssessmentError> {
    let extracted = self.extractor.extract_all(docs).await?;
    let counts = split(total, extracted.len());
    let plan: Vec<_> = extracted
      .iter()
      .zip(counts)
      .filter(|(_, count)| *count > 0)
      .collect();

    let raws = join_all(plan.iter().map(|((doc, text), count)| banks.request_raw(&doc.key, text, *count))).await;

    let questions = {
      let mut rng = self.rng();
      let mut draws = Vec::with_capacity(plan.len());
      for (((doc, _), count), raw) in plan.iter().zip(raws) {
        let bank = build_bank(&raw?, *count, &mut *rng)?;
        draws.push(SourceDraw { key: doc.key.clone(), bank, count: *count });
      }
      combine(draws, &mut *rng)?
    };

    let title = extracted.iter().map(|(_, t)| t.title.as_str()).collect::<Vec<_>>().join(" + ");
    let sources = extracted.into_iter().map(|(doc, _)| doc).collect();
    Ok(Deck { questions, title, sources })
  }

  /// Record the first answer for a question; later submissions are no-ops.
  #[instrument(level = "info", skip(self))]
  pub async fn record_answer(&self, attempt_id: &str, question_id: &str, letter: &str) -> Result<AnswerAck, AssessmentError> {
    let handle = self
      .store
      .get(attempt_id)
      .await
      .ok_or_else(|| AssessmentError::AttemptNotFound(attempt_id.to_string()))?;
    let mut attempt = handle.lock().await;

    if attempt.is_finished() {
      return Err(AssessmentError::AttemptFinished(attempt_id.to_string()));
    }
    if attempt.question(question_id).is_none() {
      return Err(AssessmentError::QuestionNotFound(question_id.to_string()));
    }
    let answer = Answer::from_letter(letter).ok_or_else(|| AssessmentError::InvalidChoice(letter.to_string()))?;

    let recorded = !attempt.answers.contains_key(question_id);
    if recorded {
      attempt.answers.insert(question_id.to_string(), answer);
    } else {
      info!(target: "assessment", "Duplicate answer ignored");
    }
    Ok(AnswerAck {
      question_id: question_id.to_string(),
      recorded,
      answered: attempt.answers.len(),
      total: attempt.deck.len(),
    })
  }

  /// Score a fully answered attempt, close it and hand the result to the dispatcher.
  #[instrument(level = "info", skip(self))]
  pub async fn finish(&self, attempt_id: &str) -> Result<FinishedAttempt, AssessmentError> {
    let handle = self
      .store
      .get(attempt_id)
      .await
      .ok_or_else(|| AssessmentError::AttemptNotFound(attempt_id.to_string()))?;

    let result = {
      let mut attempt = handle.lock().await;
      if attempt.is_finished() {
        return Err(AssessmentError::AttemptFinished(attempt_id.to_string()));
      }
      let finished_at = Utc::now();
      let result = score(&attempt, finished_at)?;
      attempt.finished_at = Some(finished_at);
      result
    };

    let summary = ScoreSummary {
      score: result.score,
      total: result.total,
      fraction: result.fraction.clone(),
      percent: result.percent,
      display: result.display.clone(),
    };
    info!(target: "assessment", score = summary.score, total = summary.total, percent = summary.percent, "Attempt finished");

    let delivery = self.dispatcher.dispatch(result.clone()).await;
    if let DeliveryStatus::Failed { reason } = &delivery {
      warn!(target: "assessment", %reason, "Result not delivered; finish still succeeds");
    }
    Ok(FinishedAttempt { summary, result, delivery })
  }

  pub async fn status(&self, attempt_id: &str) -> Result<AttemptStatus, AssessmentError> {
    let handle = self
      .store
      .get(attempt_id)
      .await
      .ok_or_else(|| AssessmentError::AttemptNotFound(attempt_id.to_string()))?;
    let attempt = handle.lock().await;
    Ok(AttemptStatus {
      attempt_id: attempt.id.clone(),
      source_title: attempt.title.clone(),
      total: attempt.deck.len(),
      answers: attempt.answers.iter().map(|(id, a)| (id.clone(), a.choice_letter)).collect(),
      finished: attempt.is_finished(),
    })
  }
}

/// `round(100 * score / total)`, 0 for an empty deck.
pub fn percent(score: usize, total: usize) -> u32 {
  if total == 0 {
    return 0;
  }
  (100.0 * score as f64 / total as f64).round() as u32
}

/// Build the result payload; every deck question must have an answer.
fn score(attempt: &Attempt, finished_at: DateTime<Utc>) -> Result<ResultPayload, AssessmentError> {
  let total = attempt.deck.len();
  let answered = attempt.answers.len();
  if answered != total {
    return Err(AssessmentError::IncompleteAttempt { answered, total });
  }

  let mut questions = Vec::with_capacity(total);
  for q in &attempt.deck {
    let answer = attempt
      .answers
      .get(&q.id)
      .ok_or(AssessmentError::IncompleteAttempt { answered, total })?;
    questions.push(QuestionResult {
      id: q.id.clone(),
      source: q.source.clone(),
      prompt: q.prompt.clone(),
      options: LETTERS
        .iter()
        .zip(&q.options)
        .map(|(letter, text)| LetteredOption { letter: *letter, text: text.clone() })
        .collect(),
      selected_letter: answer.choice_letter,
      selected_text: q.options[answer.choice_index].clone(),
      correct_letter: LETTERS[q.correct_index],
      correct_text: q.options[q.correct_index].clone(),
      is_correct: answer.choice_index == q.correct_index,
    });
  }

  let score = questions.iter().filter(|q| q.is_correct).count();
  let percent = percent(score, total);
  let fraction = format!("{score}/{total}");
  Ok(ResultPayload {
    attempt_id: attempt.id.clone(),
    candidate: CandidateInfo { id: attempt.candidate_id.clone(), name: attempt.candidate_name.clone() },
    score,
    total,
    display: format!("{fraction} ({percent}%)"),
    fraction,
    percent,
    source_title: attempt.title.clone(),
    sources: attempt.sources.clone(),
    started_at: attempt.started_at,
    finished_at,
    duration_seconds: (finished_at - attempt.started_at).num_seconds(),
    questions,
  })
}
