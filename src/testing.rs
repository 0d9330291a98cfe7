//! In-process fakes for the collaborator traits, shared by unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::bank::{GenerationRequest, QuestionGenerator};
use crate::dispatch::{DeliveryError, ResultSink};
use crate::domain::ResultPayload;
use crate::error::AssessmentError;
use crate::source::{DocumentFetcher, FetchedDocument};

/// "word word word ..." of at least `min_chars` characters.
pub fn long_text(word: &str, min_chars: usize) -> String {
  let mut out = String::new();
  while out.chars().count() < min_chars {
    if !out.is_empty() {
      out.push(' ');
    }
    out.push_str(word);
  }
  out
}

pub fn html_page(title: &str, body: &str) -> String {
  format!("<html><head><title>{title}</title></head><body><article><p>{body}</p></article></body></html>")
}

/// Serves canned bodies by URL; unknown URLs are unreachable.
#[derive(Default)]
pub struct FakeFetcher {
  docs: HashMap<String, FetchedDocument>,
  pub calls: AtomicUsize,
}

impl FakeFetcher {
  pub fn new() -> Self {
    Self::default()
  }

  fn serve(mut self, url: &str, content_type: &str, body: &str) -> Self {
    let doc = FetchedDocument {
      url: url.into(),
      content_type: Some(content_type.into()),
      filename: None,
      body: body.as_bytes().to_vec(),
    };
    self.docs.insert(url.into(), doc);
    self
  }

  pub fn html(self, url: &str, body: &str) -> Self {
    self.serve(url, "text/html; charset=utf-8", body)
  }

  pub fn text(self, url: &str, body: &str) -> Self {
    self.serve(url, "text/plain", body)
  }

  /// Attach a `Content-Disposition` filename to an already registered URL.
  pub fn named(mut self, url: &str, filename: &str) -> Self {
    if let Some(doc) = self.docs.get_mut(url) {
      doc.filename = Some(filename.into());
    }
    self
  }

  pub fn call_count(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl DocumentFetcher for FakeFetcher {
  async fn fetch(&self, url: &str) -> Result<FetchedDocument, AssessmentError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    match self.docs.get(url) {
      Some(doc) => Ok(doc.clone()),
      None => Err(AssessmentError::SourceUnreachable { url: url.into(), cause: "HTTP 404 Not Found".into() }),
    }
  }
}

/// Canned generator output: a well-formed bank, or a fixed raw response.
pub enum FakeOutput {
  /// `count` valid items (or `count - short` when short > 0); correct index = position % 4.
  Valid { short: usize },
  Raw(String),
}

pub struct FakeGenerator {
  output: FakeOutput,
  pub calls: AtomicUsize,
  pub requests: Mutex<Vec<GenerationRequest>>,
}

impl FakeGenerator {
  pub fn valid() -> Self {
    Self::with(FakeOutput::Valid { short: 0 })
  }

  pub fn with(output: FakeOutput) -> Self {
    Self { output, calls: AtomicUsize::new(0), requests: Mutex::new(Vec::new()) }
  }

  pub fn call_count(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

/// JSON bank of `n` items whose correct index is `i % 4`.
pub fn bank_json(n: usize, tag: &str) -> String {
  let items: Vec<serde_json::Value> = (0..n)
    .map(|i| {
      serde_json::json!({
        "id": format!("q{}", i + 1),
        "prompt": format!("{tag} question {}", i + 1),
        "options": [format!("{tag} opt a{i}"), format!("{tag} opt b{i}"), format!("{tag} opt c{i}"), format!("{tag} opt d{i}")],
        "correctIndex": i % 4,
      })
    })
    .collect();
  serde_json::json!({ "questions": items }).to_string()
}

#[async_trait]
impl QuestionGenerator for FakeGenerator {
  async fn generate(&self, request: &GenerationRequest) -> Result<String, AssessmentError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    if let Ok(mut reqs) = self.requests.lock() {
      reqs.push(request.clone());
    }
    match &self.output {
      FakeOutput::Valid { short } => Ok(bank_json(request.count.saturating_sub(*short), &request.source_key)),
      FakeOutput::Raw(raw) => Ok(raw.clone()),
    }
  }
}

/// Records delivered payloads; optionally fails or stalls.
#[derive(Default)]
pub struct RecordingSink {
  pub delivered: Mutex<Vec<ResultPayload>>,
  pub fail: bool,
  pub delay: Option<Duration>,
}

impl RecordingSink {
  pub fn failing() -> Self {
    Self { fail: true, ..Self::default() }
  }

  pub fn slow(delay: Duration) -> Self {
    Self { delay: Some(delay), ..Self::default() }
  }

  pub fn count(&self) -> usize {
    self.delivered.lock().map(|d| d.len()).unwrap_or(0)
  }
}

#[async_trait]
impl ResultSink for RecordingSink {
  async fn deliver(&self, payload: &ResultPayload) -> Result<(), DeliveryError> {
    if let Some(d) = self.delay {
      tokio::time::sleep(d).await;
    }
    if self.fail {
      return Err(DeliveryError::Rejected { status: 503, body: "collector down".into() });
    }
    if let Ok(mut delivered) = self.delivered.lock() {
      delivered.push(payload.clone());
    }
    Ok(())
  }
}
