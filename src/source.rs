//! Source retrieval: share-link normalization and HTTP GET with bounded retry.
//!
//! Only server errors (5xx) and timeouts are retried; 4xx responses and
//! transport errors fail on the first attempt.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
  header::{CONTENT_DISPOSITION, CONTENT_TYPE},
  redirect, StatusCode,
};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::config::FetchConfig;
use crate::error::AssessmentError;
use crate::retry::RetryPolicy;

const BROWSER_UA: &str =
  "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Raw document bytes plus what the server said about them.
#[derive(Clone, Debug)]
pub struct FetchedDocument {
  /// Final URL after normalization and redirects.
  pub url: String,
  pub content_type: Option<String>,
  /// Filename from `Content-Disposition`, when the server sent one.
  pub filename: Option<String>,
  pub body: Vec<u8>,
}

#[async_trait]
pub trait DocumentFetcher: Send + Sync {
  async fn fetch(&self, url: &str) -> Result<FetchedDocument, AssessmentError>;
}

/// Rewrite known share links into direct-download links. Anything unrecognized
/// (including unparsable input) is returned unchanged.
pub fn normalize_url(raw: &str) -> String {
  let Ok(mut url) = Url::parse(raw.trim()) else {
    return raw.to_string();
  };
  let host = url.host_str().unwrap_or_default().to_ascii_lowercase();

  if host == "drive.google.com" {
    return match drive_file_id(&url) {
      Some(id) => format!("https://drive.google.com/uc?export=download&id={id}"),
      None => raw.to_string(),
    };
  }

  if host == "docs.google.com" {
    let segs: Vec<&str> = url.path_segments().map(|s| s.collect()).unwrap_or_default();
    if let ["document", "d", id, ..] = segs.as_slice() {
      return format!("https://docs.google.com/document/d/{id}/export?format=pdf");
    }
    return raw.to_string();
  }

  if host == "dropbox.com" || host.ends_with(".dropbox.com") {
    set_query_flag(&mut url, "dl", "1");
    return url.to_string();
  }

  if host.ends_with("sharepoint.com") || host == "onedrive.live.com" {
    let has_flag = url.query_pairs().any(|(k, v)| k == "download" && v == "1");
    if !has_flag {
      set_query_flag(&mut url, "download", "1");
    }
    return url.to_string();
  }

  raw.to_string()
}

fn drive_file_id(url: &Url) -> Option<String> {
  let segs: Vec<&str> = url.path_segments()?.collect();
  if let ["file", "d", id, ..] = segs.as_slice() {
    return Some((*id).to_string());
  }
  url.query_pairs().find(|(k, _)| k == "id").map(|(_, v)| v.into_owned())
}

/// Replace (or add) `key=value` in the query string, keeping other pairs in order.
fn set_query_flag(url: &mut Url, key: &str, value: &str) {
  let kept: Vec<(String, String)> = url
    .query_pairs()
    .filter(|(k, _)| k != key)
    .map(|(k, v)| (k.into_owned(), v.into_owned()))
    .collect();
  url.query_pairs_mut().clear().extend_pairs(kept).append_pair(key, value);
}

/// Filename announced by a `Content-Disposition` header. `filename*` (RFC 5987) wins over `filename`.
pub fn disposition_filename(header: &str) -> Option<String> {
  let mut plain = None;
  let mut extended = None;
  for part in header.split(';') {
    let Some((name, value)) = part.split_once('=') else { continue };
    let value = value.trim().trim_matches('"');
    match name.trim().to_ascii_lowercase().as_str() {
      "filename*" => {
        let encoded = value.split_once("''").map(|(_, v)| v).unwrap_or(value);
        extended = url::form_urlencoded::parse(format!("f={encoded}").as_bytes())
          .next()
          .map(|(_, v)| v.into_owned());
      }
      "filename" => plain = Some(value.to_string()),
      _ => {}
    }
  }
  extended.or(plain).map(|f| f.trim().to_string()).filter(|f| !f.is_empty())
}

/// Why a single GET attempt failed; decides retryability.
#[derive(Debug)]
enum AttemptFailure {
  Status(StatusCode),
  Timeout(String),
  Transport(String),
}

impl AttemptFailure {
  fn retryable(&self) -> bool {
    match self {
      AttemptFailure::Status(s) => s.is_server_error(),
      AttemptFailure::Timeout(_) => true,
      AttemptFailure::Transport(_) => false,
    }
  }

  fn describe(&self) -> String {
    match self {
      AttemptFailure::Status(s) => format!("HTTP {s}"),
      AttemptFailure::Timeout(e) => format!("timed out: {e}"),
      AttemptFailure::Transport(e) => e.clone(),
    }
  }
}

impl From<reqwest::Error> for AttemptFailure {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() { AttemptFailure::Timeout(e.to_string()) } else { AttemptFailure::Transport(e.to_string()) }
  }
}

/// reqwest-backed fetcher with a per-attempt timeout and the retry policy.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  policy: RetryPolicy,
  timeout: Duration,
}

impl HttpFetcher {
  pub fn new(cfg: &FetchConfig) -> Result<Self, reqwest::Error> {
    let client = reqwest::Client::builder()
      .user_agent(BROWSER_UA)
      .redirect(redirect::Policy::limited(10))
      .build()?;
    Ok(Self {
      client,
      policy: RetryPolicy::new(cfg.max_attempts, Duration::from_millis(cfg.backoff_step_ms)),
      timeout: Duration::from_secs(cfg.timeout_secs),
    })
  }

  #[cfg(test)]
  pub fn with_policy(mut self, policy: RetryPolicy, timeout: Duration) -> Self {
    self.policy = policy;
    self.timeout = timeout;
    self
  }

  async fn get_once(&self, url: &str, attempt: usize) -> Result<FetchedDocument, AttemptFailure> {
    debug!(target: "source", %url, attempt, "GET");
    let res = self.client.get(url).timeout(self.timeout).send().await?;
    let status = res.status();
    if !status.is_success() {
      return Err(AttemptFailure::Status(status));
    }
    let final_url = res.url().to_string();
    let content_type = res
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map(|v| v.to_ascii_lowercase());
    let filename = res
      .headers()
      .get(CONTENT_DISPOSITION)
      .and_then(|v| v.to_str().ok())
      .and_then(disposition_filename);
    let body = res.bytes().await?.to_vec();
    Ok(FetchedDocument { url: final_url, content_type, filename, body })
  }
}

#[async_trait]
impl DocumentFetcher for HttpFetcher {
  #[instrument(level = "info", skip(self), fields(%url))]
  async fn fetch(&self, url: &str) -> Result<FetchedDocument, AssessmentError> {
    let target = normalize_url(url);
    if target != url {
      info!(target: "source", from = %url, to = %target, "Normalized share link");
    }

    let result = self
      .policy
      .run(
        |attempt| {
          let target = target.clone();
          async move {
            let out = self.get_once(&target, attempt).await;
            if let Err(e) = &out {
              warn!(target: "source", url = %target, attempt, retryable = e.retryable(), error = %e.describe(), "Fetch attempt failed");
            }
            out
          }
        },
        AttemptFailure::retryable,
      )
      .await;

    match result {
      Ok(doc) => {
        info!(target: "source", url = %doc.url, bytes = doc.body.len(), content_type = ?doc.content_type, "Fetched source");
        Ok(doc)
      }
      Err(e) => Err(AssessmentError::SourceUnreachable { url: target, cause: e.describe() }),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;

  use axum::{extract::State, http::StatusCode as AxStatus, routing::get, Router};

  #[test]
  fn drive_view_links_become_downloads() {
    assert_eq!(
      normalize_url("https://drive.google.com/file/d/ABC123/view?usp=sharing"),
      "https://drive.google.com/uc?export=download&id=ABC123"
    );
    assert_eq!(
      normalize_url("https://drive.google.com/open?id=XYZ"),
      "https://drive.google.com/uc?export=download&id=XYZ"
    );
  }

  #[test]
  fn google_docs_export_as_pdf() {
    assert_eq!(
      normalize_url("https://docs.google.com/document/d/DOC9/edit?usp=sharing"),
      "https://docs.google.com/document/d/DOC9/export?format=pdf"
    );
  }

  #[test]
  fn dropbox_links_get_download_flag() {
    assert_eq!(
      normalize_url("https://www.dropbox.com/s/xyz/manual.pdf?dl=0"),
      "https://www.dropbox.com/s/xyz/manual.pdf?dl=1"
    );
    assert_eq!(
      normalize_url("https://www.dropbox.com/scl/fi/xyz/manual.pdf?rlkey=k"),
      "https://www.dropbox.com/scl/fi/xyz/manual.pdf?rlkey=k&dl=1"
    );
  }

  #[test]
  fn sharepoint_links_get_download_flag_once() {
    let once = normalize_url("https://contoso.sharepoint.com/sites/hr/doc.pdf?e=abc");
    assert_eq!(once, "https://contoso.sharepoint.com/sites/hr/doc.pdf?e=abc&download=1");
    assert_eq!(normalize_url(&once), once);
  }

  #[test]
  fn unknown_and_malformed_urls_pass_through() {
    assert_eq!(normalize_url("https://example.com/manual.pdf"), "https://example.com/manual.pdf");
    assert_eq!(normalize_url("not a url"), "not a url");
    assert_eq!(normalize_url("https://drive.google.com/drive/folders"), "https://drive.google.com/drive/folders");
  }

  async fn flaky(State(hits): State<Arc<AtomicUsize>>) -> (AxStatus, &'static str) {
    if hits.fetch_add(1, Ordering::SeqCst) < 2 {
      (AxStatus::SERVICE_UNAVAILABLE, "busy")
    } else {
      (AxStatus::OK, "hello")
    }
  }

  async fn missing(State(hits): State<Arc<AtomicUsize>>) -> AxStatus {
    hits.fetch_add(1, Ordering::SeqCst);
    AxStatus::NOT_FOUND
  }

  async fn down(State(hits): State<Arc<AtomicUsize>>) -> AxStatus {
    hits.fetch_add(1, Ordering::SeqCst);
    AxStatus::INTERNAL_SERVER_ERROR
  }

  async fn named() -> ([(axum::http::header::HeaderName, &'static str); 1], &'static str) {
    ([(axum::http::header::CONTENT_DISPOSITION, "attachment; filename=\"Safety Manual 2024.pdf\"")], "%PDF-1.4")
  }

  async fn slow(State(hits): State<Arc<AtomicUsize>>) -> &'static str {
    hits.fetch_add(1, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(500)).await;
    "late"
  }

  async fn serve(path: &str, hits: Arc<AtomicUsize>) -> String {
    let app = Router::new()
      .route("/flaky", get(flaky))
      .route("/missing", get(missing))
      .route("/down", get(down))
      .route("/slow", get(slow))
      .route("/named", get(named))
      .with_state(hits);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
      axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}{path}")
  }

  fn fetcher(timeout: Duration) -> HttpFetcher {
    HttpFetcher::new(&FetchConfig::default())
      .unwrap()
      .with_policy(RetryPolicy::new(3, Duration::from_millis(5)), timeout)
  }

  #[tokio::test]
  async fn retries_server_errors_until_success() {
    let hits = Arc::new(AtomicUsize::new(0));
    let url = serve("/flaky", hits.clone()).await;
    let doc = fetcher(Duration::from_secs(5)).fetch(&url).await.unwrap();
    assert_eq!(doc.body, b"hello");
    assert!(doc.content_type.unwrap().starts_with("text/plain"));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
  }

  #[test]
  fn disposition_filenames_are_parsed() {
    assert_eq!(disposition_filename("attachment; filename=\"manual.pdf\"").as_deref(), Some("manual.pdf"));
    assert_eq!(
      disposition_filename("attachment; filename=\"fallback.pdf\"; filename*=UTF-8''Manual%20de%20Seguridad.pdf").as_deref(),
      Some("Manual de Seguridad.pdf")
    );
    assert_eq!(disposition_filename("inline"), None);
    assert_eq!(disposition_filename("attachment; filename=\"\""), None);
  }

  #[tokio::test]
  async fn content_disposition_filename_is_kept() {
    let url = serve("/named", Arc::new(AtomicUsize::new(0))).await;
    let doc = fetcher(Duration::from_secs(5)).fetch(&url).await.unwrap();
    assert_eq!(doc.filename.as_deref(), Some("Safety Manual 2024.pdf"));
  }

  #[tokio::test]
  async fn client_errors_are_not_retried() {
    let hits = Arc::new(AtomicUsize::new(0));
    let url = serve("/missing", hits.clone()).await;
    let err = fetcher(Duration::from_secs(5)).fetch(&url).await.unwrap_err();
    assert!(matches!(err, AssessmentError::SourceUnreachable { ref cause, .. } if cause.contains("404")));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn exhausted_retries_report_last_cause() {
    let hits = Arc::new(AtomicUsize::new(0));
    let url = serve("/down", hits.clone()).await;
    let err = fetcher(Duration::from_secs(5)).fetch(&url).await.unwrap_err();
    assert!(matches!(err, AssessmentError::SourceUnreachable { ref cause, .. } if cause.contains("500")));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
  }

  #[tokio::test]
  async fn timeouts_count_as_retryable() {
    let hits = Arc::new(AtomicUsize::new(0));
    let url = serve("/slow", hits.clone()).await;
    let err = fetcher(Duration::from_millis(100)).fetch(&url).await.unwrap_err();
    assert!(matches!(err, AssessmentError::SourceUnreachable { ref cause, .. } if cause.contains("timed out")));
    assert_eq!(hits.load(Ordering::SeqCst), 3);
  }
}
