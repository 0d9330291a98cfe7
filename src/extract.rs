//! Text extraction: fetch a document, pick a reader by content type, and gate
//! the result on a minimum length.
//!
//! Readers:
//!   - PDF: per-page text in page order, pages joined by a single newline
//!   - HTML: main-content blocks (article/main/body) minus navigation chrome
//!   - plain text: taken as-is

use std::sync::Arc;

use futures::future::join_all;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::domain::{DocumentRef, ExtractedText};
use crate::error::AssessmentError;
use crate::source::{DocumentFetcher, FetchedDocument};

const GENERIC_TITLE: &str = "Reference document";

/// Trailing path segments of share links that name an action rather than a file.
const NON_FILE_SEGMENTS: &[&str] = &["view", "edit", "uc", "export", "download", "open", "preview"];

/// Tags whose content is never part of the readable text.
const SKIPPED_TAGS: &[&str] = &["script", "style", "noscript", "nav", "header", "footer", "aside", "form", "template"];
const BLOCK_TAGS: &[&str] = &["p", "h1", "h2", "h3", "h4", "h5", "h6", "li", "pre", "blockquote", "td", "th", "dd", "dt"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentKind {
  Pdf,
  Html,
  PlainText,
}

/// Classify by magic bytes, then declared content type, then URL suffix. Defaults to HTML.
pub fn classify(content_type: Option<&str>, url: &str, body: &[u8]) -> DocumentKind {
  if body.starts_with(b"%PDF-") {
    return DocumentKind::Pdf;
  }
  if let Some(ct) = content_type {
    if ct.contains("pdf") {
      return DocumentKind::Pdf;
    }
    if ct.contains("html") || ct.contains("xml") {
      return DocumentKind::Html;
    }
    if ct.starts_with("text/plain") {
      return DocumentKind::PlainText;
    }
  }
  let path = Url::parse(url).map(|u| u.path().to_ascii_lowercase()).unwrap_or_else(|_| url.to_ascii_lowercase());
  if path.ends_with(".pdf") {
    DocumentKind::Pdf
  } else if path.ends_with(".txt") {
    DocumentKind::PlainText
  } else {
    DocumentKind::Html
  }
}

/// Concatenated page text. Pages that fail to decode are skipped.
pub fn pdf_text(bytes: &[u8]) -> Result<String, String> {
  let doc = lopdf::Document::load_mem(bytes).map_err(|e| format!("unreadable PDF: {e}"))?;
  let mut pages = Vec::new();
  for (number, _) in doc.get_pages() {
    match doc.extract_text(&[number]) {
      Ok(t) => pages.push(t.trim_end_matches(|c| c == '\n' || c == '\r').to_string()),
      Err(e) => debug!(target: "source", page = number, error = %e, "Skipping undecodable PDF page"),
    }
  }
  Ok(pages.join("\n").replace('\r', "").trim().to_string())
}

/// Readable main content of an HTML page and its `<title>` (or first `<h1>`).
pub fn html_text(html: &str, url: &str) -> (Option<String>, String) {
  let doc = Html::parse_document(html);

  let title = ["title", "h1"]
    .iter()
    .filter_map(|css| selector(css))
    .find_map(|sel| doc.select(&sel).next().map(|el| collapse_ws(&el.text().collect::<String>())))
    .filter(|t| !t.is_empty());

  let root = ["article", "main", "[role=main]", "body"]
    .iter()
    .filter_map(|css| selector(css))
    .find_map(|sel| doc.select(&sel).next());
  let Some(root) = root else {
    debug!(target: "source", %url, "HTML has no body");
    return (title, String::new());
  };

  let mut blocks = Vec::new();
  if let Some(block_sel) = selector(&BLOCK_TAGS.join(", ")) {
    for el in root.select(&block_sel) {
      if has_ancestor(&el, root, |name| SKIPPED_TAGS.contains(&name) || BLOCK_TAGS.contains(&name)) {
        continue;
      }
      let text = collapse_ws(&el.text().collect::<Vec<_>>().join(" "));
      if !text.is_empty() {
        blocks.push(text);
      }
    }
  }

  // Pages that keep their prose in bare <div>s: fall back to every visible text node.
  if blocks.is_empty() {
    for node in root.descendants() {
      let Some(text) = node.value().as_text() else { continue };
      let hidden = node
        .ancestors()
        .filter_map(ElementRef::wrap)
        .any(|a| SKIPPED_TAGS.contains(&a.value().name()));
      let text = collapse_ws(text);
      if !hidden && !text.is_empty() {
        blocks.push(text);
      }
    }
  }

  debug!(target: "source", %url, blocks = blocks.len(), "HTML main content extracted");
  (title, blocks.join("\n"))
}

fn selector(css: &str) -> Option<Selector> {
  Selector::parse(css).ok()
}

/// True if any ancestor strictly between `el` and `root` matches `pred`, or is skipped chrome.
fn has_ancestor(el: &ElementRef<'_>, root: ElementRef<'_>, pred: impl Fn(&str) -> bool) -> bool {
  for node in el.ancestors() {
    if node.id() == root.id() {
      return false;
    }
    if let Some(a) = ElementRef::wrap(node) {
      if pred(a.value().name()) {
        return true;
      }
    }
  }
  false
}

fn collapse_ws(s: &str) -> String {
  s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// "safety-manual_v2.pdf" -> "safety manual v2"
fn label_from_filename(name: &str) -> Option<String> {
  let stem = name.rsplit_once('.').map(|(s, _)| s).unwrap_or(name);
  let label = collapse_ws(&stem.replace(['-', '_', '+'], " "));
  if label.is_empty() { None } else { Some(label) }
}

/// Label from the last path segment, unless that segment is a share-link verb.
fn title_from_url(url: &str) -> Option<String> {
  let parsed = Url::parse(url).ok()?;
  let last = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
  if NON_FILE_SEGMENTS.contains(&last.to_ascii_lowercase().as_str()) {
    return None;
  }
  label_from_filename(last)
}

/// Fetches and reads configured documents.
#[derive(Clone)]
pub struct TextExtractor {
  fetcher: Arc<dyn DocumentFetcher>,
  min_chars: usize,
}

impl TextExtractor {
  pub fn new(fetcher: Arc<dyn DocumentFetcher>, min_chars: usize) -> Self {
    Self { fetcher, min_chars }
  }

  #[instrument(level = "info", skip(self, doc), fields(key = %doc.key, url = %doc.url))]
  pub async fn extract(&self, doc: &DocumentRef) -> Result<ExtractedText, AssessmentError> {
    let fetched = self.fetcher.fetch(&doc.url).await?;
    let kind = classify(fetched.content_type.as_deref(), &fetched.url, &fetched.body);
    let served_name = fetched.filename.as_deref().and_then(label_from_filename);
    let (doc_title, text) = read(kind, fetched, &doc.key).await?;

    let chars = text.chars().count();
    if chars < self.min_chars {
      return Err(AssessmentError::ExtractionInsufficient { source_key: doc.key.clone(), chars, min: self.min_chars });
    }

    let title = doc
      .title
      .clone()
      .or(doc_title)
      .or(served_name)
      .or_else(|| title_from_url(&doc.url))
      .unwrap_or_else(|| GENERIC_TITLE.to_string());
    info!(target: "source", key = %doc.key, ?kind, chars, %title, "Extracted source text");
    Ok(ExtractedText { title, text })
  }

  /// Extract every document concurrently. Individual failures are logged and
  /// skipped; only when all fail is the first failure (in configured order) returned.
  #[instrument(level = "info", skip(self, docs), fields(count = docs.len()))]
  pub async fn extract_all(&self, docs: &[DocumentRef]) -> Result<Vec<(DocumentRef, ExtractedText)>, AssessmentError> {
    let results = join_all(docs.iter().map(|d| self.extract(d))).await;

    let mut ok = Vec::new();
    let mut first_err = None;
    for (doc, res) in docs.iter().zip(results) {
      match res {
        Ok(text) => ok.push((doc.clone(), text)),
        Err(e) => {
          warn!(target: "source", key = %doc.key, error = %e, "Source failed; continuing with the others");
          first_err.get_or_insert(e);
        }
      }
    }

    if ok.is_empty() {
      let first = first_err.unwrap_or_else(|| AssessmentError::Validation("no documents configured".into()));
      return Err(AssessmentError::AllSourcesFailed { first: Box::new(first) });
    }
    Ok(ok)
  }
}

async fn read(kind: DocumentKind, fetched: FetchedDocument, key: &str) -> Result<(Option<String>, String), AssessmentError> {
  let empty = |reason: String| AssessmentError::ExtractionEmpty { source_key: key.to_string(), reason };
  match kind {
    DocumentKind::Pdf => {
      // PDF decoding is CPU-bound; keep it off the async workers.
      let text = tokio::task::spawn_blocking(move || pdf_text(&fetched.body))
        .await
        .map_err(|e| empty(format!("PDF reader task failed: {e}")))?
        .map_err(empty)?;
      if text.is_empty() {
        return Err(empty("PDF contains no extractable text".into()));
      }
      Ok((None, text))
    }
    DocumentKind::Html => {
      let html = String::from_utf8_lossy(&fetched.body);
      let (title, text) = html_text(&html, &fetched.url);
      if text.is_empty() {
        return Err(empty("no readable content in page".into()));
      }
      Ok((title, text))
    }
    DocumentKind::PlainText => {
      let text = String::from_utf8_lossy(&fetched.body).replace('\r', "").trim().to_string();
      if text.is_empty() {
        return Err(empty("empty text document".into()));
      }
      Ok((None, text))
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{html_page, long_text, FakeFetcher};

  fn doc(key: &str, url: &str) -> DocumentRef {
    DocumentRef { key: key.into(), url: url.into(), title: None }
  }

  #[test]
  fn classification_prefers_magic_then_header_then_suffix() {
    assert_eq!(classify(Some("application/octet-stream"), "https://x.test/uc?id=1", b"%PDF-1.7 ..."), DocumentKind::Pdf);
    assert_eq!(classify(Some("text/html; charset=utf-8"), "https://x.test/a.pdf", b"<html>"), DocumentKind::Html);
    assert_eq!(classify(None, "https://x.test/manual.PDF?x=1", b""), DocumentKind::Pdf);
    assert_eq!(classify(Some("text/plain"), "https://x.test/a", b"hi"), DocumentKind::PlainText);
    assert_eq!(classify(None, "https://x.test/page", b""), DocumentKind::Html);
  }

  #[test]
  fn html_reader_keeps_main_content_and_drops_chrome() {
    let html = r#"<html><head><title> Ops Guide </title><script>var x = 1;</script></head>
      <body><nav><li>Home</li></nav>
      <article><h1>Procedures</h1><p>Always   check the valve.</p><ul><li><p>Step one</p></li></ul></article>
      <footer><p>Copyright</p></footer></body></html>"#;
    let (title, text) = html_text(html, "https://x.test/ops");
    assert_eq!(title.as_deref(), Some("Ops Guide"));
    assert_eq!(text, "Procedures\nAlways check the valve.\nStep one");
  }

  #[test]
  fn html_reader_falls_back_to_visible_text_nodes() {
    let html = "<html><body><div>Loose prose</div><style>.a{}</style><div>more prose</div></body></html>";
    let (_, text) = html_text(html, "https://x.test/");
    assert_eq!(text, "Loose prose\nmore prose");
  }

  #[test]
  fn garbage_is_not_a_pdf() {
    assert!(pdf_text(b"%PDF-garbage").is_err());
  }

  #[test]
  fn titles_derive_from_file_names() {
    assert_eq!(title_from_url("https://x.test/docs/safety-manual_v2.pdf").as_deref(), Some("safety manual v2"));
    assert_eq!(title_from_url("https://x.test/"), None);
  }

  #[test]
  fn share_link_verbs_are_not_titles() {
    assert_eq!(title_from_url("https://drive.google.com/file/d/ABC123/view?usp=sharing"), None);
    assert_eq!(title_from_url("https://docs.google.com/document/d/DOC9/edit"), None);
    assert_eq!(title_from_url("https://drive.google.com/uc?export=download&id=ABC123"), None);
    assert_eq!(title_from_url("https://drive.google.com/open?id=XYZ"), None);
  }

  #[tokio::test]
  async fn served_filename_beats_share_link_and_generic_title() {
    let drive = "https://drive.google.com/file/d/ABC123/view?usp=sharing";
    let docs = "https://docs.google.com/document/d/DOC9/edit";
    let fetcher = FakeFetcher::new()
      .text(drive, &long_text("valve", 300))
      .named(drive, "Safety_Manual-2024.pdf")
      .text(docs, &long_text("pump", 300));
    let extractor = TextExtractor::new(Arc::new(fetcher), 200);

    assert_eq!(extractor.extract(&doc("safety", drive)).await.unwrap().title, "Safety Manual 2024");
    assert_eq!(extractor.extract(&doc("ops", docs)).await.unwrap().title, GENERIC_TITLE);
  }

  #[tokio::test]
  async fn extracts_html_and_applies_title_fallbacks() {
    let fetcher = FakeFetcher::new().html("https://x.test/ops", &html_page("Operations", &long_text("valve", 300)));
    let extractor = TextExtractor::new(Arc::new(fetcher), 200);
    let out = extractor.extract(&doc("ops", "https://x.test/ops")).await.unwrap();
    assert_eq!(out.title, "Operations");
    assert!(out.text.chars().count() >= 200);

    let configured = DocumentRef { title: Some("Ops Manual".into()), ..doc("ops", "https://x.test/ops") };
    assert_eq!(extractor.extract(&configured).await.unwrap().title, "Ops Manual");
  }

  #[tokio::test]
  async fn short_text_is_insufficient() {
    let fetcher = FakeFetcher::new().text("https://x.test/short.txt", "too short");
    let extractor = TextExtractor::new(Arc::new(fetcher), 200);
    let err = extractor.extract(&doc("s", "https://x.test/short.txt")).await.unwrap_err();
    assert_eq!(err, AssessmentError::ExtractionInsufficient { source_key: "s".into(), chars: 9, min: 200 });
  }

  #[tokio::test]
  async fn empty_page_is_extraction_empty() {
    let fetcher = FakeFetcher::new().html("https://x.test/blank", "<html><body><script>x()</script></body></html>");
    let extractor = TextExtractor::new(Arc::new(fetcher), 200);
    let err = extractor.extract(&doc("b", "https://x.test/blank")).await.unwrap_err();
    assert!(matches!(err, AssessmentError::ExtractionEmpty { .. }));
  }

  #[tokio::test]
  async fn one_failed_source_does_not_abort_the_rest() {
    let fetcher = FakeFetcher::new()
      .text("https://x.test/a.txt", &long_text("alpha", 250))
      .text("https://x.test/c.txt", &long_text("gamma", 250));
    let extractor = TextExtractor::new(Arc::new(fetcher), 200);
    let docs = [doc("a", "https://x.test/a.txt"), doc("b", "https://x.test/b.txt"), doc("c", "https://x.test/c.txt")];
    let out = extractor.extract_all(&docs).await.unwrap();
    let keys: Vec<_> = out.iter().map(|(d, _)| d.key.as_str()).collect();
    assert_eq!(keys, ["a", "c"]);
  }

  #[tokio::test]
  async fn all_sources_failing_reports_the_first_cause() {
    let fetcher = FakeFetcher::new().text("https://x.test/b.txt", "tiny");
    let extractor = TextExtractor::new(Arc::new(fetcher), 200);
    let docs = [doc("a", "https://x.test/a.txt"), doc("b", "https://x.test/b.txt")];
    let err = extractor.extract_all(&docs).await.unwrap_err();
    match err {
      AssessmentError::AllSourcesFailed { first } => {
        assert!(matches!(*first, AssessmentError::SourceUnreachable { ref url, .. } if url == "https://x.test/a.txt"))
      }
      other => panic!("unexpected error: {other:?}"),
    }
  }
}
