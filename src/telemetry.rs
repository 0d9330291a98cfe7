//! Telemetry initialization (tracing/tracing-subscriber).
//!
//! Behavior:
//! - LOG_LEVEL controls the filter (e.g. "debug" or detailed directives like
//!   "info,assessment=debug,source=debug,generation=info,delivery=info").
//! - LOG_FORMAT selects "pretty" (default) or "json" structured logs.
//!
//! Targets used across the crate: `assessment_engine` (startup/config),
//! `assessment` (session lifecycle), `source` (retrieval + extraction),
//! `generation` (model calls + bank building), `delivery` (result dispatch).

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str =
  "info,assessment=debug,assessment_engine=debug,source=info,generation=info,delivery=info,tower_http=info,axum=info";

pub fn init_tracing() {
  let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_target(true)
    .with_file(true)
    .with_line_number(true);

  // Choose JSON vs pretty; don't try to store different layer types.
  match std::env::var("LOG_FORMAT").as_deref() {
    Ok("json") => builder.json().init(),
    _ => builder.init(),
  }
}
