//! Assessment Engine · document-grounded multiple-choice assessments
//!
//! - Axum HTTP API for start / answer / finish
//! - Source documents fetched over HTTP (PDF, HTML or plain text)
//! - Questions generated through an OpenAI-compatible endpoint
//! - Static candidate UI fallback (./static/index.html)
//!
//! Important env variables:
//!   PORT                   : u16 (default 3000)
//!   OPENAI_API_KEY         : enables question generation if present
//!   OPENAI_BASE_URL        : default "https://api.openai.com/v1"
//!   OPENAI_MODEL           : overrides `generation.model`
//!   ASSESSMENT_CONFIG_PATH : path to TOML config (documents, prompts, delivery)
//!   QUESTION_COUNT         : questions per attempt
//!   RESULT_COLLECTOR_URL   : where finished results are POSTed
//!   DELIVERY_MODE          : "detached" (default) or "awaited"
//!   CONFIRMATION_PHRASE    : literal typed by the candidate before starting
//!   LOG_LEVEL              : tracing filter, e.g. "debug" or full directives
//!   LOG_FORMAT             : "pretty" (default) or "json"

mod telemetry;
mod util;
mod domain;
mod error;
mod config;
mod retry;
mod source;
mod extract;
mod bank;
mod allocate;
mod store;
mod dispatch;
mod session;
mod state;
mod protocol;
mod openai;
mod routes;
#[cfg(test)]
mod testing;

use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tracing::info;

use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  telemetry::init_tracing();

  // Config, fetcher, generator, dispatcher and the attempt store.
  let state = Arc::new(AppState::new()?);

  let app = build_router(state.clone());

  let addr: SocketAddr = std::env::var("PORT")
    .ok()
    .and_then(|p| p.parse::<u16>().ok())
    .map(|port| SocketAddr::from(([0, 0, 0, 0], port)))
    .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

  let listener = TcpListener::bind(addr).await?;
  info!(target: "assessment_engine", %addr, questions = state.cfg.question_count, sources = state.cfg.documents.len(), "HTTP server listening");
  axum::serve(listener, app)
    .with_graceful_shutdown(shutdown_signal())
    .await?;
  Ok(())
}

async fn shutdown_signal() {
  if tokio::signal::ctrl_c().await.is_ok() {
    info!(target: "assessment_engine", "Shutdown signal received");
  }
}
