//! Application state: configuration plus the session engine and its collaborators.
//!
//! This module owns the wiring:
//!   - HTTP document fetcher (retry policy from `[fetch]`)
//!   - optional OpenAI client; without it starts fail with `generation_unavailable`
//!   - result dispatcher (collector URL and delivery mode from config/env)
//!   - the process-wide attempt store

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::bank::BankGenerator;
use crate::config::{load_config_from_env, AssessmentConfig};
use crate::dispatch::ResultDispatcher;
use crate::extract::TextExtractor;
use crate::openai::OpenAI;
use crate::session::SessionEngine;
use crate::source::HttpFetcher;
use crate::store::AttemptStore;

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<AssessmentConfig>,
    pub engine: Arc<SessionEngine>,
}

impl AppState {
    /// Build state from env: load config, then construct fetcher, generator and dispatcher.
    #[instrument(level = "info", skip_all)]
    pub fn new() -> Result<Self, reqwest::Error> {
        let cfg = Arc::new(load_config_from_env());

        let fetcher = Arc::new(HttpFetcher::new(&cfg.fetch)?);
        let extractor = TextExtractor::new(fetcher, cfg.min_text_chars);

        let openai = OpenAI::from_env(&cfg.generation);
        let banks = match openai {
            Some(oa) => {
                info!(target: "assessment_engine", base_url = %oa.base_url, model = %oa.model, "OpenAI enabled.");
                Some(BankGenerator::new(
                    Arc::new(oa),
                    cfg.prompts.clone(),
                    cfg.role_hint.clone(),
                    cfg.max_source_chars,
                ))
            }
            None => {
                warn!(target: "assessment_engine", "OpenAI disabled (no OPENAI_API_KEY). Attempts cannot be started.");
                None
            }
        };

        let dispatcher = ResultDispatcher::from_config(&cfg);
        let store = Arc::new(AttemptStore::new());

        for doc in &cfg.documents {
            info!(target: "assessment_engine", key = %doc.key, url = %doc.url, "Configured source");
        }

        let engine = SessionEngine::new(cfg.clone(), store, extractor, banks, dispatcher);
        Ok(Self::with_engine(cfg, engine))
    }

    pub fn with_engine(cfg: Arc<AssessmentConfig>, engine: SessionEngine) -> Self {
        Self { cfg, engine: Arc::new(engine) }
    }
}
