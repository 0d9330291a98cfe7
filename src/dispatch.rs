//! Result delivery to the external collector.
//!
//! Delivery is best-effort: its outcome is reported as a `DeliveryStatus` and
//! never turns a finish into a failure. `DeliveryMode` picks between waiting for
//! the collector (bounded by the delivery timeout) and detaching entirely.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::config::AssessmentConfig;
use crate::domain::ResultPayload;
use crate::util::trunc_for_log;

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
  /// Spawn delivery and answer the caller immediately.
  #[default]
  Detached,
  /// Wait for the collector before answering; the finish response reports the outcome.
  Awaited,
}

impl FromStr for DeliveryMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "detached" => Ok(DeliveryMode::Detached),
      "awaited" => Ok(DeliveryMode::Awaited),
      other => Err(format!("unknown delivery mode '{other}' (expected detached|awaited)")),
    }
  }
}

#[derive(Error, Debug)]
pub enum DeliveryError {
  #[error("collector request failed: {0}")]
  Transport(String),

  #[error("collector answered HTTP {status}: {body}")]
  Rejected { status: u16, body: String },

  #[error("collector did not answer within {0:?}")]
  TimedOut(Duration),
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeliveryStatus {
  /// No collector configured.
  Disabled,
  /// Handed to a background task.
  Queued,
  Delivered,
  Failed { reason: String },
}

#[async_trait]
pub trait ResultSink: Send + Sync {
  async fn deliver(&self, payload: &ResultPayload) -> Result<(), DeliveryError>;
}

/// POSTs the payload as JSON to the collector endpoint.
pub struct HttpCollector {
  client: reqwest::Client,
  url: String,
}

impl HttpCollector {
  pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
    let client = reqwest::Client::builder().timeout(timeout).build()?;
    Ok(Self { client, url: url.into() })
  }
}

#[async_trait]
impl ResultSink for HttpCollector {
  async fn deliver(&self, payload: &ResultPayload) -> Result<(), DeliveryError> {
    let res = self
      .client
      .post(&self.url)
      .header(USER_AGENT, "assessment-engine/0.1")
      .header(CONTENT_TYPE, "application/json")
      .json(payload)
      .send()
      .await
      .map_err(|e| DeliveryError::Transport(e.to_string()))?;

    let status = res.status();
    if !status.is_success() {
      let body = res.text().await.unwrap_or_default();
      return Err(DeliveryError::Rejected { status: status.as_u16(), body: trunc_for_log(&body, 200) });
    }
    Ok(())
  }
}

#[derive(Clone)]
pub struct ResultDispatcher {
  sink: Option<Arc<dyn ResultSink>>,
  mode: DeliveryMode,
  timeout: Duration,
}

impl ResultDispatcher {
  pub fn new(sink: Option<Arc<dyn ResultSink>>, mode: DeliveryMode, timeout: Duration) -> Self {
    Self { sink, mode, timeout }
  }

  /// HTTP collector from `collector_url`; delivery is disabled without one.
  pub fn from_config(cfg: &AssessmentConfig) -> Self {
    let sink: Option<Arc<dyn ResultSink>> = match cfg.collector_url.as_deref() {
      Some(url) => match HttpCollector::new(url, cfg.delivery_timeout()) {
        Ok(c) => {
          info!(target: "delivery", %url, mode = ?cfg.delivery_mode, "Result delivery enabled");
          Some(Arc::new(c))
        }
        Err(e) => {
          warn!(target: "delivery", %url, error = %e, "Could not build collector client; delivery disabled");
          None
        }
      },
      None => {
        info!(target: "delivery", "No collector configured; result delivery disabled");
        None
      }
    };
    Self::new(sink, cfg.delivery_mode, cfg.delivery_timeout())
  }

  #[instrument(level = "info", skip(self, payload), fields(attempt_id = %payload.attempt_id, mode = ?self.mode))]
  pub async fn dispatch(&self, payload: ResultPayload) -> DeliveryStatus {
    let Some(sink) = self.sink.clone() else {
      debug!(target: "delivery", "Delivery disabled");
      return DeliveryStatus::Disabled;
    };
    match self.mode {
      DeliveryMode::Detached => {
        let timeout = self.timeout;
        tokio::spawn(async move {
          let _ = deliver_bounded(sink.as_ref(), &payload, timeout).await;
        });
        DeliveryStatus::Queued
      }
      DeliveryMode::Awaited => match deliver_bounded(sink.as_ref(), &payload, self.timeout).await {
        Ok(()) => DeliveryStatus::Delivered,
        Err(e) => DeliveryStatus::Failed { reason: e.to_string() },
      },
    }
  }
}

async fn deliver_bounded(sink: &dyn ResultSink, payload: &ResultPayload, timeout: Duration) -> Result<(), DeliveryError> {
  let outcome = match tokio::time::timeout(timeout, sink.deliver(payload)).await {
    Ok(r) => r,
    Err(_) => Err(DeliveryError::TimedOut(timeout)),
  };
  match &outcome {
    Ok(()) => info!(target: "delivery", attempt_id = %payload.attempt_id, "Result delivered"),
    Err(e) => warn!(target: "delivery", attempt_id = %payload.attempt_id, error = %e, "Result delivery failed"),
  }
  outcome
}
