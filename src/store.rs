//! Attempt store: process-wide registry of attempts, keyed by attempt id.
//!
//! Each attempt sits behind its own mutex so answer recording and finishing are
//! serialized per attempt while different attempts proceed independently.
//! Nothing is evicted; attempts live until the process exits.

use std::{collections::HashMap, sync::Arc};

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, instrument};

use crate::domain::Attempt;

pub type SharedAttempt = Arc<Mutex<Attempt>>;

#[derive(Default)]
pub struct AttemptStore {
    attempts: RwLock<HashMap<String, SharedAttempt>>,
}

impl AttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fully built attempt; returns its id.
    #[instrument(level = "debug", skip(self, attempt), fields(id = %attempt.id))]
    pub async fn insert(&self, attempt: Attempt) -> String {
        let id = attempt.id.clone();
        self.attempts
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(attempt)));
        debug!(target: "assessment", %id, "Attempt stored");
        id
    }

    pub async fn get(&self, id: &str) -> Option<SharedAttempt> {
        self.attempts.read().await.get(id).cloned()
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.attempts.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn attempt(id: &str) -> Attempt {
        Attempt {
            id: id.into(),
            candidate_id: "ID12345".into(),
            candidate_name: "Jane Doe".into(),
            sources: Vec::new(),
            title: "Manual".into(),
            started_at: Utc::now(),
            deck: Vec::new(),
            answers: HashMap::new(),
            finished_at: None,
        }
    }

    #[tokio::test]
    async fn stored_attempts_are_shared_not_copied() {
        let store = AttemptStore::new();
        store.insert(attempt("a1")).await;
        assert_eq!(store.len().await, 1);
        assert!(store.get("missing").await.is_none());

        let handle = store.get("a1").await.unwrap();
        handle.lock().await.title = "Changed".into();
        assert_eq!(store.get("a1").await.unwrap().lock().await.title, "Changed");
    }
}
