//! Public protocol structs for the HTTP endpoints (serde ready).
//! Keep this small and stable to evolve backend and frontend independently.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::dispatch::DeliveryStatus;
use crate::domain::{DocumentRef, ResultPayload, ALL_SOURCES};
use crate::session::{
    AnswerAck, AttemptStatus, FinishedAttempt, PublicQuestion, ScoreSummary, StartRequest, StartedAttempt,
};

//
// HTTP request/response DTOs
//

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartIn {
    #[serde(alias = "name")]
    pub candidate_name: String,
    #[serde(alias = "cedula", alias = "candidateIdentifier")]
    pub candidate_id: String,
    #[serde(alias = "confirm", alias = "confirmationPhrase")]
    pub confirmation: String,
    #[serde(default = "all_sources")]
    pub source: String,
}

fn all_sources() -> String {
    ALL_SOURCES.to_string()
}

impl From<StartIn> for StartRequest {
    fn from(b: StartIn) -> Self {
        StartRequest {
            candidate_name: b.candidate_name,
            candidate_id: b.candidate_id,
            confirmation: b.confirmation,
            source: b.source,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartOut {
    pub attempt_id: String,
    pub source_title: String,
    pub total: usize,
    pub questions: Vec<PublicQuestion>,
}

impl From<StartedAttempt> for StartOut {
    fn from(s: StartedAttempt) -> Self {
        StartOut {
            attempt_id: s.attempt_id,
            source_title: s.source_title,
            total: s.questions.len(),
            questions: s.questions,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerIn {
    pub question_id: String,
    #[serde(alias = "choice", alias = "letter")]
    pub choice_letter: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOut {
    pub ok: bool,
    pub question_id: String,
    pub recorded: bool,
    pub answered: usize,
    pub total: usize,
}

impl From<AnswerAck> for AnswerOut {
    fn from(a: AnswerAck) -> Self {
        AnswerOut { ok: true, question_id: a.question_id, recorded: a.recorded, answered: a.answered, total: a.total }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishOut {
    pub summary: ScoreSummary,
    pub result: ResultPayload,
    pub delivery: DeliveryStatus,
}

impl From<FinishedAttempt> for FinishOut {
    fn from(f: FinishedAttempt) -> Self {
        FinishOut { summary: f.summary, result: f.result, delivery: f.delivery }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusOut {
    pub attempt_id: String,
    pub source_title: String,
    pub answered: usize,
    pub total: usize,
    pub finished: bool,
    pub answers: BTreeMap<String, char>,
}

impl From<AttemptStatus> for StatusOut {
    fn from(s: AttemptStatus) -> Self {
        StatusOut {
            attempt_id: s.attempt_id,
            source_title: s.source_title,
            answered: s.answers.len(),
            total: s.total,
            finished: s.finished,
            answers: s.answers,
        }
    }
}

#[derive(Serialize)]
pub struct SourceOut {
    pub key: String,
    pub title: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcesOut {
    pub sources: Vec<SourceOut>,
    pub question_count: usize,
    pub generation_enabled: bool,
}

/// Configured documents followed by the combined selector.
pub fn sources_out(docs: &[DocumentRef], question_count: usize, generation_enabled: bool) -> SourcesOut {
    let mut sources: Vec<SourceOut> = docs
        .iter()
        .map(|d| SourceOut { key: d.key.clone(), title: d.title.clone().unwrap_or_else(|| d.key.clone()) })
        .collect();
    sources.push(SourceOut { key: ALL_SOURCES.into(), title: "All documents".into() });
    SourcesOut { sources, question_count, generation_enabled }
}

#[derive(Serialize)]
pub struct HealthOut {
    pub ok: bool,
}
