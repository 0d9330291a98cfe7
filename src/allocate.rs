//! Per-source question allocation and combined-deck assembly.

use std::collections::HashSet;

use rand::{seq::SliceRandom, Rng};

use crate::domain::QuestionRecord;
use crate::error::AssessmentError;

/// Joins a source key and a generated id in a combined deck. Configured keys never contain it.
pub const ID_SEPARATOR: char = ':';

/// Split `total` across `sources` buckets: `floor(total / sources)` each, then the
/// remainder one unit at a time in bucket order. Always sums to `total`.
pub fn split(total: usize, sources: usize) -> Vec<usize> {
  if sources == 0 {
    return Vec::new();
  }
  let base = total / sources;
  let remainder = total % sources;
  (0..sources).map(|i| base + usize::from(i < remainder)).collect()
}

/// A validated bank for one source, with the number of questions to draw from it.
#[derive(Clone, Debug)]
pub struct SourceDraw {
  pub key: String,
  pub bank: Vec<QuestionRecord>,
  pub count: usize,
}

/// Uniform sample without replacement: shuffle, then take from the front.
pub fn select<R: Rng + ?Sized>(mut bank: Vec<QuestionRecord>, count: usize, rng: &mut R) -> Vec<QuestionRecord> {
  bank.shuffle(rng);
  bank.truncate(count);
  bank
}

/// Draw from each source, prefix ids with the source key, tag the origin and
/// shuffle the union so deck position says nothing about the source.
pub fn combine<R: Rng + ?Sized>(draws: Vec<SourceDraw>, rng: &mut R) -> Result<Vec<QuestionRecord>, AssessmentError> {
  let mut deck = Vec::with_capacity(draws.iter().map(|d| d.count).sum());
  let mut seen = HashSet::new();
  for draw in draws {
    if draw.bank.len() < draw.count {
      return Err(AssessmentError::GenerationInsufficient { got: draw.bank.len(), needed: draw.count });
    }
    for mut q in select(draw.bank, draw.count, rng) {
      q.id = format!("{}{ID_SEPARATOR}{}", draw.key, q.id);
      if !seen.insert(q.id.clone()) {
        return Err(AssessmentError::QuestionInvalid {
          position: deck.len() + 1,
          reason: format!("duplicate id '{}' in combined deck", q.id),
        });
      }
      q.source = Some(draw.key.clone());
      deck.push(q);
    }
  }
  deck.shuffle(rng);
  Ok(deck)
}
