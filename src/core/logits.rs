//! Picks the vocabulary logits at the object position of each probe sentence.

use crate::domain::model::{RawLogitsBatch, StageReport};
use crate::utils::error::{ProbeError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// Causal LM: the object is the first label that is not `IGNORE_INDEX`,
    /// predicted from the position before it.
    Causal,
    /// Masked LM: the object sits at the mask token.
    Masked { mask_token_id: i64 },
}

/// One `vocab`-length row per example.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SelectedLogits {
    pub rows: Vec<Vec<f32>>,
}

impl StageReport for SelectedLogits {
    fn describe(&self) -> String {
        format!("{} logits rows", self.rows.len())
    }
}

impl SelectedLogits {
    pub fn extend(&mut self, other: SelectedLogits) {
        self.rows.extend(other.rows);
    }

    pub fn vocab_width(&self) -> Option<usize> {
        self.rows.first().map(Vec::len)
    }
}

fn first_index(labels: &[i64], predicate: impl Fn(i64) -> bool) -> usize {
    labels.iter().position(|label| predicate(*label)).unwrap_or(0)
}

/// The logits sequence may be longer than the labels when prompt tuning prepends
/// virtual tokens, so both are aligned on their last `labels.len()` positions.
pub fn select_label_logits(batch: &RawLogitsBatch, mode: ProbeMode) -> Result<SelectedLogits> {
    if batch.logits.len() != batch.labels.len() {
        return Err(ProbeError::shape(format!(
            "{} logits sequences but {} label sequences",
            batch.logits.len(),
            batch.labels.len()
        )));
    }

    let mut rows = Vec::with_capacity(batch.labels.len());
    let mut vocab_width: Option<usize> = None;

    for (row_idx, (sequence, labels)) in batch.logits.iter().zip(&batch.labels).enumerate() {
        if labels.is_empty() {
            return Err(ProbeError::shape(format!("example {} has no labels", row_idx)));
        }
        if sequence.len() < labels.len() {
            return Err(ProbeError::shape(format!(
                "example {} has {} logits positions for {} labels",
                row_idx,
                sequence.len(),
                labels.len()
            )));
        }
        let offset = sequence.len() - labels.len();

        let label_idx = match mode {
            ProbeMode::Causal => first_index(&labels[1..], |label| label >= 0),
            ProbeMode::Masked { mask_token_id } => first_index(labels, |label| label == mask_token_id),
        };

        let row = &sequence[offset + label_idx];
        match vocab_width {
            Some(width) if width != row.len() => {
                return Err(ProbeError::shape(format!(
                    "example {} has {} vocabulary logits, expected {}",
                    row_idx,
                    row.len(),
                    width
                )));
            }
            None => vocab_width = Some(row.len()),
            _ => {}
        }
        rows.push(row.clone());
    }

    Ok(SelectedLogits { rows })
}
