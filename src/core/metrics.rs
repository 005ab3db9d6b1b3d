//! Rank-based metrics for a single prediction.

use crate::core::tokenizer::Tokenizer;
use crate::utils::error::{ProbeError, Result};
use serde::{Deserialize, Serialize};

pub const TOP_K: usize = 100;
pub const HITS_AT: [usize; 3] = [1, 10, 100];

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return vec![0.0; logits.len()];
    }
    let exps: Vec<f32> = logits.iter().map(|x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Vocabulary ids ordered by logit, highest first; ties keep the lower id first.
pub fn ranked_ids(logits: &[f32]) -> Vec<usize> {
    let mut ids: Vec<usize> = (0..logits.len()).collect();
    ids.sort_by(|a, b| logits[*b].total_cmp(&logits[*a]).then_with(|| a.cmp(b)));
    ids
}

/// 1-based rank of `label_id`.
pub fn rank_of(ranked: &[usize], label_id: usize) -> Result<usize> {
    ranked
        .iter()
        .position(|id| *id == label_id)
        .map(|pos| pos + 1)
        .ok_or_else(|| {
            ProbeError::processing(format!(
                "label id {} is outside the {} vocabulary logits",
                label_id,
                ranked.len()
            ))
        })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionMetrics {
    pub top_100_text: Vec<String>,
    pub top_100_logits: Vec<f32>,
    pub top_100_probs: Vec<f32>,
    pub mrr: f64,
    #[serde(rename = "hits@1")]
    pub hits_at_1: f64,
    #[serde(rename = "hits@10")]
    pub hits_at_10: f64,
    #[serde(rename = "hits@100")]
    pub hits_at_100: f64,
}

/// `logits` decide the top-100 list and MRR; `logits_for_hits_k` (with the other gold
/// objects of the same subject and relation masked) decide hits@k. `probs` always come
/// from the unrestricted distribution.
pub fn score_prediction<T: Tokenizer + ?Sized>(
    logits: &[f32],
    logits_for_hits_k: &[f32],
    probs: &[f32],
    tokenizer: &T,
    label_id: u32,
) -> Result<PredictionMetrics> {
    if logits.len() != logits_for_hits_k.len() || logits.len() != probs.len() {
        return Err(ProbeError::shape(format!(
            "logits ({}), hits@k logits ({}) and probs ({}) differ in length",
            logits.len(),
            logits_for_hits_k.len(),
            probs.len()
        )));
    }

    let ranked = ranked_ids(logits);
    let top: Vec<usize> = ranked.iter().take(TOP_K).copied().collect();

    let rank = rank_of(&ranked, label_id as usize)?;
    let rank_for_hits_k = rank_of(&ranked_ids(logits_for_hits_k), label_id as usize)?;
    let hit = |k: usize| if rank_for_hits_k <= k { 1.0 } else { 0.0 };

    Ok(PredictionMetrics {
        top_100_text: top
            .iter()
            .map(|id| tokenizer.decode(*id as u32).trim().to_string())
            .collect(),
        top_100_logits: top.iter().map(|id| logits[*id]).collect(),
        top_100_probs: top.iter().map(|id| probs[*id]).collect(),
        mrr: 1.0 / rank as f64,
        hits_at_1: hit(HITS_AT[0]),
        hits_at_10: hit(HITS_AT[1]),
        hits_at_100: hit(HITS_AT[2]),
    })
}
