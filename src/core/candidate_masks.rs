//! Candidate sets used to restrict which vocabulary entries may be ranked.

use crate::core::stopwords::with_capitalized;
use crate::core::tokenizer::Tokenizer;
use crate::domain::model::{FactSample, MASKED_LOGIT};
use crate::utils::error::{ProbeError, Result};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Default)]
pub struct CandidateMasks {
    /// Single-token stopwords, with and without a leading space.
    pub stopword_ids: BTreeSet<u32>,
    /// First token of every gold object in the dataset.
    pub gold_obj_ids: BTreeSet<u32>,
    pub gold_obj_ids_by_relation: HashMap<String, BTreeSet<u32>>,
    /// Keyed by `"{subj}_{rel_id}"`.
    pub gold_obj_ids_by_pair: HashMap<String, BTreeSet<u32>>,
    /// Base vocabulary size; ids at or above it are added tokens.
    pub vocab_size: usize,
}

impl CandidateMasks {
    pub fn build<T, S>(tokenizer: &T, samples: &[FactSample], stopwords: &[S]) -> Self
    where
        T: Tokenizer + ?Sized,
        S: AsRef<str>,
    {
        let mut masks = CandidateMasks {
            vocab_size: tokenizer.vocab_size(),
            ..CandidateMasks::default()
        };

        for word in with_capitalized(stopwords) {
            for text in [format!(" {}", word), word] {
                let ids = tokenizer.encode(&text);
                if let [id] = ids.as_slice() {
                    masks.stopword_ids.insert(*id);
                }
            }
        }

        for sample in samples {
            let Some(obj_id) = tokenizer.first_word_token(&sample.output) else {
                tracing::warn!("Object {:?} of sample {} encodes to nothing", sample.output, sample.uid);
                continue;
            };
            masks.gold_obj_ids.insert(obj_id);
            masks
                .gold_obj_ids_by_relation
                .entry(sample.rel_id.clone())
                .or_default()
                .insert(obj_id);
            masks
                .gold_obj_ids_by_pair
                .entry(sample.pair_key())
                .or_default()
                .insert(obj_id);
        }

        tracing::debug!(
            "Candidate masks: {} stopword ids, {} gold object ids over {} relations and {} subject-relation pairs",
            masks.stopword_ids.len(),
            masks.gold_obj_ids.len(),
            masks.gold_obj_ids_by_relation.len(),
            masks.gold_obj_ids_by_pair.len()
        );
        masks
    }

    pub fn relation_gold_ids(&self, rel_id: &str) -> Result<&BTreeSet<u32>> {
        self.gold_obj_ids_by_relation.get(rel_id).ok_or_else(|| {
            ProbeError::processing(format!("relation {} does not occur in all.json", rel_id))
        })
    }

    pub fn pair_gold_ids(&self, pair_key: &str) -> Result<&BTreeSet<u32>> {
        self.gold_obj_ids_by_pair.get(pair_key).ok_or_else(|| {
            ProbeError::processing(format!(
                "subject-relation pair {} does not occur in all.json",
                pair_key
            ))
        })
    }
}

/// Overwrites the listed ids.
pub fn mask_ids<'a>(logits: &mut [f32], ids: impl IntoIterator<Item = &'a u32>) {
    for id in ids {
        if let Some(value) = logits.get_mut(*id as usize) {
            *value = MASKED_LOGIT;
        }
    }
}

/// Overwrites every base-vocabulary id outside `allowed`; added tokens keep their logits.
pub fn mask_except(logits: &mut [f32], allowed: &BTreeSet<u32>, vocab_size: usize) {
    for (id, value) in logits.iter_mut().enumerate().take(vocab_size) {
        if !allowed.contains(&(id as u32)) {
            *value = MASKED_LOGIT;
        }
    }
}
