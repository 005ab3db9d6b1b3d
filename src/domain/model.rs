use crate::utils::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Label value excluded from the fine-tuning loss.
pub const IGNORE_INDEX: i64 = -100;

/// Value written over logits that are outside a candidate set.
pub const MASKED_LOGIT: f32 = -10000.0;

/// One (subject, relation, object) probing example as stored in the dataset JSON files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FactSample {
    #[serde(default)]
    pub uid: Value,
    pub subj: String,
    pub rel_id: String,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated_input: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FactSample {
    pub fn new(subj: &str, rel_id: &str, output: &str) -> Self {
        Self {
            uid: Value::Null,
            subj: subj.to_string(),
            rel_id: rel_id.to_string(),
            output: output.to_string(),
            input: None,
            truncated_input: None,
            extra: Map::new(),
        }
    }

    /// Key used to group gold objects sharing a subject and relation.
    pub fn pair_key(&self) -> String {
        format!("{}_{}", self.subj, self.rel_id)
    }
}

/// Parses a dataset split: a JSON array of sample objects.
pub fn parse_samples(bytes: &[u8]) -> Result<Vec<FactSample>> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Tokenized fine-tuning example padded to the block size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupervisedExample {
    pub input_ids: Vec<i64>,
    pub labels: Vec<i64>,
}

/// Collated batch ready to hand to a trainer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Batch {
    pub input_ids: Vec<Vec<i64>>,
    pub labels: Vec<Vec<i64>>,
    pub attention_mask: Vec<Vec<bool>>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}

/// Model output for one evaluation batch: `batch × seq × vocab` logits and `batch × seq` labels.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawLogitsBatch {
    pub logits: Vec<Vec<Vec<f32>>>,
    pub labels: Vec<Vec<i64>>,
}

/// Something a pipeline stage can report on after it runs.
pub trait StageReport {
    fn describe(&self) -> String;
}

impl<T> StageReport for Vec<T> {
    fn describe(&self) -> String {
        format!("{} records", self.len())
    }
}
