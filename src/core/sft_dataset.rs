//! Supervised fine-tuning examples: prompt formatting, tokenization with
//! prompt-masked labels, and batch collation.

use crate::core::tokenizer::Tokenizer;
use crate::domain::model::{Batch, FactSample, StageReport, SupervisedExample, IGNORE_INDEX};
use crate::utils::error::{ProbeError, Result};

pub const PROMPT_TRUNCATED: &str = " {truncated_input}";
pub const PROMPT_FULL: &str = "### Input:\n {input}\n\n### Response:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStyle {
    /// `" {truncated_input}"`, the cloze-style prefix ending right before the object.
    Truncated,
    /// Instruction-style `### Input:` / `### Response:` block around `input`.
    Full,
}

impl PromptStyle {
    pub fn from_truncated(truncated: bool) -> Self {
        if truncated {
            PromptStyle::Truncated
        } else {
            PromptStyle::Full
        }
    }

    pub fn format(self, sample: &FactSample) -> Result<String> {
        let (template, field, value) = match self {
            PromptStyle::Truncated => (PROMPT_TRUNCATED, "truncated_input", &sample.truncated_input),
            PromptStyle::Full => (PROMPT_FULL, "input", &sample.input),
        };
        let value = value.as_deref().ok_or_else(|| {
            ProbeError::processing(format!(
                "sample {} has no '{}' field for the {:?} prompt",
                sample.uid, field, self
            ))
        })?;
        Ok(template.replace(&format!("{{{}}}", field), value))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenizedText {
    pub input_ids: Vec<i64>,
    /// Number of non-pad ids.
    pub len: usize,
}

/// Encodes `text`, truncates it to `block_size` and right-pads it to exactly `block_size`.
pub fn tokenize_padded<T: Tokenizer + ?Sized>(
    tokenizer: &T,
    text: &str,
    block_size: usize,
    pad_id: u32,
) -> TokenizedText {
    let mut input_ids: Vec<i64> = tokenizer
        .encode(text)
        .into_iter()
        .take(block_size)
        .map(i64::from)
        .collect();
    input_ids.resize(block_size, i64::from(pad_id));
    let len = input_ids.iter().filter(|id| **id != i64::from(pad_id)).count();
    TokenizedText { input_ids, len }
}

/// Tokenizes `source + " " + target` and hides the source positions from the loss.
pub fn preprocess<T: Tokenizer + ?Sized>(
    sources: &[String],
    targets: &[String],
    tokenizer: &T,
    block_size: usize,
) -> Result<Vec<SupervisedExample>> {
    if sources.len() != targets.len() {
        return Err(ProbeError::shape(format!(
            "{} sources but {} targets",
            sources.len(),
            targets.len()
        )));
    }
    let pad_id = require_pad_id(tokenizer)?;

    Ok(sources
        .iter()
        .zip(targets)
        .map(|(source, target)| {
            let example = tokenize_padded(tokenizer, &format!("{} {}", source, target), block_size, pad_id);
            let source_len = tokenize_padded(tokenizer, source, block_size, pad_id).len;

            let mut labels = example.input_ids.clone();
            for label in labels.iter_mut().take(source_len) {
                *label = IGNORE_INDEX;
            }
            SupervisedExample {
                input_ids: example.input_ids,
                labels,
            }
        })
        .collect())
}

fn require_pad_id<T: Tokenizer + ?Sized>(tokenizer: &T) -> Result<u32> {
    tokenizer.pad_token_id().ok_or_else(|| ProbeError::TokenizerError {
        message: "tokenizer has no pad token".to_string(),
    })
}

/// Dataset for supervised fine-tuning.
#[derive(Debug, Clone)]
pub struct SupervisedDataset {
    examples: Vec<SupervisedExample>,
}

impl SupervisedDataset {
    pub fn new<T: Tokenizer + ?Sized>(
        samples: &[FactSample],
        tokenizer: &T,
        block_size: usize,
        truncated: bool,
    ) -> Result<Self> {
        let style = PromptStyle::from_truncated(truncated);
        let eos = tokenizer.eos_token().ok_or_else(|| ProbeError::TokenizerError {
            message: "tokenizer has no eos token".to_string(),
        })?;

        tracing::info!("Formatting {} inputs with the {:?} prompt", samples.len(), style);
        let sources = samples
            .iter()
            .map(|sample| style.format(sample))
            .collect::<Result<Vec<_>>>()?;
        let targets: Vec<String> = samples
            .iter()
            .map(|sample| format!("{}{}", sample.output, eos))
            .collect();

        tracing::info!("Tokenizing inputs to block size {}", block_size);
        let examples = preprocess(&sources, &targets, tokenizer, block_size)?;
        Ok(Self { examples })
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&SupervisedExample> {
        self.examples.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SupervisedExample> {
        self.examples.iter()
    }

    /// One JSON object per line.
    pub fn to_jsonl(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        for example in &self.examples {
            serde_json::to_writer(&mut out, example)?;
            out.push(b'\n');
        }
        Ok(out)
    }
}

impl StageReport for SupervisedDataset {
    fn describe(&self) -> String {
        format!("{} supervised examples", self.len())
    }
}

/// Collates examples for supervised fine-tuning.
#[derive(Debug, Clone, Copy)]
pub struct DataCollator {
    pad_token_id: i64,
}

impl DataCollator {
    pub fn new(pad_token_id: u32) -> Self {
        Self {
            pad_token_id: i64::from(pad_token_id),
        }
    }

    pub fn from_tokenizer<T: Tokenizer + ?Sized>(tokenizer: &T) -> Result<Self> {
        Ok(Self::new(require_pad_id(tokenizer)?))
    }

    pub fn collate(&self, instances: &[&SupervisedExample]) -> Batch {
        let width = instances
            .iter()
            .map(|instance| instance.input_ids.len().max(instance.labels.len()))
            .max()
            .unwrap_or(0);

        let input_ids: Vec<Vec<i64>> = instances
            .iter()
            .map(|instance| pad_to(&instance.input_ids, width, self.pad_token_id))
            .collect();

        // Pad ids in labels become IGNORE_INDEX.
        let labels: Vec<Vec<i64>> = instances
            .iter()
            .map(|instance| {
                pad_to(&instance.labels, width, IGNORE_INDEX)
                    .into_iter()
                    .map(|label| if label == self.pad_token_id { IGNORE_INDEX } else { label })
                    .collect()
            })
            .collect();

        let attention_mask: Vec<Vec<bool>> = input_ids
            .iter()
            .map(|row| row.iter().map(|id| *id != self.pad_token_id).collect())
            .collect();

        Batch {
            input_ids,
            labels,
            attention_mask,
        }
    }

    /// Splits the dataset into consecutive batches of at most `batch_size` examples.
    pub fn batches(&self, dataset: &SupervisedDataset, batch_size: usize) -> Vec<Batch> {
        let refs: Vec<&SupervisedExample> = dataset.iter().collect();
        refs.chunks(batch_size.max(1))
            .map(|chunk| self.collate(chunk))
            .collect()
    }
}

fn pad_to(values: &[i64], width: usize, fill: i64) -> Vec<i64> {
    let mut padded = values.to_vec();
    padded.resize(width, fill);
    padded
}
