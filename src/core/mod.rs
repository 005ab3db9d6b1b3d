pub mod candidate_masks;
pub mod engine;
pub mod evaluation;
pub mod logits;
pub mod metrics;
pub mod sample_counts;
pub mod sft_dataset;
pub mod stopwords;
pub mod tokenizer;

pub use crate::domain::model::{FactSample, StageReport};
pub use crate::domain::ports::{ConfigProvider, Pipeline, Storage};
pub use crate::utils::error::Result;
