use crate::config::toml_config::SftSettings;
use crate::core::sft_dataset::{DataCollator, SupervisedDataset};
use crate::core::tokenizer::Tokenizer;
use crate::core::{ConfigProvider, FactSample, Pipeline, StageReport, Storage};
use crate::domain::model::{parse_samples, Batch};
use crate::utils::error::{ProbeError, Result};
use std::path::Path;

pub struct SftPipeline<S: Storage, T: Tokenizer> {
    storage: S,
    settings: SftSettings,
    tokenizer: T,
}

pub struct SftOutput {
    pub dataset: SupervisedDataset,
    pub batches: Option<Vec<Batch>>,
}

impl StageReport for SftOutput {
    fn describe(&self) -> String {
        match &self.batches {
            Some(batches) => format!("{} in {} batches", self.dataset.describe(), batches.len()),
            None => self.dataset.describe(),
        }
    }
}

impl<S: Storage, T: Tokenizer> SftPipeline<S, T> {
    pub fn new(storage: S, settings: SftSettings, tokenizer: T) -> Self {
        Self {
            storage,
            settings,
            tokenizer,
        }
    }

    fn data_file(&self) -> Result<&str> {
        self.settings
            .data_file
            .as_deref()
            .ok_or_else(|| ProbeError::MissingConfigError {
                field: "sft.data_file".to_string(),
            })
    }

    fn output_stem(&self) -> Result<String> {
        let data_file = Path::new(self.data_file()?);
        let stem = data_file
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("data");
        Ok(match data_file.parent().and_then(Path::file_name).and_then(|n| n.to_str()) {
            Some(dataset) => format!("sft_{}_{}", dataset, stem),
            None => format!("sft_{}", stem),
        })
    }
}

#[async_trait::async_trait]
impl<S: Storage, T: Tokenizer> Pipeline for SftPipeline<S, T> {
    type Extracted = Vec<FactSample>;
    type Transformed = SftOutput;

    fn name(&self) -> &str {
        "build-sft"
    }

    async fn extract(&self) -> Result<Vec<FactSample>> {
        let path = self.data_file()?;
        tracing::info!("Loading data from {}", path);
        parse_samples(&self.storage.read_file(path).await?)
    }

    async fn transform(&self, data: Vec<FactSample>) -> Result<SftOutput> {
        let dataset = SupervisedDataset::new(
            &data,
            &self.tokenizer,
            self.settings.block_size,
            self.settings.truncated,
        )?;

        let batches = match self.settings.batch_size {
            Some(batch_size) => {
                let collator = DataCollator::from_tokenizer(&self.tokenizer)?;
                Some(collator.batches(&dataset, batch_size))
            }
            None => None,
        };

        Ok(SftOutput { dataset, batches })
    }

    async fn load(&self, result: SftOutput) -> Result<String> {
        let stem = self.output_stem()?;
        let examples_name = format!("{}.jsonl", stem);
        self.storage
            .write_file(&examples_name, &result.dataset.to_jsonl()?)
            .await?;

        if let Some(batches) = &result.batches {
            let mut out = Vec::new();
            for batch in batches {
                serde_json::to_writer(&mut out, batch)?;
                out.push(b'\n');
            }
            self.storage
                .write_file(&format!("{}_batches.jsonl", stem), &out)
                .await?;
        }

        Ok(Path::new(self.settings.output_path())
            .join(examples_name)
            .to_string_lossy()
            .into_owned())
    }
}
