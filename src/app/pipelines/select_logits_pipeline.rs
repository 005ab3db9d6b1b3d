use crate::config::toml_config::SelectLogitsSettings;
use crate::core::logits::{select_label_logits, ProbeMode, SelectedLogits};
use crate::core::{ConfigProvider, Pipeline, Storage};
use crate::domain::model::RawLogitsBatch;
use crate::utils::error::Result;
use std::path::Path;

pub struct SelectLogitsPipeline<S: Storage> {
    storage: S,
    settings: SelectLogitsSettings,
    mode: ProbeMode,
}

impl<S: Storage> SelectLogitsPipeline<S> {
    pub fn new(storage: S, settings: SelectLogitsSettings, mode: ProbeMode) -> Self {
        Self {
            storage,
            settings,
            mode,
        }
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for SelectLogitsPipeline<S> {
    type Extracted = Vec<RawLogitsBatch>;
    type Transformed = SelectedLogits;

    fn name(&self) -> &str {
        "select-logits"
    }

    async fn extract(&self) -> Result<Vec<RawLogitsBatch>> {
        let mut batches = Vec::with_capacity(self.settings.inputs.len());
        for input in &self.settings.inputs {
            let batch: RawLogitsBatch = serde_json::from_slice(&self.storage.read_file(input).await?)?;
            tracing::debug!("{}: {} sequences", input, batch.labels.len());
            batches.push(batch);
        }
        Ok(batches)
    }

    async fn transform(&self, data: Vec<RawLogitsBatch>) -> Result<SelectedLogits> {
        let mut selected = SelectedLogits::default();
        for batch in &data {
            selected.extend(select_label_logits(batch, self.mode)?);
        }
        if let Some(width) = selected.vocab_width() {
            tracing::debug!("Selected rows have {} vocabulary logits", width);
        }
        Ok(selected)
    }

    async fn load(&self, result: SelectedLogits) -> Result<String> {
        let data = serde_json::to_vec(&result.rows)?;
        self.storage
            .write_file(&self.settings.output_file, &data)
            .await?;
        Ok(Path::new(self.settings.output_path())
            .join(&self.settings.output_file)
            .to_string_lossy()
            .into_owned())
    }
}
