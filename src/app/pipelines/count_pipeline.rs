use crate::config::toml_config::CountSettings;
use crate::core::sample_counts::RelationCounts;
use crate::core::{ConfigProvider, FactSample, Pipeline, StageReport, Storage};
use crate::domain::model::parse_samples;
use crate::utils::error::Result;
use std::path::Path;

pub const SPLITS: [&str; 3] = ["train", "test", "all"];

pub struct CountPipeline<S: Storage> {
    storage: S,
    settings: CountSettings,
}

pub struct DatasetSplits {
    pub train: Vec<FactSample>,
    pub test: Vec<FactSample>,
    pub all: Vec<FactSample>,
}

impl StageReport for DatasetSplits {
    fn describe(&self) -> String {
        format!(
            "{} train / {} test / {} all samples",
            self.train.len(),
            self.test.len(),
            self.all.len()
        )
    }
}

impl<S: Storage> CountPipeline<S> {
    pub fn new(storage: S, settings: CountSettings) -> Self {
        Self { storage, settings }
    }

    fn split_path(&self, split: &str) -> String {
        Path::new(&self.settings.data_root)
            .join(&self.settings.dataset_name)
            .join(format!("{}.json", split))
            .to_string_lossy()
            .into_owned()
    }

    async fn read_split(&self, split: &str) -> Result<Vec<FactSample>> {
        let path = self.split_path(split);
        let samples = parse_samples(&self.storage.read_file(&path).await?)?;
        tracing::debug!("Loaded {} samples from {}", samples.len(), path);
        Ok(samples)
    }
}

#[async_trait::async_trait]
impl<S: Storage> Pipeline for CountPipeline<S> {
    type Extracted = DatasetSplits;
    type Transformed = RelationCounts;

    fn name(&self) -> &str {
        "count"
    }

    async fn extract(&self) -> Result<DatasetSplits> {
        Ok(DatasetSplits {
            train: self.read_split(SPLITS[0]).await?,
            test: self.read_split(SPLITS[1]).await?,
            all: self.read_split(SPLITS[2]).await?,
        })
    }

    async fn transform(&self, data: DatasetSplits) -> Result<RelationCounts> {
        Ok(RelationCounts::from_splits(
            &self.settings.dataset_name,
            &data.train,
            &data.test,
            &data.all,
        ))
    }

    async fn load(&self, result: RelationCounts) -> Result<String> {
        let table = result.render_table();
        print!("{}", table);

        let table_name = format!("counts_{}.txt", result.dataset_name);
        self.storage.write_file(&table_name, table.as_bytes()).await?;

        if self.settings.write_csv {
            let csv_name = format!("counts_{}.csv", result.dataset_name);
            self.storage.write_file(&csv_name, &result.to_csv()?).await?;
        }

        Ok(Path::new(self.settings.output_path())
            .join(table_name)
            .to_string_lossy()
            .into_owned())
    }
}
