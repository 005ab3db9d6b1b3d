use crate::app::pipelines::bundle_zip;
use crate::config::toml_config::EvaluateSettings;
use crate::core::candidate_masks::CandidateMasks;
use crate::core::evaluation::{
    all_samples_path, evaluate_predictions, parse_prediction_rows, prediction_file_name,
    records_to_jsonl, summary_file_name, EvaluationOutput, EvaluationSummary,
};
use crate::core::stopwords::{parse_stopword_list, ENGLISH_STOPWORDS};
use crate::core::tokenizer::Tokenizer;
use crate::core::{ConfigProvider, FactSample, Pipeline, StageReport, Storage};
use crate::domain::model::parse_samples;
use crate::utils::error::{ProbeError, Result};
use std::path::Path;

pub struct EvaluatePipeline<S: Storage, T: Tokenizer> {
    storage: S,
    settings: EvaluateSettings,
    tokenizer: T,
}

pub struct EvaluationInputs {
    pub validation: Vec<FactSample>,
    pub all: Vec<FactSample>,
    pub predictions: Vec<Vec<f32>>,
    pub stopwords: Vec<String>,
}

impl StageReport for EvaluationInputs {
    fn describe(&self) -> String {
        format!(
            "{} validation samples, {} prediction rows, {} reference samples",
            self.validation.len(),
            self.predictions.len(),
            self.all.len()
        )
    }
}

impl<S: Storage, T: Tokenizer> EvaluatePipeline<S, T> {
    pub fn new(storage: S, settings: EvaluateSettings, tokenizer: T) -> Self {
        Self {
            storage,
            settings,
            tokenizer,
        }
    }

    fn required<'a>(&self, field: &str, value: &'a Option<String>) -> Result<&'a str> {
        value.as_deref().ok_or_else(|| ProbeError::MissingConfigError {
            field: format!("evaluate.{}", field),
        })
    }

    fn validation_file(&self) -> Result<&Path> {
        self.required("validation_file", &self.settings.validation_file)
            .map(Path::new)
    }

    async fn read_samples(&self, path: &str) -> Result<Vec<FactSample>> {
        let samples = parse_samples(&self.storage.read_file(path).await?)?;
        tracing::debug!("Loaded {} samples from {}", samples.len(), path);
        Ok(samples)
    }
}

#[async_trait::async_trait]
impl<S: Storage, T: Tokenizer> Pipeline for EvaluatePipeline<S, T> {
    type Extracted = EvaluationInputs;
    type Transformed = EvaluationOutput;

    fn name(&self) -> &str {
        "evaluate"
    }

    async fn extract(&self) -> Result<EvaluationInputs> {
        let validation_file = self.validation_file()?;
        let validation = self
            .read_samples(&validation_file.to_string_lossy())
            .await?;
        let all = self
            .read_samples(&all_samples_path(validation_file).to_string_lossy())
            .await?;

        let predictions_path = self.required("predictions", &self.settings.predictions)?;
        let predictions = parse_prediction_rows(&self.storage.read_file(predictions_path).await?)?;

        let stopwords = match &self.settings.stopwords_file {
            Some(path) => {
                let bytes = self.storage.read_file(path).await?;
                parse_stopword_list(&String::from_utf8_lossy(&bytes))
            }
            None => ENGLISH_STOPWORDS.iter().map(|w| w.to_string()).collect(),
        };

        Ok(EvaluationInputs {
            validation,
            all,
            predictions,
            stopwords,
        })
    }

    async fn transform(&self, data: EvaluationInputs) -> Result<EvaluationOutput> {
        let masks = CandidateMasks::build(&self.tokenizer, &data.all, &data.stopwords);
        let records = evaluate_predictions(&data.predictions, &data.validation, &masks, &self.tokenizer)?;
        let summary = EvaluationSummary::from_records(&records);
        Ok(EvaluationOutput { records, summary })
    }

    async fn load(&self, result: EvaluationOutput) -> Result<String> {
        let validation_file = self.validation_file()?;
        let mut files = vec![(
            prediction_file_name(validation_file)?,
            records_to_jsonl(&result.records)?,
        )];

        if self.settings.write_summary {
            files.push((summary_file_name(validation_file, "json")?, result.summary.to_json()?));
            files.push((summary_file_name(validation_file, "csv")?, result.summary.to_csv()?));
        }

        for (name, contents) in &files {
            self.storage.write_file(name, contents).await?;
        }

        if let Some(archive) = self.settings.archive_name() {
            let bundle = bundle_zip(&files)?;
            tracing::debug!("Writing {} ({} bytes)", archive, bundle.len());
            self.storage.write_file(archive, &bundle).await?;
        }

        Ok(Path::new(self.settings.output_path())
            .join(&files[0].0)
            .to_string_lossy()
            .into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::pipelines::test_support::MockStorage;
    use crate::core::tokenizer::tests::sample_tokenizer;
    use crate::core::tokenizer::BpeTokenizer;

    fn row(tok: &BpeTokenizer, scores: &[(&str, f32)]) -> Vec<f32> {
        let mut logits = vec![0.0; tok.len()];
        for (token, score) in scores {
            logits[tok.token_id(token).unwrap() as usize] = *score;
        }
        logits
    }

    async fn seeded_storage(tok: &BpeTokenizer) -> MockStorage {
        let storage = MockStorage::default();
        let all = serde_json::json!([
            {"uid": "1", "subj": "France", "rel_id": "P36", "output": "Paris"},
            {"uid": "2", "subj": "Italy", "rel_id": "P36", "output": "Rome"},
            {"uid": "3", "subj": "Dante", "rel_id": "P19", "output": "Florence"}
        ]);
        let test = serde_json::json!([
            {"uid": "1", "subj": "France", "rel_id": "P36", "output": "Paris"},
            {"uid": "3", "subj": "Dante", "rel_id": "P19", "output": "Florence"}
        ]);
        storage
            .put("data/LAMA_TREx/all.json", &serde_json::to_vec(&all).unwrap())
            .await;
        storage
            .put("data/LAMA_TREx/test.json", &serde_json::to_vec(&test).unwrap())
            .await;

        let rows = vec![
            row(tok, &[("Ġthe", 3.0), ("ĠParis", 2.0)]),
            row(tok, &[("ĠRome", 3.0), ("ĠFlorence", 2.0)]),
        ];
        storage
            .put("logits.json", &serde_json::to_vec(&rows).unwrap())
            .await;
        storage
    }

    fn settings() -> EvaluateSettings {
        EvaluateSettings {
            validation_file: Some("data/LAMA_TREx/test.json".to_string()),
            predictions: Some("logits.json".to_string()),
            tokenizer: Some("tokenizer.json".to_string()),
            archive: Some("results.zip".to_string()),
            ..EvaluateSettings::default()
        }
    }

    #[tokio::test]
    async fn test_evaluate_pipeline_end_to_end() {
        let tok = sample_tokenizer();
        let storage = seeded_storage(&tok).await;
        let pipeline = EvaluatePipeline::new(storage.clone(), settings(), sample_tokenizer());

        let inputs = pipeline.extract().await.unwrap();
        assert_eq!(inputs.all.len(), 3);
        let output = pipeline.transform(inputs).await.unwrap();
        let path = pipeline.load(output).await.unwrap();
        assert!(path.ends_with("pred_LAMA_TREx_test.jsonl"));

        let preds = String::from_utf8(storage.get("pred_LAMA_TREx_test.jsonl").await.unwrap()).unwrap();
        let lines: Vec<serde_json::Value> = preds
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["uid"], "1");
        assert_eq!(lines[0]["mrr"], 0.5);
        assert_eq!(lines[0]["mrr_remove_stopwords"], 1.0);
        assert_eq!(lines[1]["mrr"], 0.5);
        assert_eq!(lines[1]["mrr_gold_objs_relation_wise"], 1.0);

        assert!(storage.get("summary_LAMA_TREx_test.json").await.is_some());
        assert!(storage.get("summary_LAMA_TREx_test.csv").await.is_some());
        let archive = storage.get("results.zip").await.unwrap();
        let archive = zip::ZipArchive::new(std::io::Cursor::new(archive)).unwrap();
        assert_eq!(archive.len(), 3);
    }

    #[tokio::test]
    async fn test_prediction_count_mismatch_is_reported() {
        let tok = sample_tokenizer();
        let storage = seeded_storage(&tok).await;
        storage
            .put("logits.json", &serde_json::to_vec(&vec![row(&tok, &[])]).unwrap())
            .await;
        let pipeline = EvaluatePipeline::new(storage, settings(), sample_tokenizer());

        let inputs = pipeline.extract().await.unwrap();
        assert!(matches!(
            pipeline.transform(inputs).await,
            Err(ProbeError::ShapeError { .. })
        ));
    }

    #[tokio::test]
    async fn test_custom_stopwords_file() {
        let tok = sample_tokenizer();
        let storage = seeded_storage(&tok).await;
        storage.put("stopwords.txt", b"paris\n").await;
        let mut settings = settings();
        settings.stopwords_file = Some("stopwords.txt".to_string());
        settings.write_summary = false;
        settings.archive = None;
        let pipeline = EvaluatePipeline::new(storage.clone(), settings, sample_tokenizer());

        let inputs = pipeline.extract().await.unwrap();
        assert_eq!(inputs.stopwords, vec!["paris"]);
        let output = pipeline.transform(inputs).await.unwrap();
        pipeline.load(output).await.unwrap();

        // "Paris" (capitalised form of the custom stopword) is masked, so the label drops out of the top.
        let preds = String::from_utf8(storage.get("pred_LAMA_TREx_test.jsonl").await.unwrap()).unwrap();
        let first: serde_json::Value = serde_json::from_str(preds.lines().next().unwrap()).unwrap();
        assert_eq!(first["top_100_logits_remove_stopwords"][0], 3.0);
        assert!(storage.get("summary_LAMA_TREx_test.json").await.is_none());
    }
}
