mod common;

use probe_eval::config::toml_config::{EvaluateSettings, SelectLogitsSettings};
use probe_eval::core::logits::ProbeMode;
use probe_eval::domain::model::{RawLogitsBatch, IGNORE_INDEX};
use probe_eval::utils::validation::Validate;
use probe_eval::{
    EvaluatePipeline, LocalStorage, ProbeEngine, ProbeError, BpeTokenizer, SelectLogitsPipeline,
};
use serde_json::Value;
use std::io::Read;
use std::path::Path;
use tempfile::TempDir;

fn scores(width: usize, entries: &[(&str, f32)]) -> Vec<f32> {
    let mut row = vec![0.0; width];
    for (token, score) in entries {
        row[common::token_id(token)] = *score;
    }
    row
}

/// Raw causal-LM outputs for the two test facts; the object is predicted at position 1.
fn write_raw_logits(dir: &Path, width: usize) -> anyhow::Result<String> {
    let filler = vec![0.0; width];
    let italy = scores(width, &[("Ġthe", 5.0), ("ĠParis", 4.0), ("ĠRome", 3.0)]);
    let dante = scores(width, &[("ĠDante", 6.0), ("ĠFlorence", 2.0)]);
    let batch = RawLogitsBatch {
        logits: vec![
            vec![filler.clone(), italy, filler.clone(), filler.clone()],
            vec![filler.clone(), dante, filler.clone(), filler],
        ],
        labels: vec![
            vec![IGNORE_INDEX, IGNORE_INDEX, common::token_id("ĠRome") as i64, common::token_id("</s>") as i64],
            vec![IGNORE_INDEX, IGNORE_INDEX, common::token_id("ĠFlorence") as i64, common::token_id("</s>") as i64],
        ],
    };
    let path = dir.join("raw_logits.json");
    std::fs::write(&path, serde_json::to_vec(&batch)?)?;
    Ok(common::path_str(&path))
}

fn read_jsonl(path: &Path) -> anyhow::Result<Vec<Value>> {
    Ok(std::fs::read_to_string(path)?
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?)
}

#[tokio::test]
async fn test_select_then_evaluate() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let data_dir = common::write_dataset(temp_dir.path())?;
    let vocab = common::write_tokenizer(temp_dir.path())?;
    let output_dir = temp_dir.path().join("results");
    let width = BpeTokenizer::from_file(&vocab)?
        .with_default_special_tokens()
        .len();

    let select = SelectLogitsSettings {
        inputs: vec![write_raw_logits(temp_dir.path(), width)?],
        output_path: common::path_str(&output_dir),
        ..SelectLogitsSettings::default()
    };
    select.validate()?;
    let storage = LocalStorage::new(select.output_path.clone());
    let predictions = ProbeEngine::new(SelectLogitsPipeline::new(storage, select, ProbeMode::Causal))
        .run()
        .await?;

    let evaluate = EvaluateSettings {
        validation_file: Some(common::path_str(&data_dir.join("test.json"))),
        predictions: Some(predictions),
        tokenizer: Some(common::path_str(&vocab)),
        output_path: common::path_str(&output_dir),
        archive: Some("results.zip".to_string()),
        ..EvaluateSettings::default()
    };
    evaluate.validate()?;
    let tokenizer = BpeTokenizer::from_file(&vocab)?.with_default_special_tokens();
    let storage = LocalStorage::new(evaluate.output_path.clone());
    let output_path = ProbeEngine::new(EvaluatePipeline::new(storage, evaluate, tokenizer))
        .run()
        .await?;
    assert!(output_path.ends_with("pred_LAMA_TREx_test.jsonl"));

    let records = read_jsonl(Path::new(&output_path))?;
    assert_eq!(records.len(), 2);

    let italy = &records[0];
    assert_eq!(italy["uid"], "3");
    assert_eq!(italy["label_text"], "Rome");
    assert_eq!(italy["top_100_text"][0], "the");
    assert_eq!(italy["mrr_remove_stopwords"], 0.5);
    assert_eq!(italy["mrr_gold_objs_relation_wise"], 0.5);
    assert_eq!(italy["hits@1"], 0.0);
    assert_eq!(italy["hits@10"], 1.0);

    let dante = &records[1];
    assert_eq!(dante["mrr"], 0.5);
    assert_eq!(dante["mrr_gold_objs"], 1.0);
    assert_eq!(dante["hits@1_gold_objs_relation_wise"], 1.0);

    let summary: Value =
        serde_json::from_slice(&std::fs::read(output_dir.join("summary_LAMA_TREx_test.json"))?)?;
    assert_eq!(summary["overall"]["none"]["count"], 2);
    assert_eq!(summary["per_relation"]["P19"]["gold_objs"]["mrr"], 1.0);
    assert!(output_dir.join("summary_LAMA_TREx_test.csv").exists());

    let mut archive = zip::ZipArchive::new(std::fs::File::open(output_dir.join("results.zip"))?)?;
    assert_eq!(archive.len(), 3);
    let mut archived = String::new();
    archive
        .by_name("pred_LAMA_TREx_test.jsonl")?
        .read_to_string(&mut archived)?;
    assert_eq!(archived, std::fs::read_to_string(&output_path)?);
    Ok(())
}

#[tokio::test]
async fn test_unknown_relation_fails_evaluation() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let data_dir = common::write_dataset(temp_dir.path())?;
    let vocab = common::write_tokenizer(temp_dir.path())?;
    let tokenizer = BpeTokenizer::from_file(&vocab)?.with_default_special_tokens();

    let stranger = serde_json::json!([
        {"uid": "9", "subj": "London", "rel_id": "P1376", "output": "England"}
    ]);
    let validation = data_dir.join("dev.json");
    std::fs::write(&validation, serde_json::to_vec(&stranger)?)?;
    let predictions = temp_dir.path().join("preds.jsonl");
    std::fs::write(
        &predictions,
        format!("{}\n", serde_json::to_string(&vec![0.0f32; tokenizer.len()])?),
    )?;

    let settings = EvaluateSettings {
        validation_file: Some(common::path_str(&validation)),
        predictions: Some(common::path_str(&predictions)),
        tokenizer: Some(common::path_str(&vocab)),
        output_path: common::path_str(temp_dir.path()),
        ..EvaluateSettings::default()
    };
    let storage = LocalStorage::new(settings.output_path.clone());
    let result = ProbeEngine::new(EvaluatePipeline::new(storage, settings, tokenizer))
        .run()
        .await;
    assert!(matches!(result, Err(ProbeError::ProcessingError { .. })));
    assert!(!temp_dir.path().join("pred_LAMA_TREx_dev.jsonl").exists());
    Ok(())
}
