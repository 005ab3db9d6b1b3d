mod common;

use probe_eval::config::toml_config::SftSettings;
use probe_eval::domain::model::{Batch, SupervisedExample, IGNORE_INDEX};
use probe_eval::utils::validation::Validate;
use probe_eval::{BpeTokenizer, LocalStorage, ProbeEngine, SftPipeline, Tokenizer};
use tempfile::TempDir;

fn id(token: &str) -> i64 {
    common::token_id(token) as i64
}

#[tokio::test]
async fn test_sft_job_masks_prompt_tokens() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let data_dir = common::write_dataset(temp_dir.path())?;
    let vocab = common::write_tokenizer(temp_dir.path())?;
    let output_dir = temp_dir.path().join("sft");

    let settings = SftSettings {
        data_file: Some(common::path_str(&data_dir.join("train.json"))),
        tokenizer: Some(common::path_str(&vocab)),
        block_size: 10,
        truncated: true,
        batch_size: Some(2),
        output_path: common::path_str(&output_dir),
    };
    settings.validate()?;

    let tokenizer = BpeTokenizer::from_file(&vocab)?.with_default_special_tokens();
    let pad = tokenizer.pad_token_id().map(i64::from).unwrap();
    let storage = LocalStorage::new(settings.output_path.clone());
    let output_path = ProbeEngine::new(SftPipeline::new(storage, settings, tokenizer))
        .run()
        .await?;
    assert!(output_path.ends_with("sft_LAMA_TREx_train.jsonl"));

    let examples: Vec<SupervisedExample> = std::fs::read_to_string(&output_path)?
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(examples.len(), 3);

    // " The capital of France is Paris</s>"
    let first = &examples[0];
    assert_eq!(
        &first.input_ids[..7],
        &[id("ĠThe"), id("Ġcapital"), id("Ġof"), id("ĠFrance"), id("Ġis"), id("ĠParis"), id("</s>")]
    );
    assert_eq!(&first.input_ids[7..], &[pad, pad, pad]);
    assert!(first.labels[..5].iter().all(|l| *l == IGNORE_INDEX));
    assert_eq!(first.labels[5], id("ĠParis"));
    assert_eq!(first.labels[6], id("</s>"));

    let batches: Vec<Batch> = std::fs::read_to_string(output_dir.join("sft_LAMA_TREx_train_batches.jsonl"))?
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].len(), 2);
    assert_eq!(batches[1].len(), 1);
    assert_eq!(batches[0].labels[0][7], IGNORE_INDEX);
    assert!(!batches[0].attention_mask[0][7]);
    assert!(batches[0].attention_mask[0][6]);
    Ok(())
}

#[tokio::test]
async fn test_full_prompt_wraps_input() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let data_dir = common::write_dataset(temp_dir.path())?;
    let vocab = common::write_tokenizer(temp_dir.path())?;

    let settings = SftSettings {
        data_file: Some(common::path_str(&data_dir.join("test.json"))),
        tokenizer: Some(common::path_str(&vocab)),
        block_size: 64,
        truncated: false,
        batch_size: None,
        output_path: common::path_str(temp_dir.path()),
    };
    let tokenizer = BpeTokenizer::from_file(&vocab)?.with_default_special_tokens();
    let storage = LocalStorage::new(settings.output_path.clone());
    let output_path = ProbeEngine::new(SftPipeline::new(storage, settings, tokenizer))
        .run()
        .await?;

    let written = std::fs::read_to_string(&output_path)?;
    let example: SupervisedExample = serde_json::from_str(written.lines().next().unwrap())?;
    assert_eq!(example.input_ids.len(), 64);
    let supervised: Vec<i64> = example
        .labels
        .iter()
        .copied()
        .filter(|l| *l != IGNORE_INDEX && *l != example.input_ids[63])
        .collect();
    assert_eq!(supervised, vec![id("ĠRome"), id("</s>")]);
    assert!(!temp_dir.path().join("sft_LAMA_TREx_test_batches.jsonl").exists());
    Ok(())
}
