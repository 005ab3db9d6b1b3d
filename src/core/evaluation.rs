//! Turns per-example logits into ranking metrics under each candidate restriction.

use crate::core::candidate_masks::{mask_except, mask_ids, CandidateMasks};
use crate::core::metrics::{score_prediction, softmax, PredictionMetrics};
use crate::core::tokenizer::Tokenizer;
use crate::domain::model::{FactSample, StageReport};
use crate::utils::error::{ProbeError, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Restriction {
    /// Full vocabulary.
    None,
    RemoveStopwords,
    /// Objects that are gold anywhere in the dataset.
    GoldObjs,
    /// Objects that are gold for the sample's relation.
    GoldObjsRelationWise,
}

impl Restriction {
    pub const ALL: [Restriction; 4] = [
        Restriction::None,
        Restriction::RemoveStopwords,
        Restriction::GoldObjs,
        Restriction::GoldObjsRelationWise,
    ];

    /// Suffix appended to metric keys in the prediction file.
    pub fn suffix(self) -> &'static str {
        match self {
            Restriction::None => "",
            Restriction::RemoveStopwords => "_remove_stopwords",
            Restriction::GoldObjs => "_gold_objs",
            Restriction::GoldObjsRelationWise => "_gold_objs_relation_wise",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Restriction::None => "none",
            Restriction::RemoveStopwords => "remove_stopwords",
            Restriction::GoldObjs => "gold_objs",
            Restriction::GoldObjsRelationWise => "gold_objs_relation_wise",
        }
    }

    fn apply(self, logits: &mut [f32], masks: &CandidateMasks, sample: &FactSample) -> Result<()> {
        match self {
            Restriction::None => {}
            Restriction::RemoveStopwords => mask_ids(logits, &masks.stopword_ids),
            Restriction::GoldObjs => mask_except(logits, &masks.gold_obj_ids, masks.vocab_size),
            Restriction::GoldObjsRelationWise => mask_except(
                logits,
                masks.relation_gold_ids(&sample.rel_id)?,
                masks.vocab_size,
            ),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    pub uid: Value,
    pub label_text: String,
    pub rel_id: String,
    pub results: Vec<(Restriction, PredictionMetrics)>,
}

impl PredictionRecord {
    /// `uid`, `label_text`, then every metric with its restriction suffix.
    pub fn to_json(&self) -> Result<Value> {
        let mut object = Map::new();
        object.insert("uid".to_string(), self.uid.clone());
        object.insert("label_text".to_string(), Value::String(self.label_text.clone()));

        for (restriction, metrics) in &self.results {
            let Value::Object(fields) = serde_json::to_value(metrics)? else {
                return Err(ProbeError::processing("metrics did not serialize to an object"));
            };
            for (key, value) in fields {
                object.insert(format!("{}{}", key, restriction.suffix()), value);
            }
        }
        Ok(Value::Object(object))
    }

    pub fn metrics(&self, restriction: Restriction) -> Option<&PredictionMetrics> {
        self.results
            .iter()
            .find(|(r, _)| *r == restriction)
            .map(|(_, m)| m)
    }
}

/// Scores one example under all four restrictions.
pub fn evaluate_sample<T: Tokenizer + ?Sized>(
    logits: &[f32],
    sample: &FactSample,
    masks: &CandidateMasks,
    tokenizer: &T,
) -> Result<PredictionRecord> {
    let label_id = tokenizer.first_word_token(&sample.output).ok_or_else(|| {
        ProbeError::processing(format!("object {:?} encodes to no tokens", sample.output))
    })?;
    if logits.iter().any(|x| x.is_nan()) {
        return Err(ProbeError::processing(format!(
            "prediction for sample {} contains NaN logits",
            sample.uid
        )));
    }
    let probs = softmax(logits);

    // Other gold objects of the same subject and relation must not count against hits@k.
    let mut other_gold = masks.pair_gold_ids(&sample.pair_key())?.clone();
    if !other_gold.remove(&label_id) {
        return Err(ProbeError::processing(format!(
            "object {:?} of sample {} is not a gold object of {} in all.json",
            sample.output,
            sample.uid,
            sample.pair_key()
        )));
    }

    let mut results = Vec::with_capacity(Restriction::ALL.len());
    for restriction in Restriction::ALL {
        let mut restricted = logits.to_vec();
        restriction.apply(&mut restricted, masks, sample)?;

        let mut for_hits_k = restricted.clone();
        mask_ids(&mut for_hits_k, &other_gold);

        let metrics = score_prediction(&restricted, &for_hits_k, &probs, tokenizer, label_id)?;
        results.push((restriction, metrics));
    }

    Ok(PredictionRecord {
        uid: sample.uid.clone(),
        label_text: sample.output.clone(),
        rel_id: sample.rel_id.clone(),
        results,
    })
}

pub fn evaluate_predictions<T: Tokenizer + ?Sized>(
    predictions: &[Vec<f32>],
    samples: &[FactSample],
    masks: &CandidateMasks,
    tokenizer: &T,
) -> Result<Vec<PredictionRecord>> {
    if predictions.len() != samples.len() {
        return Err(ProbeError::shape(format!(
            "{} prediction rows for {} validation samples",
            predictions.len(),
            samples.len()
        )));
    }

    tracing::info!("Processing {} output predictions", samples.len());
    predictions
        .iter()
        .zip(samples)
        .enumerate()
        .map(|(idx, (logits, sample))| {
            if idx > 0 && idx % 1000 == 0 {
                tracing::debug!("Scored {} / {} predictions", idx, samples.len());
            }
            evaluate_sample(logits, sample, masks, tokenizer)
        })
        .collect()
}

/// Reads logits rows from a JSON array of rows, or JSON lines holding either a
/// bare row or an object with a `logits` field.
pub fn parse_prediction_rows(bytes: &[u8]) -> Result<Vec<Vec<f32>>> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ProbeError::processing(format!("predictions are not UTF-8: {}", e)))?;

    if text.trim_start().starts_with('[') {
        if let Ok(rows) = serde_json::from_str::<Vec<Vec<f32>>>(text) {
            return Ok(rows);
        }
    }

    let mut rows = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let row = match serde_json::from_str::<Value>(line)? {
            Value::Object(mut object) => object.remove("logits").ok_or_else(|| {
                ProbeError::processing(format!("line {} has no 'logits' field", line_no + 1))
            })?,
            other => other,
        };
        rows.push(serde_json::from_value(row)?);
    }
    Ok(rows)
}

pub fn records_to_jsonl(records: &[PredictionRecord]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for record in records {
        serde_json::to_writer(&mut out, &record.to_json()?)?;
        out.push(b'\n');
    }
    Ok(out)
}

/// `(dataset_name, file_name)` of a validation file such as `data/LAMA_TREx/test.json`.
fn dataset_and_file(validation_file: &Path) -> Result<(String, String)> {
    let file_name = validation_file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ProbeError::config(format!("{} has no file name", validation_file.display())))?;
    let dataset_name = validation_file
        .parent()
        .and_then(Path::file_name)
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    Ok((dataset_name.to_string(), file_name.to_string()))
}

/// `pred_<dataset>_<file>l`, so `test.json` becomes `test.jsonl`.
pub fn prediction_file_name(validation_file: &Path) -> Result<String> {
    let (dataset_name, file_name) = dataset_and_file(validation_file)?;
    Ok(format!("pred_{}_{}l", dataset_name, file_name))
}

/// `summary_<dataset>_<stem>.<extension>`.
pub fn summary_file_name(validation_file: &Path, extension: &str) -> Result<String> {
    let (dataset_name, file_name) = dataset_and_file(validation_file)?;
    let stem = Path::new(&file_name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&file_name)
        .to_string();
    Ok(format!("summary_{}_{}.{}", dataset_name, stem, extension))
}

/// `all.json` beside the validation file.
pub fn all_samples_path(validation_file: &Path) -> std::path::PathBuf {
    validation_file
        .parent()
        .unwrap_or_else(|| Path::new(""))
        .join("all.json")
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MetricMeans {
    pub count: usize,
    pub mrr: f64,
    #[serde(rename = "hits@1")]
    pub hits_at_1: f64,
    #[serde(rename = "hits@10")]
    pub hits_at_10: f64,
    #[serde(rename = "hits@100")]
    pub hits_at_100: f64,
}

impl MetricMeans {
    fn add(&mut self, metrics: &PredictionMetrics) {
        self.count += 1;
        self.mrr += metrics.mrr;
        self.hits_at_1 += metrics.hits_at_1;
        self.hits_at_10 += metrics.hits_at_10;
        self.hits_at_100 += metrics.hits_at_100;
    }

    fn finish(mut self) -> Self {
        if self.count > 0 {
            let n = self.count as f64;
            self.mrr /= n;
            self.hits_at_1 /= n;
            self.hits_at_10 /= n;
            self.hits_at_100 /= n;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationSummary {
    pub overall: BTreeMap<Restriction, MetricMeans>,
    pub per_relation: BTreeMap<String, BTreeMap<Restriction, MetricMeans>>,
}

#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    scope: &'a str,
    restriction: &'a str,
    count: usize,
    mrr: f64,
    #[serde(rename = "hits@1")]
    hits_at_1: f64,
    #[serde(rename = "hits@10")]
    hits_at_10: f64,
    #[serde(rename = "hits@100")]
    hits_at_100: f64,
}

impl EvaluationSummary {
    /// Macro averages per relation and micro averages overall.
    pub fn from_records(records: &[PredictionRecord]) -> Self {
        let mut overall: BTreeMap<Restriction, MetricMeans> = BTreeMap::new();
        let mut per_relation: BTreeMap<String, BTreeMap<Restriction, MetricMeans>> = BTreeMap::new();

        for record in records {
            for (restriction, metrics) in &record.results {
                overall.entry(*restriction).or_default().add(metrics);
                per_relation
                    .entry(record.rel_id.clone())
                    .or_default()
                    .entry(*restriction)
                    .or_default()
                    .add(metrics);
            }
        }

        let finish = |map: BTreeMap<Restriction, MetricMeans>| -> BTreeMap<Restriction, MetricMeans> {
            map.into_iter().map(|(r, m)| (r, m.finish())).collect()
        };
        Self {
            overall: finish(overall),
            per_relation: per_relation
                .into_iter()
                .map(|(rel, map)| (rel, finish(map)))
                .collect(),
        }
    }

    /// Serialized with restriction names as keys.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let named = |map: &BTreeMap<Restriction, MetricMeans>| -> Result<Value> {
            let mut object = Map::new();
            for (restriction, means) in map {
                object.insert(restriction.label().to_string(), serde_json::to_value(means)?);
            }
            Ok(Value::Object(object))
        };

        let mut per_relation = Map::new();
        for (rel, map) in &self.per_relation {
            per_relation.insert(rel.clone(), named(map)?);
        }
        let mut root = Map::new();
        root.insert("overall".to_string(), named(&self.overall)?);
        root.insert("per_relation".to_string(), Value::Object(per_relation));
        root.insert(
            "generated_at".to_string(),
            Value::String(chrono::Utc::now().to_rfc3339()),
        );
        Ok(serde_json::to_vec_pretty(&Value::Object(root))?)
    }

    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        let scopes = std::iter::once(("all", &self.overall))
            .chain(self.per_relation.iter().map(|(rel, map)| (rel.as_str(), map)));
        for (scope, map) in scopes {
            for (restriction, means) in map {
                writer.serialize(SummaryRow {
                    scope,
                    restriction: restriction.label(),
                    count: means.count,
                    mrr: means.mrr,
                    hits_at_1: means.hits_at_1,
                    hits_at_10: means.hits_at_10,
                    hits_at_100: means.hits_at_100,
                })?;
            }
        }
        writer
            .into_inner()
            .map_err(|e| ProbeError::IoError(e.into_error()))
    }
}

/// Transform-stage output of the evaluation job.
#[derive(Debug, Clone)]
pub struct EvaluationOutput {
    pub records: Vec<PredictionRecord>,
    pub summary: EvaluationSummary,
}

impl StageReport for EvaluationOutput {
    fn describe(&self) -> String {
        let mrr = self
            .summary
            .overall
            .get(&Restriction::None)
            .map(|m| m.mrr)
            .unwrap_or_default();
        format!("{} scored predictions (MRR {:.4})", self.records.len(), mrr)
    }
}
