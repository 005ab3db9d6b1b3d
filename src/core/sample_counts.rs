//! Per-relation sample counts across the train / test / all splits.

use crate::domain::model::{FactSample, StageReport};
use crate::utils::error::{ProbeError, Result};
use serde::Serialize;
use std::collections::HashMap;

pub const TOTAL_KEY: &str = "all";
pub const TREX_DATASET: &str = "LAMA_TREx";
const TREX_NON_NUMERIC_RANK: u64 = 10000;

pub fn count_by_relation(samples: &[FactSample]) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for sample in samples {
        *counts.entry(sample.rel_id.clone()).or_insert(0) += 1;
        *counts.entry(TOTAL_KEY.to_string()).or_insert(0) += 1;
    }
    counts
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelationRow {
    pub relation: String,
    pub train: usize,
    pub test: usize,
    pub all: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationCounts {
    pub dataset_name: String,
    pub rows: Vec<RelationRow>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SortKey<'a> {
    Numeric(u64),
    Text(&'a str),
}

/// `P19` sorts as 19. Keys without a numeric tail sort as 10000 for T-REx, so
/// `all` comes last, and alphabetically after every numeric key elsewhere.
fn sort_key<'a>(key: &'a str, dataset_name: &str) -> SortKey<'a> {
    let tail = key.get(1..).unwrap_or("");
    if !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(n) = tail.parse::<u64>() {
            return SortKey::Numeric(n);
        }
    }
    if dataset_name == TREX_DATASET {
        SortKey::Numeric(TREX_NON_NUMERIC_RANK)
    } else {
        SortKey::Text(key)
    }
}

impl RelationCounts {
    /// Rows are keyed by the relations present in `all`.
    pub fn from_splits(
        dataset_name: &str,
        train: &[FactSample],
        test: &[FactSample],
        all: &[FactSample],
    ) -> Self {
        let train_counts = count_by_relation(train);
        let test_counts = count_by_relation(test);
        let all_counts = count_by_relation(all);

        let mut keys: Vec<&String> = all_counts.keys().collect();
        keys.sort_by(|a, b| {
            sort_key(a, dataset_name)
                .cmp(&sort_key(b, dataset_name))
                .then_with(|| a.cmp(b))
        });

        let rows = keys
            .into_iter()
            .map(|key| RelationRow {
                relation: key.clone(),
                train: train_counts.get(key).copied().unwrap_or(0),
                test: test_counts.get(key).copied().unwrap_or(0),
                all: all_counts.get(key).copied().unwrap_or(0),
            })
            .collect();

        Self {
            dataset_name: dataset_name.to_string(),
            rows,
        }
    }

    pub fn row(&self, relation: &str) -> Option<&RelationRow> {
        self.rows.iter().find(|row| row.relation == relation)
    }

    /// Plain-text table as printed on the console.
    pub fn render_table(&self) -> String {
        let mut out = format!("\tTrain / {:>5} / {:>5}\n", "Test", "All");
        for row in &self.rows {
            out.push_str(&format!(
                "{}:\t{:>5} / {:>5} / {:>5}\n",
                row.relation, row.train, row.test, row.all
            ));
        }
        out.push('\n');
        out
    }

    pub fn to_csv(&self) -> Result<Vec<u8>> {
        let mut writer = csv::Writer::from_writer(Vec::new());
        for row in &self.rows {
            writer.serialize(row)?;
        }
        writer
            .into_inner()
            .map_err(|e| ProbeError::IoError(e.into_error()))
    }
}

impl StageReport for RelationCounts {
    fn describe(&self) -> String {
        format!("{} relation rows for {}", self.rows.len(), self.dataset_name)
    }
}
