use crate::core::ConfigProvider;
use crate::utils::error::{ProbeError, Result};
use crate::utils::validation::{
    validate_file_extension, validate_non_empty_string, validate_path, validate_positive_number,
    validate_required_field, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Every job's settings in one file; each section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    pub count: Option<CountSettings>,
    pub sft: Option<SftSettings>,
    pub select_logits: Option<SelectLogitsSettings>,
    pub evaluate: Option<EvaluateSettings>,
    pub monitoring: Option<MonitoringConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub json_logs: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CountSettings {
    pub data_root: String,
    pub dataset_name: String,
    pub output_path: String,
    /// Also write `counts_<dataset>.csv`.
    pub write_csv: bool,
}

impl Default for CountSettings {
    fn default() -> Self {
        Self {
            data_root: "data".to_string(),
            dataset_name: "LAMA_TREx".to_string(),
            output_path: "./output".to_string(),
            write_csv: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SftSettings {
    pub data_file: Option<String>,
    pub tokenizer: Option<String>,
    pub block_size: usize,
    /// `" {truncated_input}"` prompts when true, `### Input:` prompts otherwise.
    pub truncated: bool,
    /// When set, collated batches of this size are written as well.
    pub batch_size: Option<usize>,
    pub output_path: String,
}

impl Default for SftSettings {
    fn default() -> Self {
        Self {
            data_file: None,
            tokenizer: None,
            block_size: 128,
            truncated: true,
            batch_size: None,
            output_path: "./output".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectLogitsSettings {
    /// Raw `{"logits": [...], "labels": [...]}` batch files, concatenated in order.
    pub inputs: Vec<String>,
    /// `clm` or `mlm`.
    pub mode: String,
    pub tokenizer: Option<String>,
    pub mask_token_id: Option<i64>,
    pub output_path: String,
    pub output_file: String,
}

impl Default for SelectLogitsSettings {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            mode: "clm".to_string(),
            tokenizer: None,
            mask_token_id: None,
            output_path: "./output".to_string(),
            output_file: "selected_logits.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluateSettings {
    pub validation_file: Option<String>,
    pub predictions: Option<String>,
    pub tokenizer: Option<String>,
    pub output_path: String,
    /// Newline-separated stopwords replacing the built-in English list.
    pub stopwords_file: Option<String>,
    pub write_summary: bool,
    /// Zip archive bundling the prediction and summary files.
    pub archive: Option<String>,
}

impl Default for EvaluateSettings {
    fn default() -> Self {
        Self {
            validation_file: None,
            predictions: None,
            tokenizer: None,
            output_path: "./output".to_string(),
            stopwords_file: None,
            write_summary: true,
            archive: None,
        }
    }
}

impl TomlConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(ProbeError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;
        Ok(toml::from_str(&processed_content)?)
    }

    /// Replaces `${VAR}` with the environment value; unknown variables are left as is.
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| ProbeError::config(format!("invalid substitution pattern: {}", e)))?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.as_ref().map(|m| m.enabled).unwrap_or(false)
    }

    pub fn json_logs(&self) -> bool {
        self.monitoring.as_ref().map(|m| m.json_logs).unwrap_or(false)
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        if let Some(count) = &self.count {
            count.validate()?;
        }
        if let Some(sft) = &self.sft {
            sft.validate()?;
        }
        if let Some(select) = &self.select_logits {
            select.validate()?;
        }
        if let Some(evaluate) = &self.evaluate {
            evaluate.validate()?;
        }
        Ok(())
    }
}

impl Validate for CountSettings {
    fn validate(&self) -> Result<()> {
        validate_path("count.data_root", &self.data_root)?;
        validate_non_empty_string("count.dataset_name", &self.dataset_name)?;
        validate_path("count.output_path", &self.output_path)
    }
}

impl Validate for SftSettings {
    fn validate(&self) -> Result<()> {
        let data_file = validate_required_field("sft.data_file", &self.data_file)?;
        validate_file_extension("sft.data_file", data_file, &["json"])?;
        let tokenizer = validate_required_field("sft.tokenizer", &self.tokenizer)?;
        validate_file_extension("sft.tokenizer", tokenizer, &["json"])?;
        validate_positive_number("sft.block_size", self.block_size, 1)?;
        if let Some(batch_size) = self.batch_size {
            validate_positive_number("sft.batch_size", batch_size, 1)?;
        }
        validate_path("sft.output_path", &self.output_path)
    }
}

impl Validate for SelectLogitsSettings {
    fn validate(&self) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(ProbeError::MissingConfigError {
                field: "select_logits.inputs".to_string(),
            });
        }
        for input in &self.inputs {
            validate_file_extension("select_logits.inputs", input, &["json"])?;
        }
        match self.mode.as_str() {
            "clm" => {}
            "mlm" => {
                if self.mask_token_id.is_none() && self.tokenizer.is_none() {
                    return Err(ProbeError::MissingConfigError {
                        field: "select_logits.mask_token_id or select_logits.tokenizer".to_string(),
                    });
                }
            }
            other => {
                return Err(ProbeError::InvalidConfigValueError {
                    field: "select_logits.mode".to_string(),
                    value: other.to_string(),
                    reason: "Mode must be 'clm' or 'mlm'".to_string(),
                })
            }
        }
        validate_non_empty_string("select_logits.output_file", &self.output_file)?;
        validate_path("select_logits.output_path", &self.output_path)
    }
}

impl Validate for EvaluateSettings {
    fn validate(&self) -> Result<()> {
        let validation_file = validate_required_field("evaluate.validation_file", &self.validation_file)?;
        validate_file_extension("evaluate.validation_file", validation_file, &["json"])?;
        let predictions = validate_required_field("evaluate.predictions", &self.predictions)?;
        validate_path("evaluate.predictions", predictions)?;
        let tokenizer = validate_required_field("evaluate.tokenizer", &self.tokenizer)?;
        validate_file_extension("evaluate.tokenizer", tokenizer, &["json"])?;
        if let Some(archive) = &self.archive {
            validate_file_extension("evaluate.archive", archive, &["zip"])?;
        }
        validate_path("evaluate.output_path", &self.output_path)
    }
}

impl ConfigProvider for CountSettings {
    fn output_path(&self) -> &str {
        &self.output_path
    }
}

impl ConfigProvider for SftSettings {
    fn output_path(&self) -> &str {
        &self.output_path
    }
}

impl ConfigProvider for SelectLogitsSettings {
    fn output_path(&self) -> &str {
        &self.output_path
    }
}

impl ConfigProvider for EvaluateSettings {
    fn output_path(&self) -> &str {
        &self.output_path
    }

    fn archive_name(&self) -> Option<&str> {
        self.archive.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_parse_sections_with_defaults() {
        let toml_content = r#"
[count]
dataset_name = "Google_RE"

[evaluate]
validation_file = "data/LAMA_TREx/test.json"
predictions = "runs/gpt2/logits.json"
tokenizer = "models/gpt2/tokenizer.json"
archive = "results.zip"
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();

        let count = config.count.as_ref().unwrap();
        assert_eq!(count.dataset_name, "Google_RE");
        assert_eq!(count.data_root, "data");

        let evaluate = config.evaluate.as_ref().unwrap();
        assert!(evaluate.write_summary);
        assert_eq!(evaluate.archive_name(), Some("results.zip"));
        assert!(config.sft.is_none());
        assert!(!config.monitoring_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_var_substitution() {
        std::env::set_var("PROBE_EVAL_TEST_TOKENIZER", "models/roberta/vocab.json");

        let toml_content = r#"
[sft]
data_file = "data/LAMA_TREx/train.json"
tokenizer = "${PROBE_EVAL_TEST_TOKENIZER}"
"#;

        let config = TomlConfig::from_toml_str(toml_content).unwrap();
        assert_eq!(
            config.sft.unwrap().tokenizer.as_deref(),
            Some("models/roberta/vocab.json")
        );

        std::env::remove_var("PROBE_EVAL_TEST_TOKENIZER");
    }

    #[test]
    fn test_config_validation() {
        let toml_content = r#"
[select_logits]
inputs = ["batch_0.json"]
mode = "seq2seq"
"#;
        let config = TomlConfig::from_toml_str(toml_content).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ProbeError::InvalidConfigValueError { .. })
        ));

        let missing = TomlConfig::from_toml_str("[sft]\nblock_size = 64\n").unwrap();
        assert!(matches!(
            missing.validate(),
            Err(ProbeError::MissingConfigError { .. })
        ));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        assert!(matches!(
            TomlConfig::from_toml_str("[count\n"),
            Err(ProbeError::ConfigError { .. })
        ));
    }

    #[test]
    fn test_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(b"[monitoring]\nenabled = true\njson_logs = true\n")
            .unwrap();

        let config = TomlConfig::from_file(temp_file.path()).unwrap();
        assert!(config.monitoring_enabled());
        assert!(config.json_logs());
    }
}
