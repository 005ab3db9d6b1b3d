pub mod cli;
pub mod toml_config;

#[cfg(feature = "cli")]
use clap::{Args, Parser, Subcommand};
#[cfg(feature = "cli")]
use toml_config::{CountSettings, EvaluateSettings, SelectLogitsSettings, SftSettings, TomlConfig};

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "probe-eval")]
#[command(about = "Dataset statistics, fine-tuning data and ranking metrics for factual-knowledge probing")]
pub struct CliConfig {
    /// TOML file providing defaults for every subcommand
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Log CPU and memory usage per stage")]
    pub monitor: bool,

    #[arg(long, global = true, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Count samples per relation in the train, test and all splits
    Count(CountArgs),
    /// Tokenize a split into supervised fine-tuning examples
    BuildSft(SftArgs),
    /// Extract object-position logits from raw model outputs
    SelectLogits(SelectLogitsArgs),
    /// Score predictions with MRR and hits@k under each candidate restriction
    Evaluate(EvaluateArgs),
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Default, Args)]
pub struct CountArgs {
    #[arg(long)]
    pub data_root: Option<String>,
    #[arg(long)]
    pub dataset_name: Option<String>,
    #[arg(long)]
    pub output_path: Option<String>,
    #[arg(long, help = "Also write the table as CSV")]
    pub csv: bool,
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Default, Args)]
pub struct SftArgs {
    #[arg(long)]
    pub data_file: Option<String>,
    #[arg(long)]
    pub tokenizer: Option<String>,
    #[arg(long)]
    pub block_size: Option<usize>,
    #[arg(long, help = "Use the '### Input:' prompt instead of the truncated input")]
    pub full_prompt: bool,
    #[arg(long)]
    pub batch_size: Option<usize>,
    #[arg(long)]
    pub output_path: Option<String>,
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Default, Args)]
pub struct SelectLogitsArgs {
    #[arg(long = "input", value_delimiter = ',')]
    pub inputs: Vec<String>,
    #[arg(long, value_parser = ["clm", "mlm"])]
    pub mode: Option<String>,
    #[arg(long)]
    pub tokenizer: Option<String>,
    #[arg(long)]
    pub mask_token_id: Option<i64>,
    #[arg(long)]
    pub output_path: Option<String>,
    #[arg(long)]
    pub output_file: Option<String>,
}

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Default, Args)]
pub struct EvaluateArgs {
    #[arg(long)]
    pub validation_file: Option<String>,
    #[arg(long)]
    pub predictions: Option<String>,
    #[arg(long)]
    pub tokenizer: Option<String>,
    #[arg(long)]
    pub output_path: Option<String>,
    #[arg(long)]
    pub stopwords_file: Option<String>,
    #[arg(long, help = "Bundle outputs into this zip archive")]
    pub archive: Option<String>,
    #[arg(long, help = "Skip the aggregated summary files")]
    pub no_summary: bool,
}

#[cfg(feature = "cli")]
fn override_with<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}

#[cfg(feature = "cli")]
impl CountArgs {
    pub fn into_settings(self, config: &TomlConfig) -> CountSettings {
        let mut settings = config.count.clone().unwrap_or_default();
        override_with(&mut settings.data_root, self.data_root);
        override_with(&mut settings.dataset_name, self.dataset_name);
        override_with(&mut settings.output_path, self.output_path);
        settings.write_csv |= self.csv;
        settings
    }
}

#[cfg(feature = "cli")]
impl SftArgs {
    pub fn into_settings(self, config: &TomlConfig) -> SftSettings {
        let mut settings = config.sft.clone().unwrap_or_default();
        if self.data_file.is_some() {
            settings.data_file = self.data_file;
        }
        if self.tokenizer.is_some() {
            settings.tokenizer = self.tokenizer;
        }
        override_with(&mut settings.block_size, self.block_size);
        if self.full_prompt {
            settings.truncated = false;
        }
        if self.batch_size.is_some() {
            settings.batch_size = self.batch_size;
        }
        override_with(&mut settings.output_path, self.output_path);
        settings
    }
}

#[cfg(feature = "cli")]
impl SelectLogitsArgs {
    pub fn into_settings(self, config: &TomlConfig) -> SelectLogitsSettings {
        let mut settings = config.select_logits.clone().unwrap_or_default();
        if !self.inputs.is_empty() {
            settings.inputs = self.inputs;
        }
        override_with(&mut settings.mode, self.mode);
        if self.tokenizer.is_some() {
            settings.tokenizer = self.tokenizer;
        }
        if self.mask_token_id.is_some() {
            settings.mask_token_id = self.mask_token_id;
        }
        override_with(&mut settings.output_path, self.output_path);
        override_with(&mut settings.output_file, self.output_file);
        settings
    }
}

#[cfg(feature = "cli")]
impl EvaluateArgs {
    pub fn into_settings(self, config: &TomlConfig) -> EvaluateSettings {
        let mut settings = config.evaluate.clone().unwrap_or_default();
        if self.validation_file.is_some() {
            settings.validation_file = self.validation_file;
        }
        if self.predictions.is_some() {
            settings.predictions = self.predictions;
        }
        if self.tokenizer.is_some() {
            settings.tokenizer = self.tokenizer;
        }
        override_with(&mut settings.output_path, self.output_path);
        if self.stopwords_file.is_some() {
            settings.stopwords_file = self.stopwords_file;
        }
        if self.archive.is_some() {
            settings.archive = self.archive;
        }
        if self.no_summary {
            settings.write_summary = false;
        }
        settings
    }
}

#[cfg(all(test, feature = "cli"))]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parser_builds() {
        CliConfig::command().debug_assert();
    }

    #[test]
    fn test_global_args_and_subcommand() {
        let cli = CliConfig::parse_from([
            "probe-eval",
            "--verbose",
            "count",
            "--dataset-name",
            "Squad",
            "--csv",
        ]);
        assert!(cli.verbose);
        let Commands::Count(args) = cli.command else {
            panic!("expected the count subcommand");
        };
        let settings = args.into_settings(&TomlConfig::default());
        assert_eq!(settings.dataset_name, "Squad");
        assert_eq!(settings.data_root, "data");
        assert!(settings.write_csv);
    }

    #[test]
    fn test_cli_overrides_toml() {
        let config = TomlConfig::from_toml_str(
            "[evaluate]\nvalidation_file = \"data/LAMA_TREx/test.json\"\ntokenizer = \"tok.json\"\noutput_path = \"runs\"\n",
        )
        .unwrap();
        let cli = CliConfig::parse_from([
            "probe-eval",
            "evaluate",
            "--predictions",
            "logits.json",
            "--output-path",
            "elsewhere",
            "--no-summary",
        ]);
        let Commands::Evaluate(args) = cli.command else {
            panic!("expected the evaluate subcommand");
        };
        let settings = args.into_settings(&config);
        assert_eq!(settings.validation_file.as_deref(), Some("data/LAMA_TREx/test.json"));
        assert_eq!(settings.predictions.as_deref(), Some("logits.json"));
        assert_eq!(settings.output_path, "elsewhere");
        assert!(!settings.write_summary);
    }

    #[test]
    fn test_select_logits_inputs_list() {
        let cli = CliConfig::parse_from([
            "probe-eval",
            "select-logits",
            "--input",
            "a.json,b.json",
            "--mode",
            "mlm",
            "--mask-token-id",
            "50264",
        ]);
        let Commands::SelectLogits(args) = cli.command else {
            panic!("expected the select-logits subcommand");
        };
        let settings = args.into_settings(&TomlConfig::default());
        assert_eq!(settings.inputs, vec!["a.json", "b.json"]);
        assert_eq!(settings.mode, "mlm");
        assert_eq!(settings.mask_token_id, Some(50264));
    }
}
