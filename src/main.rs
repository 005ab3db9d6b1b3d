use clap::Parser;
use probe_eval::config::{Commands, CliConfig};
use probe_eval::core::logits::ProbeMode;
use probe_eval::core::{ConfigProvider, Pipeline};
use probe_eval::utils::{logger, validation::Validate};
use probe_eval::{
    BpeTokenizer, CountPipeline, EvaluatePipeline, LocalStorage, ProbeEngine, ProbeError, Result,
    SelectLogitsPipeline, SftPipeline, TomlConfig, Tokenizer,
};

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();

    let toml_config = match &cli.config {
        Some(path) => match TomlConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("❌ Failed to load {}: {}", path, e.user_friendly_message());
                std::process::exit(1);
            }
        },
        None => TomlConfig::default(),
    };

    let verbose = cli.verbose;
    if cli.json_logs || toml_config.json_logs() {
        logger::init_json_logger(verbose);
    } else {
        logger::init_cli_logger(verbose);
    }

    tracing::info!("Starting probe-eval");
    if verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    let monitor_enabled = cli.monitor || toml_config.monitoring_enabled();
    if monitor_enabled {
        tracing::info!("🔍 System monitoring enabled");
    }

    match run(cli.command, &toml_config, monitor_enabled).await {
        Ok(output_path) => {
            println!("✅ Done");
            println!("📁 Output saved to: {}", output_path);
        }
        Err(e) => {
            tracing::error!(
                "❌ Job failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 Suggestion: {}", e.recovery_suggestion());

            std::process::exit(e.severity().exit_code());
        }
    }
}

async fn run(command: Commands, toml_config: &TomlConfig, monitor_enabled: bool) -> Result<String> {
    match command {
        Commands::Count(args) => {
            let settings = args.into_settings(toml_config);
            settings.validate()?;
            let storage = LocalStorage::new(settings.output_path().to_string());
            execute(CountPipeline::new(storage, settings), monitor_enabled).await
        }
        Commands::BuildSft(args) => {
            let settings = args.into_settings(toml_config);
            settings.validate()?;
            let tokenizer = load_tokenizer(settings.tokenizer.as_deref())?;
            let storage = LocalStorage::new(settings.output_path().to_string());
            execute(SftPipeline::new(storage, settings, tokenizer), monitor_enabled).await
        }
        Commands::SelectLogits(args) => {
            let settings = args.into_settings(toml_config);
            settings.validate()?;
            let mode = match settings.mode.as_str() {
                "mlm" => {
                    let mask_token_id = match settings.mask_token_id {
                        Some(id) => id,
                        None => load_tokenizer(settings.tokenizer.as_deref())?
                            .mask_token_id()
                            .map(i64::from)
                            .ok_or_else(|| {
                                ProbeError::config("tokenizer defines no mask token; pass --mask-token-id")
                            })?,
                    };
                    ProbeMode::Masked { mask_token_id }
                }
                _ => ProbeMode::Causal,
            };
            let storage = LocalStorage::new(settings.output_path().to_string());
            execute(SelectLogitsPipeline::new(storage, settings, mode), monitor_enabled).await
        }
        Commands::Evaluate(args) => {
            let settings = args.into_settings(toml_config);
            settings.validate()?;
            let tokenizer = load_tokenizer(settings.tokenizer.as_deref())?;
            let storage = LocalStorage::new(settings.output_path().to_string());
            execute(EvaluatePipeline::new(storage, settings, tokenizer), monitor_enabled).await
        }
    }
}

fn load_tokenizer(path: Option<&str>) -> Result<BpeTokenizer> {
    let path = path.ok_or_else(|| ProbeError::MissingConfigError {
        field: "tokenizer".to_string(),
    })?;
    let tokenizer = BpeTokenizer::from_file(path)?.with_default_special_tokens();
    tracing::info!("Loaded tokenizer {} ({} entries)", path, tokenizer.vocab_size());
    Ok(tokenizer)
}

async fn execute<P: Pipeline>(pipeline: P, monitor_enabled: bool) -> Result<String> {
    ProbeEngine::new_with_monitoring(pipeline, monitor_enabled)
        .run()
        .await
}
