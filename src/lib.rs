pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::cli::LocalStorage;
pub use config::toml_config::TomlConfig;

pub use app::pipelines::{CountPipeline, EvaluatePipeline, SelectLogitsPipeline, SftPipeline};
pub use core::engine::ProbeEngine;
pub use core::tokenizer::{BpeTokenizer, Tokenizer};
pub use utils::error::{ProbeError, Result};
