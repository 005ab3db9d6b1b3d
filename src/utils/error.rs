use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Tokenizer error: {message}")]
    TokenizerError { message: String },

    #[error("Shape mismatch: {message}")]
    ShapeError { message: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Input,
    Processing,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Medium,
    High,
    Critical,
}

impl ErrorSeverity {
    /// Process exit code for a failed job.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        }
    }
}

impl ProbeError {
    pub fn processing(message: impl Into<String>) -> Self {
        Self::ProcessingError {
            message: message.into(),
        }
    }

    pub fn shape(message: impl Into<String>) -> Self {
        Self::ShapeError {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ProbeError::ConfigError { .. }
            | ProbeError::MissingConfigError { .. }
            | ProbeError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            ProbeError::SerializationError(_)
            | ProbeError::CsvError(_)
            | ProbeError::TokenizerError { .. } => ErrorCategory::Input,
            ProbeError::ShapeError { .. } | ProbeError::ProcessingError { .. } => {
                ErrorCategory::Processing
            }
            ProbeError::IoError(_) | ProbeError::ZipError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Configuration => ErrorSeverity::High,
            ErrorCategory::Input => ErrorSeverity::High,
            ErrorCategory::Processing => ErrorSeverity::Medium,
            ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            ProbeError::ConfigError { .. } => "Check the TOML file and command-line flags",
            ProbeError::MissingConfigError { .. } => {
                "Provide the missing value on the command line or in the [section] of the config file"
            }
            ProbeError::InvalidConfigValueError { .. } => "Correct the value and run again",
            ProbeError::SerializationError(_) => {
                "Make sure the input files are valid JSON with the expected fields"
            }
            ProbeError::CsvError(_) => "Check that the output directory is writable",
            ProbeError::TokenizerError { .. } => {
                "Point --tokenizer at a BPE tokenizer.json, or a vocab.json with merges.txt beside it"
            }
            ProbeError::ShapeError { .. } => {
                "Check that logits and labels come from the same evaluation run"
            }
            ProbeError::ProcessingError { .. } => {
                "Check that the validation file and all.json come from the same dataset"
            }
            ProbeError::IoError(_) => "Check that the paths exist and are accessible",
            ProbeError::ZipError(_) => "Check free disk space in the output directory",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Invalid configuration: {}", self),
            ErrorCategory::Input => format!("Could not read input: {}", self),
            ErrorCategory::Processing => format!("Processing failed: {}", self),
            ErrorCategory::System => format!("System error: {}", self),
        }
    }
}

impl From<toml::de::Error> for ProbeError {
    fn from(err: toml::de::Error) -> Self {
        ProbeError::ConfigError {
            message: format!("TOML parsing error: {}", err),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProbeError>;
