use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("required column `{column}` is missing from the input header")]
    MissingField { column: String },
    #[error("malformed row at line {line}: {reason}")]
    MalformedRow { line: u64, reason: String },
    #[error(
        "{excluded} of {total} rows were malformed, above the allowed ratio of {max_ratio}"
    )]
    ExclusionThresholdExceeded {
        excluded: usize,
        total: usize,
        max_ratio: f64,
    },
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
