use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Failures of the vision extraction step. None of these are retried.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("scan has no image reference")]
    MissingImageReference,

    #[error("vision model returned no text")]
    EmptyResponse,

    #[error("vision model response is not valid JSON: {reason}")]
    InvalidJson { reason: String, raw: String },

    #[error("vision request failed: {0}")]
    Http(String),

    #[error("vision API error {status}: {body}")]
    Api { status: u16, body: String },

    #[error("vision backend not configured: {0}")]
    NotConfigured(String),
}

impl From<reqwest::Error> for ExtractionError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("could not prepare database path: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored JSON column is malformed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database connection lock poisoned")]
    Poisoned,

    #[error("scan {0} not found")]
    ScanNotFound(String),

    #[error("{table} record {id} not found")]
    Missing { table: &'static str, id: String },
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("scan record has no {0}")]
    MissingField(&'static str),

    #[error("ledger write failed: {0}")]
    LedgerWrite(String),

    #[error("ledger task aborted: {0}")]
    Task(String),

    #[error("scan {scan_id} is {status} and cannot be reversed")]
    NotReversible { scan_id: String, status: String },
}

pub type PipelineResult<T> = Result<T, PipelineError>;
