use std::time::Duration;

use arrow::error::ArrowError;
use parquet::errors::ParquetError;
use thiserror::Error;

use crate::models::JobId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    #[error("HTTP error: {0}")]
    Http(#[from] rquest::Error),

    #[error("Connectivity error: {0}")]
    Connectivity(String),

    #[error("HTTP {status} from {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    #[error("Rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    #[error("A scan is already in progress: {0}")]
    ScanInProgress(String),

    #[error("Could not resolve submitted job id, candidates: {candidates:?}")]
    AmbiguousJobId { candidates: Vec<JobId> },

    #[error("Scan {job_id} failed with status {status}")]
    ScanFailed { job_id: JobId, status: String },

    #[error("Scan {job_id} timed out (last status: {last_status:?})")]
    ScanTimedOut {
        job_id: JobId,
        last_status: Option<String>,
    },

    #[error("Scan {job_id} aborted")]
    ScanAborted { job_id: JobId },

    #[error("Download of scan {job_id} failed: {reason}")]
    DownloadFailed { job_id: JobId, reason: String },

    #[error("Refusing to submit an empty payload")]
    EmptyPayload,

    #[error("Invalid scan state: {0}")]
    InvalidState(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] ParquetError),
}

impl Error {
    /// Transport-level failures and 5xx responses that are safe to retry
    /// for idempotent calls.
    pub fn is_connectivity(&self) -> bool {
        match self {
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            Error::Connectivity(_) => true,
            _ => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }
}
