use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Download of {url} failed with status {status}")]
    HttpStatus { url: String, status: StatusCode },

    #[error("Missing expected column: {0}")]
    MissingColumn(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Upsert rejected with status {status}: {body}")]
    Rejected { status: StatusCode, body: String },

    #[error("Missing environment variable {0}")]
    MissingEnv(String),

    #[error("Invalid value {value:?} for environment variable {name}")]
    InvalidEnv { name: String, value: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
