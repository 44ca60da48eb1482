use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection error: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0} environment variable is not set")]
    MissingEnv(&'static str),

    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Malformed statement: {0}")]
    Malformed(String),

    #[error("Statement rejected: {0}")]
    Rejected(String),

    #[error("Batch {batch} failed after {attempts} attempts: {source}")]
    BatchExhausted {
        batch: usize,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
