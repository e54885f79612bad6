//! Custom error types for the update engine.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Verification failed for {path}: {reason}")]
    Verification { path: String, reason: String },

    #[error("Compression error: {0}")]
    Codec(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl UpdateError {
    /// Wrap an I/O error with the path it occurred on.
    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        UpdateError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

impl From<ini::Error> for UpdateError {
    fn from(err: ini::Error) -> Self {
        match err {
            ini::Error::Io(e) => UpdateError::Io(e),
            ini::Error::Parse(e) => UpdateError::Parse(e.to_string()),
        }
    }
}

/// Errors raised while fetching a single file from a mirror.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {url}")]
    Status { status: u16, url: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, UpdateError>;
